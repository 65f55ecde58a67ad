//! Host side of the NES-on-FPGA link: decode `.nes` images for display, push them to the
//! target over a serial line and keep it fed with the state of two gamepads.

pub mod config;
pub mod rom;
pub mod serial;
pub mod input;
