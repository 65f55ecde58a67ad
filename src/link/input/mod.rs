pub mod joypad;
pub mod source;
pub mod aggregator;
#[cfg(feature = "sdl")]
pub mod sdl;
