pub mod error;
pub mod ines;
pub mod image;

pub const PRG_BANK_SIZE: usize = 16 * 1024; // bytes in a PRG/ROM bank
pub const CHR_BANK_SIZE: usize = 8 * 1024;  // bytes in a CHR/VROM bank
pub const TRAINER_SIZE: usize = 512;
pub const PC10_INST_ROM_SIZE: usize = 8 * 1024;
pub const PC10_PROM_HALF_SIZE: usize = 16;
