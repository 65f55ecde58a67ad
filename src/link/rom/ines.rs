//! The .NES file format (file name suffix .nes) is the de facto standard for distribution of NES binary programs.
//!
//! See http://fms.komkon.org/EMUL8/NES.html#LABM and https://wiki.nesdev.com/w/index.php/INES#iNES_file_format
//!
//! Flag bytes are unpacked most-significant-bit first, so the first field listed for a byte
//! occupies its high bits.

use crate::link::rom::error::HeaderError;
use crate::link::rom::{
    CHR_BANK_SIZE, PC10_INST_ROM_SIZE, PC10_PROM_HALF_SIZE, PRG_BANK_SIZE, TRAINER_SIZE,
};

/// String "NES^Z" used to recognize .NES files.
pub const INES_MAGIC_BYTES: &[u8; 4] = b"NES\x1a";
pub const INES_HEADER_BYTES: usize = 16;
const RESERVED_TAIL: [u8; 5] = [0; 5];

/// Reads fields out of one flag byte, high bits first.
struct BitCursor {
    byte: u8,
    consumed: u32,
}

impl BitCursor {
    fn new(byte: u8) -> Self {
        Self { byte, consumed: 0 }
    }

    fn take(&mut self, width: u32) -> u8 {
        self.consumed += width;
        let mask = ((1u16 << width) - 1) as u8;
        (self.byte >> (8 - self.consumed)) & mask
    }

    fn flag(&mut self) -> bool {
        self.take(1) != 0
    }
}

/// Inverse of [`BitCursor`].
struct BitPacker {
    byte: u8,
    filled: u32,
}

impl BitPacker {
    fn new() -> Self {
        Self { byte: 0, filled: 0 }
    }

    fn put(mut self, width: u32, value: u8) -> Self {
        self.filled += width;
        let mask = ((1u16 << width) - 1) as u8;
        self.byte |= (value & mask) << (8 - self.filled);
        self
    }

    fn flag(self, value: bool) -> Self {
        self.put(1, value as u8)
    }

    fn finish(self) -> u8 {
        debug_assert_eq!(self.filled, 8);
        self.byte
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
}

/// Flags 9 TV system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TvSystem {
    Ntsc,
    Pal,
}

/// Flags 10 TV system, an unofficial extension most emulators ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TvCompatibility {
    Ntsc,
    DualA,
    Pal,
    DualB,
}

/// https://wiki.nesdev.com/w/index.php/INES#Flags_6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags6 {
    pub lower_mapper: u8,
    pub four_screen: bool,
    pub trainer: bool,
    pub battery_ram: bool,
    pub mirroring: Mirroring,
}

impl Flags6 {
    pub fn unpack(byte: u8) -> Self {
        let mut bits = BitCursor::new(byte);
        Self {
            lower_mapper: bits.take(4),
            four_screen: bits.flag(),
            trainer: bits.flag(),
            battery_ram: bits.flag(),
            mirroring: match bits.take(1) {
                0 => Mirroring::Horizontal,
                _ => Mirroring::Vertical,
            },
        }
    }

    pub fn pack(&self) -> u8 {
        BitPacker::new()
            .put(4, self.lower_mapper)
            .flag(self.four_screen)
            .flag(self.trainer)
            .flag(self.battery_ram)
            .flag(self.mirroring == Mirroring::Vertical)
            .finish()
    }
}

/// https://wiki.nesdev.com/w/index.php/INES#Flags_7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags7 {
    pub upper_mapper: u8,
    /// 2 here means the rest of the header is NES 2.0.
    pub format: u8,
    pub playchoice10: bool,
    pub vs_unisystem: bool,
}

impl Flags7 {
    pub fn unpack(byte: u8) -> Self {
        let mut bits = BitCursor::new(byte);
        Self {
            upper_mapper: bits.take(4),
            format: bits.take(2),
            playchoice10: bits.flag(),
            vs_unisystem: bits.flag(),
        }
    }

    pub fn pack(&self) -> u8 {
        BitPacker::new()
            .put(4, self.upper_mapper)
            .put(2, self.format)
            .flag(self.playchoice10)
            .flag(self.vs_unisystem)
            .finish()
    }
}

/// https://wiki.nesdev.com/w/index.php/INES#Flags_9
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags9 {
    pub reserved: u8,
    pub tv_system: TvSystem,
}

impl Flags9 {
    pub fn unpack(byte: u8) -> Self {
        let mut bits = BitCursor::new(byte);
        Self {
            reserved: bits.take(7),
            tv_system: match bits.take(1) {
                0 => TvSystem::Ntsc,
                _ => TvSystem::Pal,
            },
        }
    }

    pub fn pack(&self) -> u8 {
        BitPacker::new()
            .put(7, self.reserved)
            .flag(self.tv_system == TvSystem::Pal)
            .finish()
    }
}

/// https://wiki.nesdev.com/w/index.php/INES#Flags_10
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags10 {
    pub reserved_high: u8,
    pub bus_conflict: bool,
    /// Per nesdev a set bit means the board has no PRG RAM.
    pub prg_ram: bool,
    pub reserved_low: u8,
    pub tv_system: TvCompatibility,
}

impl Flags10 {
    pub fn unpack(byte: u8) -> Self {
        let mut bits = BitCursor::new(byte);
        Self {
            reserved_high: bits.take(2),
            bus_conflict: bits.flag(),
            prg_ram: bits.flag(),
            reserved_low: bits.take(2),
            tv_system: match bits.take(2) {
                0 => TvCompatibility::Ntsc,
                1 => TvCompatibility::DualA,
                2 => TvCompatibility::Pal,
                _ => TvCompatibility::DualB,
            },
        }
    }

    pub fn pack(&self) -> u8 {
        let tv = match self.tv_system {
            TvCompatibility::Ntsc => 0,
            TvCompatibility::DualA => 1,
            TvCompatibility::Pal => 2,
            TvCompatibility::DualB => 3,
        };
        BitPacker::new()
            .put(2, self.reserved_high)
            .flag(self.bus_conflict)
            .flag(self.prg_ram)
            .put(2, self.reserved_low)
            .put(2, tv)
            .finish()
    }
}

/// iNES file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InesHeader {
    /// Number of 16kiB PRG ROM banks
    pub prg_rom_banks: u8,
    /// Number of 8kiB CHR ROM banks
    pub chr_rom_banks: u8,
    pub flags6: Flags6,
    pub flags7: Flags7,
    /// Number of 8kiB RAM banks. Value 0 infers 8 KB for compatibility
    pub prg_ram_banks: u8,
    pub flags9: Flags9,
    pub flags10: Flags10,
}

impl InesHeader {
    pub fn parse(bytes: &[u8; INES_HEADER_BYTES]) -> Result<InesHeader, HeaderError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if &magic != INES_MAGIC_BYTES {
            return Err(HeaderError::MagicMismatch { found: magic });
        }
        let header = InesHeader {
            prg_rom_banks: bytes[4],
            chr_rom_banks: bytes[5],
            flags6: Flags6::unpack(bytes[6]),
            flags7: Flags7::unpack(bytes[7]),
            prg_ram_banks: bytes[8],
            flags9: Flags9::unpack(bytes[9]),
            flags10: Flags10::unpack(bytes[10]),
        };
        if bytes[11..] != RESERVED_TAIL {
            let mut found = [0u8; 5];
            found.copy_from_slice(&bytes[11..]);
            return Err(HeaderError::ReservedNonZero { found });
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; INES_HEADER_BYTES] {
        let mut bytes = [0u8; INES_HEADER_BYTES];
        bytes[0..4].copy_from_slice(INES_MAGIC_BYTES);
        bytes[4] = self.prg_rom_banks;
        bytes[5] = self.chr_rom_banks;
        bytes[6] = self.flags6.pack();
        bytes[7] = self.flags7.pack();
        bytes[8] = self.prg_ram_banks;
        bytes[9] = self.flags9.pack();
        bytes[10] = self.flags10.pack();
        bytes
    }

    /// https://wiki.nesdev.com/w/index.php/Mapper
    pub fn mapper(&self) -> u8 {
        self.flags6.lower_mapper | (self.flags7.upper_mapper << 4)
    }

    pub fn has_trainer(&self) -> bool {
        self.flags6.trainer
    }

    pub fn has_playchoice10(&self) -> bool {
        self.flags7.playchoice10
    }

    pub fn prg_rom_len(&self) -> usize {
        self.prg_rom_banks as usize * PRG_BANK_SIZE
    }

    pub fn chr_rom_len(&self) -> usize {
        self.chr_rom_banks as usize * CHR_BANK_SIZE
    }

    /// Bytes the fixed and conditional sections take after the header, title excluded.
    pub fn body_len(&self) -> usize {
        let trainer = if self.has_trainer() { TRAINER_SIZE } else { 0 };
        let pc10 = if self.has_playchoice10() {
            PC10_INST_ROM_SIZE + 2 * PC10_PROM_HALF_SIZE
        } else {
            0
        };
        trainer + self.prg_rom_len() + self.chr_rom_len() + pc10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn header_bytes(prg: u8, chr: u8, f6: u8, f7: u8) -> [u8; 16] {
        [0x4e, 0x45, 0x53, 0x1a, prg, chr, f6, f7, 0, 0, 0, 0, 0, 0, 0, 0]
    }

    #[test]
    fn parses_plain_nrom_header() {
        let header = InesHeader::parse(&header_bytes(2, 1, 0, 0)).unwrap();
        assert_eq!(header.prg_rom_banks, 2);
        assert_eq!(header.chr_rom_banks, 1);
        assert_eq!(header.mapper(), 0);
        assert!(!header.has_trainer());
        assert!(!header.has_playchoice10());
        assert_eq!(header.flags6.mirroring, Mirroring::Horizontal);
        assert_eq!(header.flags9.tv_system, TvSystem::Ntsc);
        assert_eq!(header.body_len(), 40960);
    }

    #[test]
    fn unpacks_flag_bits_high_first() {
        let f6 = Flags6::unpack(0b1010_1101);
        assert_eq!(f6.lower_mapper, 0b1010);
        assert!(f6.four_screen);
        assert!(f6.trainer);
        assert!(!f6.battery_ram);
        assert_eq!(f6.mirroring, Mirroring::Vertical);

        let f7 = Flags7::unpack(0b0100_1010);
        assert_eq!(f7.upper_mapper, 0b0100);
        assert_eq!(f7.format, 0b10);
        assert!(f7.playchoice10);
        assert!(!f7.vs_unisystem);

        let f9 = Flags9::unpack(0b1000_0001);
        assert_eq!(f9.reserved, 0b100_0000);
        assert_eq!(f9.tv_system, TvSystem::Pal);

        let f10 = Flags10::unpack(0b0111_0010);
        assert_eq!(f10.reserved_high, 0b01);
        assert!(f10.bus_conflict);
        assert!(f10.prg_ram);
        assert_eq!(f10.reserved_low, 0);
        assert_eq!(f10.tv_system, TvCompatibility::Pal);
    }

    #[test]
    fn every_flags10_tv_pattern_has_a_variant() {
        let systems: Vec<_> = (0..4u8).map(|b| Flags10::unpack(b).tv_system).collect();
        assert_eq!(systems, vec![
            TvCompatibility::Ntsc,
            TvCompatibility::DualA,
            TvCompatibility::Pal,
            TvCompatibility::DualB,
        ]);
    }

    #[test]
    fn mapper_combines_both_nibbles() {
        // Mapper 4 (MMC3) with upper nibble 1 → 0x14
        let header = InesHeader::parse(&header_bytes(1, 1, 0x40, 0x10)).unwrap();
        assert_eq!(header.mapper(), 0x14);
        assert_eq!(header.mapper(), header.mapper());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = header_bytes(1, 1, 0, 0);
        bytes[3] = 0x1b;
        assert_eq!(
            InesHeader::parse(&bytes),
            Err(HeaderError::MagicMismatch { found: *b"NES\x1b" })
        );
    }

    #[test]
    fn rejects_dirty_reserved_tail() {
        let mut bytes = header_bytes(1, 1, 0, 0);
        bytes[15] = b'D';
        assert_eq!(
            InesHeader::parse(&bytes),
            Err(HeaderError::ReservedNonZero { found: [0, 0, 0, 0, b'D'] })
        );
    }

    #[test]
    fn random_headers_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let mut bytes = [0u8; 16];
            bytes[0..4].copy_from_slice(INES_MAGIC_BYTES);
            rng.fill(&mut bytes[4..11]);
            let header = InesHeader::parse(&bytes).unwrap();
            assert_eq!(header.to_bytes(), bytes);
            assert_eq!(header.mapper(), (bytes[6] >> 4) | (bytes[7] & 0xf0));
        }
    }
}
