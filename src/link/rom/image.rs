use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{debug, warn};

use crate::link::config::TitlePolicy;
use crate::link::rom::error::{ImageError, Section, TitleError};
use crate::link::rom::ines::{InesHeader, INES_HEADER_BYTES};
use crate::link::rom::{PC10_INST_ROM_SIZE, PC10_PROM_HALF_SIZE, TRAINER_SIZE};

/// http://wiki.nesdev.com/w/index.php/PC10_ROM-Images
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayChoice10 {
    pub inst_rom: Vec<u8>,
    pub prom: Prom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prom {
    pub data: [u8; PC10_PROM_HALF_SIZE],
    pub counter_out: [u8; PC10_PROM_HALF_SIZE],
}

/// Whatever follows the last fixed section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Title {
    Absent,
    Text(String),
    Invalid { raw: Vec<u8>, error: TitleError },
}

impl Title {
    fn decode(raw: Vec<u8>) -> Self {
        if raw.is_empty() {
            return Title::Absent;
        }
        match raw.iter().position(|b| !b.is_ascii()) {
            Some(offset) => {
                let error = TitleError { offset, byte: raw[offset] };
                Title::Invalid { raw, error }
            }
            None => Title::Text(raw.iter().map(|&b| b as char).collect()),
        }
    }

    /// Title for display, without the NUL padding some dumps carry.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Title::Text(text) => Some(text.trim_end_matches('\0')),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TitleError> {
        match self {
            Title::Invalid { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The trailing bytes exactly as they were in the file.
    pub fn raw(&self) -> &[u8] {
        match self {
            Title::Absent => &[],
            Title::Text(text) => text.as_bytes(),
            Title::Invalid { raw, .. } => raw,
        }
    }
}

/// A decoded iNES image. Built once from a byte source and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeImage {
    pub header: InesHeader,
    pub trainer: Option<Vec<u8>>,
    pub prg_rom: Vec<u8>,
    pub chr_rom: Vec<u8>,
    pub playchoice10: Option<PlayChoice10>,
    pub title: Title,
}

fn read_section<R: Read>(
    source: &mut R,
    len: usize,
    section: Section,
) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::with_capacity(len);
    source.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(ImageError::TruncatedImage { section, expected: len, actual: buf.len() });
    }
    Ok(buf)
}

fn read_half_prom<R: Read>(
    source: &mut R,
    section: Section,
) -> Result<[u8; PC10_PROM_HALF_SIZE], ImageError> {
    let bytes = read_section(source, PC10_PROM_HALF_SIZE, section)?;
    let mut half = [0u8; PC10_PROM_HALF_SIZE];
    half.copy_from_slice(&bytes);
    Ok(half)
}

impl CartridgeImage {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        policy: TitlePolicy,
    ) -> Result<CartridgeImage, ImageError> {
        let file = File::open(path)?;
        Self::decode_with(BufReader::new(file), policy)
    }

    pub fn from_bytes(bytes: &[u8], policy: TitlePolicy) -> Result<CartridgeImage, ImageError> {
        Self::decode_with(bytes, policy)
    }

    /// Decodes with [`TitlePolicy::Advisory`].
    pub fn decode<R: Read>(source: R) -> Result<CartridgeImage, ImageError> {
        Self::decode_with(source, TitlePolicy::Advisory)
    }

    pub fn decode_with<R: Read>(
        mut source: R,
        policy: TitlePolicy,
    ) -> Result<CartridgeImage, ImageError> {
        let raw_header = read_section(&mut source, INES_HEADER_BYTES, Section::Header)?;
        let mut buf = [0u8; INES_HEADER_BYTES];
        buf.copy_from_slice(&raw_header);
        let header = InesHeader::parse(&buf)?;
        debug!(
            "iNES header: mapper {}, {} PRG bank(s), {} CHR bank(s)",
            header.mapper(),
            header.prg_rom_banks,
            header.chr_rom_banks
        );

        let trainer = if header.has_trainer() {
            Some(read_section(&mut source, TRAINER_SIZE, Section::Trainer)?)
        } else {
            None
        };
        let prg_rom = read_section(&mut source, header.prg_rom_len(), Section::PrgRom)?;
        let chr_rom = read_section(&mut source, header.chr_rom_len(), Section::ChrRom)?;
        let playchoice10 = if header.has_playchoice10() {
            let inst_rom =
                read_section(&mut source, PC10_INST_ROM_SIZE, Section::PlayChoiceInstRom)?;
            let data = read_half_prom(&mut source, Section::PlayChoicePromData)?;
            let counter_out = read_half_prom(&mut source, Section::PlayChoicePromCounterOut)?;
            Some(PlayChoice10 { inst_rom, prom: Prom { data, counter_out } })
        } else {
            None
        };

        let mut rest = vec![];
        source.read_to_end(&mut rest)?;
        let title = Title::decode(rest);
        if let Title::Invalid { error, .. } = &title {
            match policy {
                TitlePolicy::Strict => return Err(error.clone().into()),
                TitlePolicy::Advisory => warn!("Ignoring image title: {}", error),
            }
        }

        Ok(CartridgeImage { header, trainer, prg_rom, chr_rom, playchoice10, title })
    }

    pub fn mapper(&self) -> u8 {
        self.header.mapper()
    }

    pub fn prg_rom_kib(&self) -> usize {
        self.prg_rom.len() / 1024
    }

    pub fn chr_rom_kib(&self) -> usize {
        self.chr_rom.len() / 1024
    }

    /// Size of the file this image was decoded from.
    pub fn encoded_len(&self) -> usize {
        INES_HEADER_BYTES + self.header.body_len() + self.title.raw().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::rom::{CHR_BANK_SIZE, PRG_BANK_SIZE};

    fn rom(prg: u8, chr: u8, f6: u8, f7: u8, tail: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x4e, 0x45, 0x53, 0x1a, prg, chr, f6, f7, 0, 0, 0, 0, 0, 0, 0, 0];
        if f6 & 0x04 != 0 {
            bytes.extend(std::iter::repeat(0x77).take(TRAINER_SIZE));
        }
        bytes.extend(std::iter::repeat(0xaa).take(prg as usize * PRG_BANK_SIZE));
        bytes.extend(std::iter::repeat(0xcc).take(chr as usize * CHR_BANK_SIZE));
        if f7 & 0x02 != 0 {
            bytes.extend(std::iter::repeat(0x10).take(PC10_INST_ROM_SIZE));
            bytes.extend(std::iter::repeat(0x20).take(PC10_PROM_HALF_SIZE));
            bytes.extend(std::iter::repeat(0x30).take(PC10_PROM_HALF_SIZE));
        }
        bytes.extend_from_slice(tail);
        bytes
    }

    #[test]
    fn decodes_sections_at_header_sizes() {
        let bytes = rom(2, 1, 0, 0, &[]);
        assert_eq!(bytes.len(), 16 + 40960);
        let image = CartridgeImage::decode(&bytes[..]).unwrap();
        assert_eq!(image.prg_rom.len(), 2 * PRG_BANK_SIZE);
        assert_eq!(image.chr_rom.len(), CHR_BANK_SIZE);
        assert!(image.trainer.is_none());
        assert!(image.playchoice10.is_none());
        assert_eq!(image.title, Title::Absent);
        assert_eq!(image.encoded_len(), bytes.len());
    }

    #[test]
    fn trainer_comes_before_prg_rom() {
        let bytes = rom(1, 0, 0x04, 0, &[]);
        let image = CartridgeImage::decode(&bytes[..]).unwrap();
        let trainer = image.trainer.unwrap();
        assert_eq!(trainer.len(), TRAINER_SIZE);
        assert!(trainer.iter().all(|&b| b == 0x77));
        assert!(image.prg_rom.iter().all(|&b| b == 0xaa));
        assert!(image.chr_rom.is_empty());
    }

    #[test]
    fn reads_playchoice10_section() {
        let bytes = rom(1, 1, 0, 0x02, b"PC10 GAME");
        let image = CartridgeImage::decode(&bytes[..]).unwrap();
        let pc10 = image.playchoice10.unwrap();
        assert_eq!(pc10.inst_rom.len(), PC10_INST_ROM_SIZE);
        assert_eq!(pc10.prom.data, [0x20; 16]);
        assert_eq!(pc10.prom.counter_out, [0x30; 16]);
        assert_eq!(image.title.as_str(), Some("PC10 GAME"));
    }

    #[test]
    fn short_stream_is_truncated() {
        let mut bytes = rom(2, 1, 0, 0, &[]);
        bytes.truncate(16 + 2 * PRG_BANK_SIZE + 100);
        match CartridgeImage::decode(&bytes[..]) {
            Err(ImageError::TruncatedImage { section, expected, actual }) => {
                assert_eq!(section, Section::ChrRom);
                assert_eq!(expected, CHR_BANK_SIZE);
                assert_eq!(actual, 100);
            }
            other => panic!("expected truncation, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn short_trainer_is_truncated() {
        let mut bytes = rom(1, 0, 0x04, 0, &[]);
        bytes.truncate(16 + 100);
        assert!(matches!(
            CartridgeImage::decode(&bytes[..]),
            Err(ImageError::TruncatedImage {
                section: Section::Trainer,
                expected: 512,
                actual: 100,
            })
        ));
    }

    #[test]
    fn short_playchoice10_inst_rom_is_truncated() {
        let mut bytes = rom(1, 1, 0, 0x02, &[]);
        bytes.truncate(16 + PRG_BANK_SIZE + CHR_BANK_SIZE + 1000);
        assert!(matches!(
            CartridgeImage::decode(&bytes[..]),
            Err(ImageError::TruncatedImage {
                section: Section::PlayChoiceInstRom,
                expected: 8192,
                actual: 1000,
            })
        ));
    }

    #[test]
    fn short_prom_counter_out_is_truncated() {
        let mut bytes = rom(1, 1, 0, 0x02, &[]);
        let len = bytes.len();
        bytes.truncate(len - 4);
        assert!(matches!(
            CartridgeImage::decode(&bytes[..]),
            Err(ImageError::TruncatedImage {
                section: Section::PlayChoicePromCounterOut,
                expected: 16,
                actual: 12,
            })
        ));
    }

    #[test]
    fn short_header_is_truncated() {
        let result = CartridgeImage::decode(&b"NES\x1a\x01"[..]);
        assert!(matches!(
            result,
            Err(ImageError::TruncatedImage { section: Section::Header, expected: 16, actual: 5 })
        ));
    }

    #[test]
    fn bad_header_stops_before_sections() {
        let mut bytes = rom(1, 1, 0, 0, &[]);
        bytes[0] = b'X';
        assert!(matches!(CartridgeImage::decode(&bytes[..]), Err(ImageError::Header(_))));
    }

    #[test]
    fn keeps_padded_title() {
        let bytes = rom(1, 1, 0, 0, b"Some Game\0\0\0");
        let image = CartridgeImage::decode(&bytes[..]).unwrap();
        assert_eq!(image.title.as_str(), Some("Some Game"));
        assert_eq!(image.title.raw(), b"Some Game\0\0\0");
        assert_eq!(image.encoded_len(), bytes.len());
    }

    #[test]
    fn non_ascii_title_is_advisory_by_default() {
        let bytes = rom(1, 1, 0, 0, &[b'O', b'K', 0xe9]);
        let image = CartridgeImage::decode(&bytes[..]).unwrap();
        assert_eq!(image.title.error(), Some(&TitleError { offset: 2, byte: 0xe9 }));
        assert_eq!(image.title.raw(), &[b'O', b'K', 0xe9]);
        assert_eq!(image.prg_rom.len(), PRG_BANK_SIZE);
    }

    #[test]
    fn non_ascii_title_fails_strict_decode() {
        let bytes = rom(1, 1, 0, 0, &[0xff]);
        let result = CartridgeImage::from_bytes(&bytes, TitlePolicy::Strict);
        assert!(matches!(
            result,
            Err(ImageError::InvalidTitleEncoding(TitleError { offset: 0, byte: 0xff }))
        ));
    }
}
