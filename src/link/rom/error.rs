use std::fmt;
use std::io;
use thiserror::Error;

/// Fatal problems with the fixed 16-byte header. Section reads must not start after one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("bytes don't start with the iNES magic \"NES\\x1a\" (found {found:02x?})")]
    MagicMismatch { found: [u8; 4] },
    #[error("header bytes 11-15 must be zero (found {found:02x?})")]
    ReservedNonZero { found: [u8; 5] },
}

/// The trailing title isn't ASCII. The ROM sections decoded before it are still intact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("title byte {byte:#04x} at offset {offset} is not ASCII")]
pub struct TitleError {
    pub offset: usize,
    pub byte: u8,
}

/// Parts of an image, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    Trainer,
    PrgRom,
    ChrRom,
    PlayChoiceInstRom,
    PlayChoicePromData,
    PlayChoicePromCounterOut,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Header => "header",
            Section::Trainer => "trainer",
            Section::PrgRom => "PRG ROM",
            Section::ChrRom => "CHR ROM",
            Section::PlayChoiceInstRom => "PlayChoice-10 INST-ROM",
            Section::PlayChoicePromData => "PlayChoice-10 PROM data",
            Section::PlayChoicePromCounterOut => "PlayChoice-10 PROM CounterOut",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("couldn't parse iNES header: {0}")]
    Header(#[from] HeaderError),
    #[error("image is truncated: {section} needs {expected} bytes but only {actual} are left")]
    TruncatedImage {
        section: Section,
        expected: usize,
        actual: usize,
    },
    #[error("couldn't decode title: {0}")]
    InvalidTitleEncoding(#[from] TitleError),
    #[error("couldn't read image: {0}")]
    Io(#[from] io::Error),
}
