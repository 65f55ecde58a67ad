use std::path::PathBuf;
use std::time::Duration;

use crate::link::serial::port::BAUD_RATE;
use crate::link::serial::protocol::DEFAULT_CHUNK_SIZE;

/// What a slot's button mask does when its device goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Treat removal as "all buttons released".
    ReleaseAll,
    /// Leave the last mask in place until a device rebinds.
    KeepLast,
}

/// How a title that isn't ASCII affects image decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitlePolicy {
    /// Keep the image; the title is reported as invalid.
    Advisory,
    /// Fail the whole decode.
    Strict,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial device node of the target, e.g. `/dev/ttyUSB1`.
    pub port: Option<PathBuf>,
    /// Line speed; the line is always raw 8N1.
    pub baud_rate: u32,
    /// Write granularity for image payloads. Has no meaning on the wire.
    pub chunk_size: usize,
    /// How long an unbound slot waits between device scans.
    pub scan_interval: Duration,
    pub disconnect: DisconnectPolicy,
    pub title: TitlePolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: BAUD_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            scan_interval: Duration::from_millis(100),
            disconnect: DisconnectPolicy::ReleaseAll,
            title: TitlePolicy::Advisory,
        }
    }
}
