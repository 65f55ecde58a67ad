use std::time::{Duration, Instant};

use thiserror::Error;

use crate::link::input::joypad::InputEvent;

/// A bound device stopped answering, most likely because it was unplugged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("input device \"{identity}\" stopped responding: {reason}")]
pub struct DeviceError {
    pub identity: String,
    pub reason: String,
}

/// A physical controller feeding one slot.
pub trait InputSource: Send {
    fn identity(&self) -> &str;

    /// Blocks until events arrive or a short poll interval passes; an empty batch is fine.
    fn read_events(&mut self) -> Result<Vec<InputEvent>, DeviceError>;
}

/// Device discovery. Slots pick by identity first and only then claim the device.
pub trait SourceScanner: Send + Sync {
    /// Identities of attached, unclaimed devices in discovery order.
    fn available(&self) -> Vec<String>;

    fn claim(&self, identity: &str) -> Option<Box<dyn InputSource>>;
}

/// When an unbound slot should look for devices next. Time is passed in, never read, so the
/// schedule can be stepped in tests.
#[derive(Debug, Clone)]
pub struct ScanSchedule {
    interval: Duration,
    next_scan: Option<Instant>,
}

impl ScanSchedule {
    pub fn new(interval: Duration) -> Self {
        Self { interval, next_scan: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_scan.map_or(true, |at| now >= at)
    }

    /// A scan found nothing to bind.
    pub fn missed(&mut self, now: Instant) {
        self.next_scan = Some(now + self.interval);
    }

    /// The slot bound a device; the next time it is unbound it scans straight away.
    pub fn reset(&mut self) {
        self.next_scan = None;
    }

    pub fn wait_time(&self, now: Instant) -> Duration {
        match self.next_scan {
            Some(at) if at > now => at - now,
            _ => Duration::from_secs(0),
        }
    }
}
