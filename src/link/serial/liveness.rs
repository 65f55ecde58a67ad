//! Watches the text the target prints back. Nothing here takes part in framing; it only
//! tells the user whether the firmware saw the image.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};

/// The firmware prints "Ines data sent to FPGA." once an image is handed to the loader.
pub const ACK_MARKER: &str = "FPGA";
const IDLE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct LivenessMonitor {
    line: String,
    line_acked: bool,
    acknowledged: bool,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if an acknowledgment showed up in `bytes`.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        let mut seen = false;
        for &b in bytes {
            // ISO-8859-1: every byte is a char
            let c = b as char;
            if c == '\n' {
                info!("target: {}", self.line.trim_end_matches('\r'));
                self.line.clear();
                self.line_acked = false;
                continue;
            }
            self.line.push(c);
            if !self.line_acked && self.line.contains(ACK_MARKER) {
                self.line_acked = true;
                self.acknowledged = true;
                seen = true;
            }
        }
        seen
    }

    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Forget earlier acknowledgments, e.g. before sending another image.
    pub fn reset(&mut self) {
        self.acknowledged = false;
    }
}

/// Drains `reader` on a background thread, setting `acknowledged` whenever the target confirms.
pub fn watch<R>(
    mut reader: R,
    acknowledged: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new().name("serial-reader".into()).spawn(move || {
        let mut monitor = LivenessMonitor::new();
        let mut buf = [0u8; 256];
        while !shutdown.load(Ordering::Relaxed) {
            match reader.read(&mut buf) {
                Ok(0) => thread::sleep(IDLE_BACKOFF),
                Ok(n) => {
                    if monitor.feed(&buf[..n]) {
                        info!("Target acknowledged the image");
                        acknowledged.store(true, Ordering::Relaxed);
                    }
                }
                // the line's read timeout doubles as the idle wait
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("Serial read failed: {}", e);
                    thread::sleep(IDLE_BACKOFF);
                }
            }
        }
    })
}
