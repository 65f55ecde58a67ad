use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use log::info;
use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::link::config::LinkConfig;

/// Line speed the target's UART runs at.
pub const BAUD_RATE: u32 = 230_400;
/// Longest a single read or write may block.
const IO_TIMEOUT: Duration = Duration::from_millis(500);

/// The target's serial line, set to raw 8N1 without flow control.
pub struct SerialPort {
    inner: Box<dyn serialport::SerialPort>,
}

impl SerialPort {
    pub fn open<P: AsRef<Path>>(path: P, baud_rate: u32) -> io::Result<SerialPort> {
        let path = path.as_ref();
        let inner = serialport::new(path.to_string_lossy(), baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(IO_TIMEOUT)
            .open()?;
        info!("Opened {} at {} baud", path.display(), baud_rate);
        Ok(SerialPort { inner })
    }

    pub fn from_config(config: &LinkConfig) -> io::Result<SerialPort> {
        match &config.port {
            Some(path) => SerialPort::open(path, config.baud_rate),
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "no serial port configured")),
        }
    }

    /// Independent handle for the inbound direction.
    pub fn try_clone(&self) -> io::Result<SerialPort> {
        Ok(SerialPort { inner: self.inner.try_clone()? })
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
