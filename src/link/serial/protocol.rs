//! Command frames understood by the target firmware.
//!
//! ```text
//! image:   01 | len (u32, little-endian) | raw .nes bytes
//! buttons: 02 | pad 0 mask | pad 1 mask
//! ```
//!
//! Frames are one-way and unacknowledged. The receiver reassembles image payloads by the
//! length field; the chunking used by [`FrameWriter`] is invisible on the wire.

use std::io::{self, Write};

use log::{debug, trace, warn};
use thiserror::Error;

pub const CMD_INES: u8 = 1;
pub const CMD_BUTTONS: u8 = 2;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Largest image the firmware buffers; longer length fields are discarded.
pub const MAX_IMAGE_LEN: usize = 3 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("couldn't write to serial line: {0}")]
    Io(#[from] io::Error),
    #[error("payload of {0} bytes doesn't fit the 32-bit length field")]
    PayloadTooLarge(usize),
}

pub fn ines_frame_header(len: usize) -> Result<[u8; 5], TransportError> {
    if len > u32::MAX as usize {
        return Err(TransportError::PayloadTooLarge(len));
    }
    let len = (len as u32).to_le_bytes();
    Ok([CMD_INES, len[0], len[1], len[2], len[3]])
}

pub fn buttons_frame(masks: [u8; 2]) -> [u8; 3] {
    [CMD_BUTTONS, masks[0], masks[1]]
}

/// Writes frames onto a byte sink. No retries; a failed write fails that frame only.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    inner: W,
    chunk_size: usize,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_chunk_size(inner, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: W, chunk_size: usize) -> Self {
        Self { inner, chunk_size: chunk_size.max(1) }
    }

    /// Sends `payload` untouched. It must be the raw file, never a re-encoded image.
    pub fn send_ines(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.send_ines_with_progress(payload, |_, _| {})
    }

    /// Like [`send_ines`](Self::send_ines), calling `progress(sent, total)` after each chunk.
    pub fn send_ines_with_progress<F>(
        &mut self,
        payload: &[u8],
        mut progress: F,
    ) -> Result<(), TransportError>
    where
        F: FnMut(usize, usize),
    {
        let header = ines_frame_header(payload.len())?;
        self.inner.write_all(&header)?;
        let mut sent = 0;
        for chunk in payload.chunks(self.chunk_size) {
            self.inner.write_all(chunk)?;
            sent += chunk.len();
            progress(sent, payload.len());
        }
        self.inner.flush()?;
        debug!("Sent {} bytes over serial line.", sent);
        Ok(())
    }

    pub fn send_buttons(&mut self, masks: [u8; 2]) -> Result<(), TransportError> {
        self.inner.write_all(&buttons_frame(masks))?;
        self.inner.flush()?;
        trace!("Sent buttons {:02x}, {:02x}", masks[0], masks[1]);
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ines(Vec<u8>),
    Buttons([u8; 2]),
}

#[derive(Debug)]
enum State {
    Idle,
    Length { buf: [u8; 4], filled: usize },
    Data { expected: usize, buf: Vec<u8> },
    Buttons { buf: [u8; 2], filled: usize },
}

/// Receiving end of the link, byte by byte, the way the target firmware parses it.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        let (next, frame) = match state {
            State::Idle => match byte {
                CMD_INES => (State::Length { buf: [0; 4], filled: 0 }, None),
                CMD_BUTTONS => (State::Buttons { buf: [0; 2], filled: 0 }, None),
                _ => {
                    warn!("Unknown command: {}", byte);
                    (State::Idle, None)
                }
            },
            State::Length { mut buf, mut filled } => {
                buf[filled] = byte;
                filled += 1;
                if filled < buf.len() {
                    (State::Length { buf, filled }, None)
                } else {
                    let expected = u32::from_le_bytes(buf) as usize;
                    if expected > 0 && expected < MAX_IMAGE_LEN {
                        (State::Data { expected, buf: Vec::with_capacity(expected) }, None)
                    } else {
                        warn!("Bad ines length: {}", expected);
                        (State::Idle, None)
                    }
                }
            }
            State::Data { expected, mut buf } => {
                buf.push(byte);
                if buf.len() < expected {
                    (State::Data { expected, buf }, None)
                } else {
                    (State::Idle, Some(Frame::Ines(buf)))
                }
            }
            State::Buttons { mut buf, mut filled } => {
                buf[filled] = byte;
                filled += 1;
                if filled < buf.len() {
                    (State::Buttons { buf, filled }, None)
                } else {
                    (State::Idle, Some(Frame::Buttons(buf)))
                }
            }
        };
        self.state = next;
        frame
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}
