//! Length-Prefixed Frame Encoding
//!
//! Gives message boundaries to the byte streams between host and sandbox
//! (pipes or stdio). A frame whose payload fails validation is consumed whole,
//! so the reader stays aligned and can continue with the next frame.

use crate::messages::Envelope;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Maximum frame size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("End of stream")]
    EndOfStream,
}

impl FrameError {
    /// Whether the stream is still aligned on a frame boundary after this error.
    ///
    /// Malformed payloads and empty frames were consumed in full; everything
    /// else leaves the stream unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::Deserialization(_) | FrameError::InvalidFrame(_)
        )
    }
}

/// Write a message with length prefix to a writer
///
/// Frame format:
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    let len = bytes.len();
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;

    Ok(())
}

/// Read a message with length prefix from a reader
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::EndOfStream);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    let mut buf = rkyv::AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    reader.read_exact(&mut buf)?;

    let archived = rkyv::check_archived_root::<T>(&buf)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    let value: T = archived
        .deserialize(&mut Infallible)
        .expect("infallible deserialization");

    Ok(value)
}

/// Frame writer wrapper for sending envelopes
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
        }
    }

    /// Write any archivable message
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }

    /// Write one envelope
    pub fn send(&mut self, envelope: &Envelope) -> Result<(), FrameError> {
        self.write(envelope)
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> Result<(), FrameError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Frame reader wrapper for receiving envelopes
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Read any archivable message
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Read the next well-formed envelope, skipping malformed frames.
    ///
    /// Returns `Ok(None)` at end of stream. Unrecoverable errors (I/O failure,
    /// oversized length prefix) are returned as-is.
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>, FrameError> {
        loop {
            match self.read::<Envelope>() {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(FrameError::EndOfStream) => return Ok(None),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("dropping malformed frame: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check if the buffer has any data available
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}
