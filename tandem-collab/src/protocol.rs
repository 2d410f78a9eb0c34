//! Length-prefixed binary wire protocol for text events.
//!
//! Wire format (one record per event):
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len (u32 BE) │ bincode(TextEvent)           │
//! │ 4 bytes      │ `len` bytes                  │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! Records are self-delimiting, so a reader never has to guess where one
//! event ends. Each record is flushed on its own; there is no batching.

use tandem_core::TextEvent;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload a peer may announce. Anything bigger is treated as a
/// corrupted stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Which side of the fault taxonomy a [`ProtocolError`] falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The byte stream itself failed or was closed.
    Transport,
    /// Bytes arrived but did not form a valid record.
    Decode,
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Peer closed the stream cleanly at a record boundary.
    ConnectionClosed,
    Io(String),
    SerializationError(String),
    DeserializationError(String),
    FrameTooLarge { len: usize, max: usize },
}

impl ProtocolError {
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::ConnectionClosed | Self::Io(_) => FaultKind::Transport,
            Self::SerializationError(_)
            | Self::DeserializationError(_)
            | Self::FrameTooLarge { .. } => FaultKind::Decode,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::FrameTooLarge { len, max } => {
                write!(f, "Frame of {len} bytes exceeds limit of {max} bytes")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Serialize an event to its bincode payload (no length prefix).
pub fn encode_payload(event: &TextEvent) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(event, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Deserialize a payload. Trailing bytes are rejected: a payload holds
/// exactly one event.
pub fn decode_payload(bytes: &[u8]) -> Result<TextEvent, ProtocolError> {
    let (event, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    if read != bytes.len() {
        return Err(ProtocolError::DeserializationError(format!(
            "{} trailing bytes after event",
            bytes.len() - read
        )));
    }
    Ok(event)
}

/// Serialize an event to a complete record, length prefix included.
pub fn encode_frame(event: &TextEvent) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(event)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one record and flush it.
pub async fn write_event<W>(writer: &mut W, event: &TextEvent) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(event)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one record.
///
/// EOF before the first header byte is [`ProtocolError::ConnectionClosed`];
/// EOF anywhere later is an I/O error, since the record was cut short.
pub async fn read_event<R>(reader: &mut R) -> Result<TextEvent, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                ProtocolError::ConnectionClosed
            } else {
                ProtocolError::Io("stream ended inside record header".to_string())
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_payload(&payload)
}
