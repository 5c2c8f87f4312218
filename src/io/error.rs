// src/io/error.rs
//
// Typed error for codec, framing and transport failures.
//
// Errors carry device identifiers and stringified causes rather than the
// underlying std::io::Error so they stay Clone and can be published on the
// client's event channel.

use thiserror::Error;

/// Errors produced by the codec, the framer and the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// Outbound frame carries more than 8 data bytes
    #[error("invalid data length: {len} bytes (max 8)")]
    InvalidLength { len: usize },

    /// CAN identifier outside the unsigned 32-bit range
    #[error("invalid CAN id: {id}")]
    InvalidId { id: i64 },

    /// Decoder was handed something other than a 13-byte buffer
    #[error("invalid frame size: {len} bytes (expected 13)")]
    InvalidFrameSize { len: usize },

    /// Control byte carries a DLC above 8
    #[error("invalid DLC in control byte: {dlc}")]
    InvalidDlc { dlc: u8 },

    /// Stream ended with a partial frame still buffered
    #[error("stream closed mid-frame ({pending} bytes pending)")]
    StreamClosed { pending: usize },

    /// Connect refused, unreachable or timed out
    #[error("{device}: connection failed: {message}")]
    Connect { device: String, message: String },

    #[error("{device}: read error: {message}")]
    Read { device: String, message: String },

    #[error("{device}: write error: {message}")]
    Write { device: String, message: String },

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connect {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }

    /// Transport failures end the current connection and may trigger a reconnect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IoError::StreamClosed { .. }
                | IoError::Connect { .. }
                | IoError::Read { .. }
                | IoError::Write { .. }
        )
    }

    /// Errors caused by the caller's input or call sequence. Never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            IoError::InvalidLength { .. }
                | IoError::InvalidId { .. }
                | IoError::NotConnected
                | IoError::AlreadyConnected
        )
    }
}

impl From<IoError> for String {
    fn from(err: IoError) -> Self {
        err.to_string()
    }
}
