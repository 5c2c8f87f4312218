// src/io/mod.rs
//
// IO abstraction for CAN gateway connections.
// Shared frame/state/event types plus the device trait implemented by drivers.

// Core modules
pub mod codec; // Frame codec trait and implementations
mod error;

// Real-time drivers
pub mod waveshare; // Waveshare CAN-to-Ethernet TCP driver

// Re-export codec types
pub use codec::FrameCodec;
pub use waveshare::{
    connect, validate_id, wire_frames, ConnectOptions, WaveshareClient, WaveshareCodec, WireFrame,
    WireFramer,
};

// Error types
pub use error::IoError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ============================================================================
// Shared Types
// ============================================================================

/// A classic CAN frame, either built by a caller or produced by a decoder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// CAN identifier (11-bit standard or 29-bit extended)
    pub id: u32,
    /// Payload, 0-8 bytes
    pub data: Vec<u8>,
    /// Extended frame flag. `None` derives it from the id (id > 0x7FF).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extended: Option<bool>,
    /// Remote Transmission Request
    #[serde(default)]
    pub rtr: bool,
}

impl CanFrame {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
            extended: None,
            rtr: false,
        }
    }

    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = Some(extended);
        self
    }

    pub fn with_rtr(mut self, rtr: bool) -> Self {
        self.rtr = rtr;
        self
    }

    /// Effective extended flag: explicit value if set, otherwise derived from the id.
    pub fn is_extended(&self) -> bool {
        self.extended
            .unwrap_or(self.id > waveshare::codec::constants::CAN_SFF_MASK)
    }

    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Display for CanFrame {
    /// candump-style: `123#0102`, `1ABCDEF0#`, `123#R`
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_extended() {
            write!(f, "{:08X}#", self.id)?;
        } else {
            write!(f, "{:03X}#", self.id)?;
        }
        if self.rtr {
            write!(f, "R")
        } else {
            write!(f, "{}", hex::encode_upper(&self.data))
        }
    }
}

impl std::str::FromStr for CanFrame {
    type Err = IoError;

    /// Parse candump syntax: `123#0102`, `18FEF100#AABB`, `7DF#R`.
    /// Ids written with more than 3 hex digits are extended.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id_str, data_str) = s
            .trim()
            .split_once('#')
            .ok_or_else(|| IoError::configuration(format!("expected ID#DATA, got '{}'", s)))?;

        let raw_id = i64::from_str_radix(id_str, 16)
            .map_err(|_| IoError::configuration(format!("invalid hex id '{}'", id_str)))?;
        let id = validate_id(raw_id)?;
        let extended = id_str.len() > 3;

        if data_str.eq_ignore_ascii_case("r") {
            return Ok(CanFrame::new(id, vec![]).with_extended(extended).with_rtr(true));
        }

        let data = hex::decode(data_str.replace('.', ""))
            .map_err(|e| IoError::configuration(format!("invalid data '{}': {}", data_str, e)))?;
        if data.len() > waveshare::codec::constants::MAX_DLC {
            return Err(IoError::InvalidLength { len: data.len() });
        }

        Ok(CanFrame::new(id, data).with_extended(extended))
    }
}

/// Connection lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Observability events published by a connection
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Socket established (initial connect or reconnect)
    Connected { address: String },
    /// Connection lost or closed
    Disconnected { reason: String },
    /// Reconnect attempt scheduled after `delay_ms`
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnect attempt failed
    ReconnectFailed { attempt: u32, error: String },
    /// Reconnect attempts exhausted
    GaveUp { attempts: u32 },
    /// Malformed inbound frame dropped, connection kept
    DroppedFrame { error: String },
    /// A frame subscriber fell behind and missed frames
    Lagged { skipped: u64 },
}

// ============================================================================
// Device Trait
// ============================================================================

/// Interface implemented by every CAN gateway driver.
#[async_trait]
pub trait CanDevice: Send + Sync {
    /// Transmit one frame
    async fn send(&self, frame: &CanFrame) -> Result<(), IoError>;

    /// Subscribe to received frames
    fn subscribe(&self) -> broadcast::Receiver<CanFrame>;

    /// Subscribe to connection events
    fn events(&self) -> broadcast::Receiver<BridgeEvent>;

    /// Get current state
    fn state(&self) -> ConnectionState;

    /// Stop the connection and release the socket
    async fn close(&self);

    /// Get device type identifier (e.g., "waveshare_tcp")
    /// Default implementation returns "unknown"
    fn device_type(&self) -> &'static str {
        "unknown"
    }
}
