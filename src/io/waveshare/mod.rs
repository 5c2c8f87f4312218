// src/io/waveshare/mod.rs
//
// Waveshare CAN-to-Ethernet gateway driver (TCP server mode, transparent
// 13-byte frame format).

pub mod codec;
mod framer;
mod tcp;

// Re-export public items
pub use codec::{validate_id, WaveshareCodec, WireFrame};
pub use framer::{wire_frames, WireFramer};
pub use tcp::{connect, ConnectOptions, WaveshareClient};
