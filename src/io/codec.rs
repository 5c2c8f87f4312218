// src/io/codec.rs
//
// Frame codec trait and re-export of the gateway wire codec.
//
// The FrameCodec trait covers single-frame operations. Byte-stream framing
// (splitting a TCP stream into frames) lives alongside each codec in its
// driver module.

use crate::io::error::IoError;
use crate::io::CanFrame;

// ============================================================================
// Frame Codec Trait
// ============================================================================

/// Trait for CAN frame codecs.
///
/// The associated types define the protocol-specific raw frame formats.
pub trait FrameCodec {
    /// The raw frame type for decoding (e.g., byte slice)
    type RawFrame: ?Sized;

    /// The encoded frame type for transmission
    type EncodedFrame;

    /// Decode a raw frame into a CanFrame.
    ///
    /// Returns `Err(IoError)` if the frame is malformed or cannot be parsed.
    fn decode(raw: &Self::RawFrame) -> Result<CanFrame, IoError>;

    /// Encode a frame for transmission.
    ///
    /// Returns `Err(IoError)` if the frame cannot be encoded (e.g., too much data).
    fn encode(frame: &CanFrame) -> Result<Self::EncodedFrame, IoError>;
}

// ============================================================================
// Re-exports from driver modules
// ============================================================================

pub use super::waveshare::codec::WaveshareCodec;
