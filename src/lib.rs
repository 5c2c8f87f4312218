//! Client for Waveshare-style CAN-to-Ethernet gateways.
//!
//! The gateway carries one classic CAN frame per fixed 13-byte record over a
//! plain TCP stream. [`WaveshareClient`] keeps that stream open, decodes what
//! arrives into [`CanFrame`]s, and serializes outgoing frames.
//!
//! ```no_run
//! use waveshare_bridge::{CanFrame, ConnectOptions};
//!
//! # async fn demo() -> Result<(), waveshare_bridge::IoError> {
//! let client = waveshare_bridge::connect("192.168.1.200", 20001, ConnectOptions::default()).await?;
//! let mut rx = client.subscribe();
//! client.send(&CanFrame::new(0x123, vec![0x01, 0x02])).await?;
//! if let Ok(frame) = rx.recv().await {
//!     println!("{}", frame);
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod logging;
pub mod io;
pub mod settings;

pub use io::{
    connect, validate_id, BridgeEvent, CanDevice, CanFrame, ConnectOptions, ConnectionState,
    FrameCodec, IoError, WaveshareClient, WaveshareCodec, WireFrame, WireFramer,
};
pub use settings::BridgeSettings;
