// src/io/waveshare/codec.rs
//
// Waveshare CAN-to-Ethernet fixed frame codec.
//
// Every frame is exactly 13 bytes:
//   [Control-1byte][FrameID-4bytes-BE][Data-8bytes, zero padded]
//
// Control byte:
//   bit 7    extended (29-bit) identifier
//   bit 6    remote transmission request
//   bits 3:0 DLC (0-8)

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::CanFrame;

/// Waveshare protocol constants
pub mod constants {
    /// Size of every frame on the wire
    pub const FRAME_LEN: usize = 13;
    /// Offset of the first data byte
    pub const DATA_OFFSET: usize = 5;
    /// Maximum classic CAN payload
    pub const MAX_DLC: usize = 8;
    /// Control byte: extended identifier flag
    pub const FLAG_EXTENDED: u8 = 0x80;
    /// Control byte: remote transmission request flag
    pub const FLAG_RTR: u8 = 0x40;
    /// Control byte: DLC nibble
    pub const DLC_MASK: u8 = 0x0F;
    /// Highest identifier that fits the 11-bit standard format
    pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
}

/// One frame as it travels over the socket.
pub type WireFrame = [u8; constants::FRAME_LEN];

/// Waveshare fixed 13-byte codec.
pub struct WaveshareCodec;

impl FrameCodec for WaveshareCodec {
    type RawFrame = [u8];
    type EncodedFrame = WireFrame;

    /// Decode one frame. Padding bytes past the DLC are ignored, some
    /// gateway firmware leaves stale data there.
    fn decode(raw: &[u8]) -> Result<CanFrame, IoError> {
        use constants::*;

        if raw.len() != FRAME_LEN {
            return Err(IoError::InvalidFrameSize { len: raw.len() });
        }

        let control = raw[0];
        let dlc = control & DLC_MASK;
        if dlc as usize > MAX_DLC {
            return Err(IoError::InvalidDlc { dlc });
        }

        let id = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let data = raw[DATA_OFFSET..DATA_OFFSET + dlc as usize].to_vec();

        Ok(CanFrame {
            id,
            data,
            extended: Some(control & FLAG_EXTENDED != 0),
            rtr: control & FLAG_RTR != 0,
        })
    }

    /// Encode a frame for transmission.
    ///
    /// The identifier always occupies 4 bytes; the extended flag only
    /// changes the control byte.
    fn encode(frame: &CanFrame) -> Result<WireFrame, IoError> {
        use constants::*;

        let dlc = frame.data.len();
        if dlc > MAX_DLC {
            return Err(IoError::InvalidLength { len: dlc });
        }

        let mut control = dlc as u8;
        if frame.is_extended() {
            control |= FLAG_EXTENDED;
        }
        if frame.rtr {
            control |= FLAG_RTR;
        }

        let mut buf = [0u8; FRAME_LEN];
        buf[0] = control;
        buf[1..DATA_OFFSET].copy_from_slice(&frame.id.to_be_bytes());
        buf[DATA_OFFSET..DATA_OFFSET + dlc].copy_from_slice(&frame.data);

        Ok(buf)
    }
}

/// Check that a user-supplied identifier fits the 4-byte id field.
pub fn validate_id(raw: i64) -> Result<u32, IoError> {
    u32::try_from(raw).map_err(|_| IoError::InvalidId { id: raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_standard_frame() {
        let frame = CanFrame::new(0x123, vec![0x01, 0x02]);
        let encoded = WaveshareCodec::encode(&frame).unwrap();

        assert_eq!(
            encoded,
            [0x02, 0x00, 0x00, 0x01, 0x23, 0x01, 0x02, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_encode_extended_by_default_above_11_bits() {
        let encoded = WaveshareCodec::encode(&CanFrame::new(0x800, vec![0xAA])).unwrap();
        assert_eq!(encoded[0], 0x81);
        assert_eq!(&encoded[1..5], &[0x00, 0x00, 0x08, 0x00]);

        let encoded = WaveshareCodec::encode(&CanFrame::new(0x7FF, vec![])).unwrap();
        assert_eq!(encoded[0], 0x00);
    }

    #[test]
    fn test_encode_explicit_extended_overrides_default() {
        let frame = CanFrame::new(0x123, vec![]).with_extended(true);
        assert_eq!(WaveshareCodec::encode(&frame).unwrap()[0], 0x80);

        let frame = CanFrame::new(0x12345678, vec![]).with_extended(false);
        let encoded = WaveshareCodec::encode(&frame).unwrap();
        assert_eq!(encoded[0], 0x00);
        assert_eq!(&encoded[1..5], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_encode_control_byte_extended_rtr_empty() {
        let frame = CanFrame::new(0, vec![]).with_extended(true).with_rtr(true);
        let encoded = WaveshareCodec::encode(&frame).unwrap();
        assert_eq!(encoded[0], 0xC0);
        assert!(encoded[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_max_length() {
        let frame = CanFrame::new(0x1FFFFFFF, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let encoded = WaveshareCodec::encode(&frame).unwrap();
        assert_eq!(encoded[0], 0x88);
        assert_eq!(&encoded[5..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_encode_rejects_nine_bytes() {
        let frame = CanFrame::new(0x100, vec![0; 9]);
        assert_eq!(
            WaveshareCodec::encode(&frame),
            Err(IoError::InvalidLength { len: 9 })
        );
    }

    #[test]
    fn test_decode_standard_frame() {
        let raw = [0x02, 0x00, 0x00, 0x01, 0x23, 0x01, 0x02, 0, 0, 0, 0, 0, 0];
        let frame = WaveshareCodec::decode(&raw).unwrap();
        assert_eq!(frame.id, 0x123);
        assert_eq!(frame.data, vec![0x01, 0x02]);
        assert_eq!(frame.extended, Some(false));
        assert!(!frame.rtr);
        assert_eq!(frame.dlc(), 2);
    }

    #[test]
    fn test_decode_ignores_padding() {
        let mut raw = [0xFFu8; 13];
        raw[0] = 0x81; // extended, DLC 1
        raw[1..5].copy_from_slice(&0x18FEF100u32.to_be_bytes());
        raw[5] = 0x42;

        let frame = WaveshareCodec::decode(&raw).unwrap();
        assert_eq!(frame.id, 0x18FEF100);
        assert_eq!(frame.data, vec![0x42]);
        assert!(frame.is_extended());
    }

    #[test]
    fn test_decode_rtr_flag() {
        let raw = [0x40, 0, 0, 0x01, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
        let frame = WaveshareCodec::decode(&raw).unwrap();
        assert!(frame.rtr);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_dlc() {
        let raw = [0x09, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            WaveshareCodec::decode(&raw),
            Err(IoError::InvalidDlc { dlc: 9 })
        );

        let raw = [0x8F, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            WaveshareCodec::decode(&raw),
            Err(IoError::InvalidDlc { dlc: 15 })
        );
    }

    #[test]
    fn test_decode_rejects_wrong_size() {
        assert_eq!(
            WaveshareCodec::decode(&[0u8; 12]),
            Err(IoError::InvalidFrameSize { len: 12 })
        );
        assert_eq!(
            WaveshareCodec::decode(&[0u8; 14]),
            Err(IoError::InvalidFrameSize { len: 14 })
        );
        assert_eq!(
            WaveshareCodec::decode(&[]),
            Err(IoError::InvalidFrameSize { len: 0 })
        );
    }

    #[test]
    fn test_roundtrip_all_flags_and_lengths() {
        let ids = [0u32, 0x123, 0x7FF, 0x800, 0x1FFF_FFFF, u32::MAX];
        for &id in &ids {
            for len in 0..=8usize {
                for extended in [None, Some(false), Some(true)] {
                    for rtr in [false, true] {
                        let original = CanFrame {
                            id,
                            data: (0..len as u8).map(|b| b.wrapping_mul(37)).collect(),
                            extended,
                            rtr,
                        };
                        let encoded = WaveshareCodec::encode(&original).unwrap();
                        let decoded = WaveshareCodec::decode(&encoded).unwrap();

                        assert_eq!(decoded.id, original.id);
                        assert_eq!(decoded.data, original.data);
                        assert_eq!(decoded.is_extended(), original.is_extended());
                        assert_eq!(decoded.rtr, original.rtr);
                        assert_eq!(decoded.dlc(), original.dlc());
                    }
                }
            }
        }
    }

    #[test]
    fn test_validate_id() {
        assert_eq!(validate_id(0), Ok(0));
        assert_eq!(validate_id(0x1FFF_FFFF), Ok(0x1FFF_FFFF));
        assert_eq!(validate_id(u32::MAX as i64), Ok(u32::MAX));
        assert_eq!(validate_id(-1), Err(IoError::InvalidId { id: -1 }));
        assert_eq!(
            validate_id(u32::MAX as i64 + 1),
            Err(IoError::InvalidId {
                id: u32::MAX as i64 + 1
            })
        );
    }
}
