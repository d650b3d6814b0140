/*!
# UMICP Frame

Data-plane unit: a fixed 20-byte little-endian header followed by the
payload. The wire layout is bit-exact:

| offset | size | field     |
|--------|------|-----------|
| 0      | 1    | version   |
| 1      | 1    | type      |
| 2      | 2    | flags     |
| 4      | 8    | stream_id |
| 12     | 4    | sequence  |
| 16     | 4    | length    |
*/

use crate::error::{Result, UmicpError};
use bitflags::bitflags;

/// Size of the serialized frame header in bytes
pub const FRAME_HEADER_SIZE: usize = 20;

/// Wire version of the frame layout
pub const FRAME_VERSION: u8 = 1;

bitflags! {
    /// Frame flag bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u16 {
        const COMPRESSED_GZIP     = 1 << 0;
        const COMPRESSED_BROTLI   = 1 << 1;
        const ENCRYPTED_XCHACHA20 = 1 << 2;
        const FRAGMENT_START      = 1 << 3;
        const FRAGMENT_CONTINUE   = 1 << 4;
        const FRAGMENT_END        = 1 << 5;
        const STREAM_START        = 1 << 6;
        const STREAM_END          = 1 << 7;
    }
}

impl FrameFlags {
    /// Flags marking the payload as compressed
    pub const COMPRESSION_MASK: FrameFlags = FrameFlags::COMPRESSED_GZIP
        .union(FrameFlags::COMPRESSED_BROTLI);

    /// Flags marking the payload as a fragment of a larger message
    pub const FRAGMENT_MASK: FrameFlags = FrameFlags::FRAGMENT_START
        .union(FrameFlags::FRAGMENT_CONTINUE)
        .union(FrameFlags::FRAGMENT_END);
}

/// Frame header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub version: u8,
    pub frame_type: u8,
    pub flags: FrameFlags,
    pub stream_id: u64,
    pub sequence: u32,
    pub length: u32,
}

/// Binary frame: header plus payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame builder for fluent construction
    pub fn builder() -> FrameBuilder {
        FrameBuilder::new()
    }

    /// Serialize to the wire layout. Fails with `INVALID_FRAME` when the
    /// header version is wrong, the length field disagrees with the payload,
    /// or more than one compression flag is set.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let mut buffer = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buffer.push(self.header.version);
        buffer.push(self.header.frame_type);
        buffer.extend_from_slice(&self.header.flags.bits().to_le_bytes());
        buffer.extend_from_slice(&self.header.stream_id.to_le_bytes());
        buffer.extend_from_slice(&self.header.sequence.to_le_bytes());
        buffer.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&self.payload);
        Ok(buffer)
    }

    /// Deserialize from the wire layout. The buffer must contain exactly
    /// `20 + length` bytes; short buffers and trailing bytes both fail with
    /// `INVALID_FRAME`.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(UmicpError::frame(format!(
                "Buffer of {} bytes is too small for the {}-byte header",
                data.len(),
                FRAME_HEADER_SIZE
            )));
        }

        let version = data[0];
        let frame_type = data[1];
        let flags_bits = u16::from_le_bytes([data[2], data[3]]);
        let stream_id = u64::from_le_bytes(data[4..12].try_into().expect("8-byte slice"));
        let sequence = u32::from_le_bytes(data[12..16].try_into().expect("4-byte slice"));
        let length = u32::from_le_bytes(data[16..20].try_into().expect("4-byte slice"));

        if version != FRAME_VERSION {
            return Err(UmicpError::frame(format!(
                "Unsupported frame version {}",
                version
            )));
        }

        let expected = FRAME_HEADER_SIZE + length as usize;
        if data.len() != expected {
            return Err(UmicpError::frame(format!(
                "Length field says {} payload bytes but buffer holds {}",
                length,
                data.len() - FRAME_HEADER_SIZE
            )));
        }

        let flags = FrameFlags::from_bits(flags_bits)
            .ok_or_else(|| UmicpError::frame(format!("Unknown flag bits {:#06x}", flags_bits)))?;

        Ok(Frame {
            header: FrameHeader {
                version,
                frame_type,
                flags,
                stream_id,
                sequence,
                length,
            },
            payload: data[FRAME_HEADER_SIZE..].to_vec(),
        })
    }

    /// Check a single flag
    pub fn has_flag(&self, flag: FrameFlags) -> bool {
        self.header.flags.contains(flag)
    }

    /// Whether any compression flag is set
    pub fn is_compressed(&self) -> bool {
        self.header.flags.intersects(FrameFlags::COMPRESSION_MASK)
    }

    /// Whether the payload is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.header.flags.contains(FrameFlags::ENCRYPTED_XCHACHA20)
    }

    /// Whether this frame is part of a fragmented message
    pub fn is_fragmented(&self) -> bool {
        self.header.flags.intersects(FrameFlags::FRAGMENT_MASK)
    }

    fn validate(&self) -> Result<()> {
        if self.header.version != FRAME_VERSION {
            return Err(UmicpError::frame(format!(
                "Unsupported frame version {}",
                self.header.version
            )));
        }
        if self.header.length as usize != self.payload.len() {
            return Err(UmicpError::frame(format!(
                "Header length {} does not match payload size {}",
                self.header.length,
                self.payload.len()
            )));
        }
        let compression = self.header.flags & FrameFlags::COMPRESSION_MASK;
        if compression.bits().count_ones() > 1 {
            return Err(UmicpError::frame(
                "At most one compression flag may be set",
            ));
        }
        Ok(())
    }
}

/// Consuming builder for [`Frame`]. The length field tracks the payload
/// automatically; validation happens at [`FrameBuilder::build`].
#[derive(Debug)]
pub struct FrameBuilder {
    frame_type: u8,
    flags: FrameFlags,
    stream_id: u64,
    sequence: u32,
    payload: Vec<u8>,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        FrameBuilder {
            frame_type: 0,
            flags: FrameFlags::empty(),
            stream_id: 0,
            sequence: 0,
            payload: Vec::new(),
        }
    }

    /// Application-defined frame type (0 = control, 1 = data)
    pub fn frame_type(mut self, frame_type: u8) -> Self {
        self.frame_type = frame_type;
        self
    }

    /// Stream this frame belongs to
    pub fn stream_id(mut self, stream_id: u64) -> Self {
        self.stream_id = stream_id;
        self
    }

    /// Sequence number within the stream
    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Replace the flag set
    pub fn flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Add flags to the set
    pub fn flag(mut self, flag: FrameFlags) -> Self {
        self.flags |= flag;
        self
    }

    /// Set the payload bytes
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Validate and produce the frame
    pub fn build(self) -> Result<Frame> {
        let frame = Frame {
            header: FrameHeader {
                version: FRAME_VERSION,
                frame_type: self.frame_type,
                flags: self.flags,
                stream_id: self.stream_id,
                sequence: self.sequence,
                length: self.payload.len() as u32,
            },
            payload: self.payload,
        };
        frame.validate()?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame::builder()
            .frame_type(1)
            .stream_id(12345)
            .sequence(1)
            .payload(vec![0x01, 0x02, 0x03, 0x04, 0x05])
            .build()
            .unwrap()
    }

    #[test]
    fn test_known_wire_encoding() {
        let bytes = sample_frame().serialize().unwrap();
        assert_eq!(bytes.len(), 25);
        assert_eq!(
            bytes,
            vec![
                0x01, 0x01, 0x00, 0x00, // version, type, flags
                0x39, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // stream_id = 12345 LE
                0x01, 0x00, 0x00, 0x00, // sequence = 1
                0x05, 0x00, 0x00, 0x00, // length = 5
                0x01, 0x02, 0x03, 0x04, 0x05, // payload
            ]
        );
    }

    #[test]
    fn test_round_trip() {
        let frame = sample_frame();
        let bytes = frame.serialize().unwrap();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE + frame.payload.len());
        let decoded = Frame::deserialize(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let frame = Frame::builder().stream_id(1).sequence(1).build().unwrap();
        let bytes = frame.serialize().unwrap();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);
        assert_eq!(Frame::deserialize(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_deserialize_rejects_short_buffer() {
        let err = Frame::deserialize(&[0u8; 19]).unwrap_err();
        assert!(matches!(err, UmicpError::InvalidFrame { .. }));
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut bytes = sample_frame().serialize().unwrap();
        bytes.push(0xFF);
        let err = Frame::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, UmicpError::InvalidFrame { .. }));
    }

    #[test]
    fn test_deserialize_rejects_truncated_payload() {
        let bytes = sample_frame().serialize().unwrap();
        let err = Frame::deserialize(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, UmicpError::InvalidFrame { .. }));
    }

    #[test]
    fn test_serialize_rejects_wrong_version() {
        let mut frame = sample_frame();
        frame.header.version = 2;
        assert!(matches!(
            frame.serialize().unwrap_err(),
            UmicpError::InvalidFrame { .. }
        ));
    }

    #[test]
    fn test_serialize_rejects_length_mismatch() {
        let mut frame = sample_frame();
        frame.header.length = 99;
        assert!(matches!(
            frame.serialize().unwrap_err(),
            UmicpError::InvalidFrame { .. }
        ));
    }

    #[test]
    fn test_serialize_rejects_double_compression() {
        let result = Frame::builder()
            .flag(FrameFlags::COMPRESSED_GZIP)
            .flag(FrameFlags::COMPRESSED_BROTLI)
            .build();
        assert!(matches!(
            result.unwrap_err(),
            UmicpError::InvalidFrame { .. }
        ));
    }

    #[test]
    fn test_flag_queries() {
        let frame = Frame::builder()
            .flag(FrameFlags::ENCRYPTED_XCHACHA20)
            .flag(FrameFlags::FRAGMENT_START)
            .payload(vec![1])
            .build()
            .unwrap();
        assert!(frame.is_encrypted());
        assert!(frame.is_fragmented());
        assert!(!frame.is_compressed());
        assert!(frame.has_flag(FrameFlags::FRAGMENT_START));
        assert!(!frame.has_flag(FrameFlags::FRAGMENT_END));
    }
}
