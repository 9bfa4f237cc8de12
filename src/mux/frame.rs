//! Frame encoding/decoding for the tunnel protocol
//!
//! Frame format:
//! ```text
//! +--------+--------+--------+--------+--------+
//! |  Type  |   Link ID (2B)  |   Length (2B)   |
//! +--------+--------+--------+--------+--------+
//! |                  Payload                   |
//! +--------------------------------------------+
//! ```
//!
//! Only `Data` frames carry a payload. Link id 0 never appears on data
//! frames; it is the reserved "no link" value.

use super::MuxError;
use bytes::{BufMut, Bytes, BytesMut};

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 5;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Link payload bytes
    Data = 0x00,
    /// Announce a new link to the remote demultiplexer
    LinkCreate = 0x01,
    /// Close a link
    LinkClose = 0x02,
    /// Tunnel keepalive
    Heartbeat = 0x03,
}

impl TryFrom<u8> for FrameType {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameType::Data),
            0x01 => Ok(FrameType::LinkCreate),
            0x02 => Ok(FrameType::LinkClose),
            0x03 => Ok(FrameType::Heartbeat),
            _ => Err(MuxError::InvalidFrame(format!(
                "Unknown frame type: {}",
                value
            ))),
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub link_id: u16,
    pub len: u16,
}

impl FrameHeader {
    /// Parse a header from its wire bytes
    pub fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, MuxError> {
        Ok(Self {
            frame_type: FrameType::try_from(buf[0])?,
            link_id: u16::from_be_bytes([buf[1], buf[2]]),
            len: u16::from_be_bytes([buf[3], buf[4]]),
        })
    }
}

/// A protocol frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Link ID (0 for tunnel-level frames)
    pub link_id: u16,
    /// Payload data
    pub payload: Bytes,
}

impl Frame {
    /// Create a data frame; the payload must fit the 16-bit length field
    pub fn data(link_id: u16, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        Self {
            frame_type: FrameType::Data,
            link_id,
            payload,
        }
    }

    /// Create a link create frame
    pub fn link_create(link_id: u16) -> Self {
        Self {
            frame_type: FrameType::LinkCreate,
            link_id,
            payload: Bytes::new(),
        }
    }

    /// Create a link close frame
    pub fn link_close(link_id: u16) -> Self {
        Self {
            frame_type: FrameType::LinkClose,
            link_id,
            payload: Bytes::new(),
        }
    }

    /// Create a keepalive frame
    pub fn heartbeat() -> Self {
        Self {
            frame_type: FrameType::Heartbeat,
            link_id: 0,
            payload: Bytes::new(),
        }
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.frame_type as u8);
        buf.put_u16(self.link_id);
        buf.put_u16(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}
