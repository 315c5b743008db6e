//! Frame header for the Cadence wire protocol
//!
//! Fixed part is 6 bytes, followed by the channel name:
//! - Byte 0: Version
//! - Byte 1: Flags
//! - Bytes 2-3: Channel name length (LE)
//! - Bytes 4-5: Row count (LE)
//! - Bytes 6..: Channel name (UTF-8)

use bytes::{Buf, BufMut};

use cadence_core::{CadenceError, CadenceResult};

use crate::FrameFlags;

/// Fixed header size in bytes
pub const FIXED_HEADER_SIZE: usize = 6;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Frame header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Wire protocol version
    pub version: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Destination channel name
    pub channel: String,
    /// Number of rows in the frame body
    pub row_count: u16,
}

impl FrameHeader {
    pub fn new(channel: impl Into<String>) -> Self {
        FrameHeader {
            version: WIRE_VERSION,
            flags: FrameFlags::NONE,
            channel: channel.into(),
            row_count: 0,
        }
    }

    /// Encoded size including the channel name
    #[inline]
    pub fn encoded_len(&self) -> usize {
        FIXED_HEADER_SIZE + self.channel.len()
    }

    /// Parse a header, returning it with the number of bytes consumed.
    pub fn parse(buf: &[u8]) -> CadenceResult<(Self, usize)> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(CadenceError::BufferTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut cursor = buf;
        let version = cursor.get_u8();
        if version != WIRE_VERSION {
            return Err(CadenceError::InvalidWireFormat(format!(
                "Unsupported version {}",
                version
            )));
        }

        let flags = FrameFlags::new(cursor.get_u8());
        if !flags.is_valid() {
            return Err(CadenceError::InvalidWireFormat(format!(
                "Reserved flag bits set: {:#010b}",
                flags.0
            )));
        }

        let name_len = cursor.get_u16_le() as usize;
        let row_count = cursor.get_u16_le();

        if cursor.remaining() < name_len {
            return Err(CadenceError::BufferTooShort {
                expected: FIXED_HEADER_SIZE + name_len,
                actual: buf.len(),
            });
        }
        let channel = std::str::from_utf8(&cursor[..name_len])
            .map_err(|_| CadenceError::InvalidWireFormat("Channel name is not UTF-8".into()))?
            .to_string();

        Ok((
            FrameHeader {
                version,
                flags,
                channel,
                row_count,
            },
            FIXED_HEADER_SIZE + name_len,
        ))
    }

    /// Append the encoded header to `buf`.
    pub fn serialize(&self, buf: &mut Vec<u8>) -> CadenceResult<()> {
        let name_len = u16::try_from(self.channel.len()).map_err(|_| {
            CadenceError::InvalidWireFormat(format!(
                "Channel name too long: {} bytes",
                self.channel.len()
            ))
        })?;

        buf.put_u8(self.version);
        buf.put_u8(self.flags.0);
        buf.put_u16_le(name_len);
        buf.put_u16_le(self.row_count);
        buf.put_slice(self.channel.as_bytes());
        Ok(())
    }
}
