//! Complete frame structure for the Cadence wire protocol
//!
//! Frame = Header + Rows

use cadence_core::{CadenceError, CadenceResult, Value};

use crate::{decode_row, encode_row, encoded_row_len, FrameFlags, FrameHeader};

/// Maximum frame size (largest UDP datagram payload over IPv4)
pub const MAX_FRAME_SIZE: usize = 65_507;

/// A batch of rows for one channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(header: FrameHeader) -> Self {
        Frame {
            header,
            rows: Vec::new(),
        }
    }

    #[inline]
    pub fn channel(&self) -> &str {
        &self.header.channel
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        self.header.encoded_len() + self.rows.iter().map(|r| encoded_row_len(r)).sum::<usize>()
    }

    /// Whether one more row would still fit in a datagram.
    pub fn fits(&self, row: &[Value]) -> bool {
        self.rows.len() < u16::MAX as usize && self.size() + encoded_row_len(row) <= MAX_FRAME_SIZE
    }

    pub fn parse(buf: &[u8]) -> CadenceResult<Self> {
        let (header, used) = FrameHeader::parse(buf)?;
        let mut cursor = &buf[used..];

        let mut rows = Vec::with_capacity(header.row_count as usize);
        for _ in 0..header.row_count {
            rows.push(decode_row(&mut cursor)?);
        }
        if !cursor.is_empty() {
            return Err(CadenceError::InvalidWireFormat(format!(
                "{} trailing bytes after {} rows",
                cursor.len(),
                header.row_count
            )));
        }

        Ok(Frame { header, rows })
    }

    pub fn serialize(&self) -> CadenceResult<Vec<u8>> {
        let total_size = self.size();
        if total_size > MAX_FRAME_SIZE {
            return Err(CadenceError::InvalidWireFormat(format!(
                "Frame too large: {} > {}",
                total_size, MAX_FRAME_SIZE
            )));
        }
        let row_count = u16::try_from(self.rows.len()).map_err(|_| {
            CadenceError::InvalidWireFormat(format!("Too many rows: {}", self.rows.len()))
        })?;

        let mut header = self.header.clone();
        header.row_count = row_count;

        let mut buf = Vec::with_capacity(total_size);
        header.serialize(&mut buf)?;
        for row in &self.rows {
            encode_row(&mut buf, row)?;
        }
        Ok(buf)
    }
}

/// Frame builder
pub struct FrameBuilder {
    header: FrameHeader,
    rows: Vec<Vec<Value>>,
}

impl FrameBuilder {
    pub fn new(channel: impl Into<String>) -> Self {
        FrameBuilder {
            header: FrameHeader::new(channel),
            rows: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: FrameFlags) -> Self {
        self.header.flags = flags;
        self
    }

    pub fn address_in_band(mut self, value: bool) -> Self {
        self.header.flags.set_address_in_band(value);
        self
    }

    pub fn row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn build(self) -> Frame {
        let mut header = self.header;
        header.row_count = self.rows.len().min(u16::MAX as usize) as u16;
        Frame {
            header,
            rows: self.rows,
        }
    }
}

/// Split rows for one channel into as many frames as needed.
///
/// A single row too large for any frame is rejected.
pub fn pack_rows(
    channel: &str,
    flags: FrameFlags,
    rows: impl IntoIterator<Item = Vec<Value>>,
) -> CadenceResult<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut current = FrameBuilder::new(channel).flags(flags).build();

    for row in rows {
        if !current.fits(&row) {
            if current.rows.is_empty() {
                return Err(CadenceError::InvalidWireFormat(format!(
                    "Row of {} bytes exceeds frame size",
                    encoded_row_len(&row)
                )));
            }
            let next = FrameBuilder::new(channel).flags(flags).build();
            frames.push(std::mem::replace(&mut current, next));
            if !current.fits(&row) {
                return Err(CadenceError::InvalidWireFormat(format!(
                    "Row of {} bytes exceeds frame size",
                    encoded_row_len(&row)
                )));
            }
        }
        current.rows.push(row);
        current.header.row_count = current.rows.len() as u16;
    }

    if !current.rows.is_empty() {
        frames.push(current);
    }
    Ok(frames)
}
