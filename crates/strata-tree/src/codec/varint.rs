use strata_types::ObjectId;

use crate::error::{CodecError, CodecResult};

/// Append `value` as an unsigned LEB128 varint.
pub(crate) fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Append a signed value, zig-zag mapped so small magnitudes stay short.
pub(crate) fn write_svarint(buf: &mut Vec<u8>, value: i64) {
    write_uvarint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

pub(crate) fn write_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_bits().to_be_bytes());
}

/// Cursor over a slice of an encoded record.
///
/// `origin` is the absolute position of `data[0]` in the whole stream and
/// only serves error reporting.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    origin: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], origin: usize) -> Self {
        Self {
            data,
            pos: 0,
            origin,
        }
    }

    /// Absolute offset of the next byte.
    pub(crate) fn offset(&self) -> usize {
        self.origin + self.pos
    }

    /// Offset of the next byte relative to the start of the slice.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn truncated(&self, reason: &str) -> CodecError {
        CodecError::Truncated {
            offset: self.offset(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(&self, reason: impl Into<String>) -> CodecError {
        CodecError::Malformed {
            offset: self.offset(),
            reason: reason.into(),
        }
    }

    pub(crate) fn read_u8(&mut self) -> CodecResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.truncated("expected one more byte"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.truncated(&format!("expected {len} bytes")))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn read_uvarint(&mut self) -> CodecResult<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(self.malformed("varint overflow"));
            }
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// A varint used as a count, index or length.
    pub(crate) fn read_usize(&mut self) -> CodecResult<usize> {
        let value = self.read_uvarint()?;
        usize::try_from(value).map_err(|_| self.malformed(format!("value {value} too large")))
    }

    pub(crate) fn read_svarint(&mut self) -> CodecResult<i64> {
        let raw = self.read_uvarint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub(crate) fn read_f64(&mut self) -> CodecResult<f64> {
        let bytes = self.read_bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(f64::from_bits(u64::from_be_bytes(arr)))
    }

    pub(crate) fn read_id(&mut self) -> CodecResult<ObjectId> {
        let bytes = self.read_bytes(ObjectId::LEN)?;
        ObjectId::from_slice(bytes).map_err(|e| self.malformed(e.to_string()))
    }
}
