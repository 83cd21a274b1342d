use std::collections::HashMap;
use std::sync::Arc;

use super::varint::{write_uvarint, ByteReader};
use crate::error::CodecResult;

/// De-duplicating registry built once per encode call.
///
/// Indexes are assigned in first-seen order.
#[derive(Debug, Default)]
pub(crate) struct StringTableBuilder {
    index: HashMap<Arc<str>, u32>,
    strings: Vec<Arc<str>>,
}

impl StringTableBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn intern(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        let shared: Arc<str> = Arc::from(s);
        self.index.insert(Arc::clone(&shared), i);
        self.strings.push(shared);
        i
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }

    /// Count, then each string as a varint length and UTF-8 bytes.
    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        write_uvarint(buf, self.strings.len() as u64);
        for s in &self.strings {
            write_uvarint(buf, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
    }
}

/// Decoded string table, shared by every lazy node of one tree.
#[derive(Debug, Default)]
pub(crate) struct StringTable {
    strings: Vec<Arc<str>>,
}

impl StringTable {
    pub(crate) fn read(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let count = r.read_usize()?;
        // each entry needs at least its length byte
        let mut strings = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let len = r.read_usize()?;
            let bytes = r.read_bytes(len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| r.malformed(format!("string table entry is not UTF-8: {e}")))?;
            strings.push(Arc::from(s));
        }
        Ok(Self { strings })
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Arc<str>> {
        self.strings.get(index)
    }

    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups_in_first_seen_order() {
        let mut b = StringTableBuilder::new();
        assert_eq!(b.intern("road"), 0);
        assert_eq!(b.intern("river"), 1);
        assert_eq!(b.intern("road"), 0);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn write_then_read() {
        let mut b = StringTableBuilder::new();
        for s in ["", "ünïcødé", "name", "name", "@attributes"] {
            b.intern(s);
        }
        let mut buf = Vec::new();
        b.write(&mut buf);
        // count + ("" -> 1) + ...
        assert_eq!(buf[0], 4);

        let mut r = ByteReader::new(&buf, 0);
        let table = StringTable::read(&mut r).unwrap();
        assert!(r.is_at_end());
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(0).map(|s| &**s), Some(""));
        assert_eq!(table.get(1).map(|s| &**s), Some("ünïcødé"));
        assert_eq!(table.get(3).map(|s| &**s), Some("@attributes"));
        assert!(table.get(4).is_none());
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let buf = [1u8, 2, 0xC3, 0x28];
        let mut r = ByteReader::new(&buf, 0);
        assert!(StringTable::read(&mut r).is_err());
    }
}
