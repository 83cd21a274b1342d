//! Node set section: every tree node or every feature node of one tree.
//!
//! ```text
//! count        uvarint
//! flags        ceil(count / 2) bytes, one nibble per node (low nibble first)
//! ids          uvarint n, then n * 32 bytes of unique object/metadata ids
//! entries      per node: name idx, id idx, [metadata idx], [bounds], [extra offset]
//! extra        uvarint length, then the extra-data records
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use strata_types::{Envelope, ObjectId};

use super::extra::{write_extra, ExtraSection};
use super::precision::{bounds_kind, read_bounds, write_bounds, BOUNDS_BOX, BOUNDS_NONE, BOUNDS_POINT};
use super::strings::{StringTable, StringTableBuilder};
use super::varint::{write_uvarint, ByteReader};
use crate::error::{CodecError, CodecResult};
use crate::node::{LazyExtra, Node, NodeKind};

const FLAG_METADATA: u8 = 0b0001;
const FLAG_BOUNDS: u8 = 0b0010;
const FLAG_POINT: u8 = 0b0100;
const FLAG_EXTRA: u8 = 0b1000;

/// Append the node set for `nodes`, interning strings into `strings`.
pub(crate) fn write_node_set(
    buf: &mut Vec<u8>,
    strings: &mut StringTableBuilder,
    nodes: &[Node],
) -> CodecResult<()> {
    write_uvarint(buf, nodes.len() as u64);
    if nodes.is_empty() {
        return Ok(());
    }

    let mut flags = vec![0u8; nodes.len().div_ceil(2)];
    let mut ids: Vec<ObjectId> = Vec::new();
    let mut id_index: HashMap<ObjectId, u32> = HashMap::new();
    let mut intern_id = |id: ObjectId| {
        *id_index.entry(id).or_insert_with(|| {
            ids.push(id);
            (ids.len() - 1) as u32
        })
    };

    let mut entries = Vec::new();
    let mut extra = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let bounds = bounds_kind(node.bounds());
        let mut nibble = 0u8;
        write_uvarint(&mut entries, strings.intern(node.name()) as u64);
        write_uvarint(&mut entries, intern_id(node.object_id()) as u64);
        if let Some(md) = node.metadata_id() {
            nibble |= FLAG_METADATA;
            write_uvarint(&mut entries, intern_id(md) as u64);
        }
        if let Some(env) = node.bounds() {
            nibble |= FLAG_BOUNDS;
            if bounds == BOUNDS_POINT {
                nibble |= FLAG_POINT;
            }
            write_bounds(&mut entries, bounds, env);
        }
        let data = node.extra_data()?;
        if !data.is_empty() {
            nibble |= FLAG_EXTRA;
            write_uvarint(&mut entries, extra.len() as u64);
            write_extra(&mut extra, strings, data);
        }
        flags[i / 2] |= if i % 2 == 0 { nibble } else { nibble << 4 };
    }

    buf.extend_from_slice(&flags);
    write_uvarint(buf, ids.len() as u64);
    for id in &ids {
        buf.extend_from_slice(id.as_bytes());
    }
    buf.extend_from_slice(&entries);
    write_uvarint(buf, extra.len() as u64);
    buf.extend_from_slice(&extra);
    Ok(())
}

/// Read only the leading node count of a section.
pub(crate) fn peek_count(section: &[u8], origin: usize) -> CodecResult<usize> {
    ByteReader::new(section, origin).read_usize()
}

struct RawEntry {
    name: u32,
    id: u32,
    metadata: Option<u32>,
    bounds: Option<Envelope>,
    extra: Option<usize>,
}

/// A validated, still-encoded node set.
///
/// Parsing checks every index against the string and id tables, so
/// [`materialize`](Self::materialize) cannot fail. Extra data stays encoded
/// until a node's `extra_data` is first read.
pub(crate) struct NodeSetView {
    kind: NodeKind,
    entries: Vec<RawEntry>,
    ids: Vec<ObjectId>,
    strings: Arc<StringTable>,
    extra: Option<Arc<ExtraSection>>,
}

impl NodeSetView {
    pub(crate) fn parse(
        section: Bytes,
        origin: usize,
        kind: NodeKind,
        strings: Arc<StringTable>,
    ) -> CodecResult<Self> {
        let mut r = ByteReader::new(&section, origin);
        let count = r.read_usize()?;
        if count == 0 {
            if !r.is_at_end() {
                return Err(r.malformed("trailing bytes after empty node set"));
            }
            return Ok(Self {
                kind,
                entries: Vec::new(),
                ids: Vec::new(),
                strings,
                extra: None,
            });
        }

        let flags = r.read_bytes(count.div_ceil(2))?;
        let id_count = r.read_usize()?;
        let mut ids = Vec::with_capacity(id_count.min(count * 2));
        for _ in 0..id_count {
            ids.push(r.read_id()?);
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let nibble = (flags[i / 2] >> ((i % 2) * 4)) & 0x0F;
            let name = read_index(&mut r, strings.len(), "name")?;
            let id = read_index(&mut r, ids.len(), "object id")?;
            let metadata = if nibble & FLAG_METADATA != 0 {
                Some(read_index(&mut r, ids.len(), "metadata id")?)
            } else {
                None
            };
            let bounds_kind = match (nibble & FLAG_BOUNDS != 0, nibble & FLAG_POINT != 0) {
                (false, _) => BOUNDS_NONE,
                (true, true) => BOUNDS_POINT,
                (true, false) => BOUNDS_BOX,
            };
            let bounds = read_bounds(&mut r, bounds_kind)?;
            let extra = if nibble & FLAG_EXTRA != 0 {
                Some(r.read_usize()?)
            } else {
                None
            };
            entries.push(RawEntry {
                name,
                id,
                metadata,
                bounds,
                extra,
            });
        }

        let extra_len = r.read_usize()?;
        let extra_start = r.position();
        let extra_origin = r.offset();
        r.read_bytes(extra_len)?;
        if !r.is_at_end() {
            return Err(r.malformed("trailing bytes after node set"));
        }
        for e in &entries {
            if let Some(off) = e.extra {
                if off >= extra_len {
                    return Err(CodecError::OffsetOutOfRange {
                        section: "extra data",
                        offset: off,
                        min: 0,
                        max: extra_len.saturating_sub(1),
                    });
                }
            }
        }

        let extra = (extra_len > 0).then(|| {
            Arc::new(ExtraSection::new(
                section.slice(extra_start..extra_start + extra_len),
                extra_origin,
                Arc::clone(&strings),
            ))
        });

        Ok(Self {
            kind,
            entries,
            ids,
            strings,
            extra,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Build the nodes. Extra data is attached lazily.
    pub(crate) fn materialize(&self) -> Vec<Node> {
        self.entries
            .iter()
            .filter_map(|e| {
                // indexes were validated during parse
                let name = self.strings.get(e.name as usize)?;
                let object_id = *self.ids.get(e.id as usize)?;
                let metadata_id = e.metadata.and_then(|m| self.ids.get(m as usize).copied());
                let node = Node::new(self.kind, Arc::clone(name), object_id, metadata_id, e.bounds);
                Some(match (e.extra, &self.extra) {
                    (Some(offset), Some(section)) => {
                        node.with_lazy_extra(LazyExtra::new(Arc::clone(section), offset))
                    }
                    _ => node,
                })
            })
            .collect()
    }
}

fn read_index(r: &mut ByteReader<'_>, len: usize, what: &'static str) -> CodecResult<u32> {
    let offset = r.offset();
    let index = r.read_usize()?;
    if index >= len {
        return Err(CodecError::OffsetOutOfRange {
            section: what,
            offset: index,
            min: 0,
            max: len.saturating_sub(1),
        });
    }
    u32::try_from(index).map_err(|_| CodecError::Malformed {
        offset,
        reason: format!("{what} index {index} too large"),
    })
}
