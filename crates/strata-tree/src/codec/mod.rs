//! Binary tree format.
//!
//! ```text
//! header     "STRT", version u8, size uvarint, num_trees uvarint
//! trees      node set (tree children)
//! features   node set (feature children)
//! buckets    uvarint count, then index uvarint, id [32], bounds kind u8, bounds
//! strings    string table
//! trailer    5 x u32 BE: trees, features, buckets, strings, end-of-record
//! ```
//!
//! All trailer offsets are absolute. The trailer always occupies the last
//! [`TRAILER_LEN`] bytes and its end-of-record offset is where it starts.

pub(crate) mod extra;
pub(crate) mod nodeset;
pub mod precision;
pub(crate) mod strings;
pub(crate) mod varint;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use strata_types::ObjectId;

use crate::bucket::Bucket;
use crate::error::{CodecError, CodecResult};
use crate::node::NodeKind;
use crate::tree::{NodeList, RevTree, TreeBody};
use nodeset::{peek_count, write_node_set, NodeSetView};
use precision::{bounds_kind, read_bounds, write_bounds};
use strings::{StringTable, StringTableBuilder};
use varint::{write_uvarint, ByteReader};

pub const MAGIC: &[u8; 4] = b"STRT";
pub const FORMAT_VERSION: u8 = 1;
pub const TRAILER_LEN: usize = 5 * 4;

// magic, version, and one byte each for size and num_trees
const MIN_HEADER_LEN: usize = 4 + 1 + 2;

/// Section offsets stored at the end of every record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trailer {
    pub trees: u32,
    pub features: u32,
    pub buckets: u32,
    pub strings: u32,
    pub end: u32,
}

impl Trailer {
    fn write(&self, buf: &mut Vec<u8>) {
        for v in [self.trees, self.features, self.buckets, self.strings, self.end] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// Read the trailer from the tail of `data`.
    pub fn read(data: &[u8]) -> CodecResult<Self> {
        if data.len() < TRAILER_LEN {
            return Err(CodecError::Truncated {
                offset: data.len(),
                reason: "record shorter than its trailer".into(),
            });
        }
        let start = data.len() - TRAILER_LEN;
        let mut fields = [0u32; 5];
        for (i, field) in fields.iter_mut().enumerate() {
            let at = start + i * 4;
            let mut word = [0u8; 4];
            word.copy_from_slice(&data[at..at + 4]);
            *field = u32::from_be_bytes(word);
        }
        Ok(Self {
            trees: fields[0],
            features: fields[1],
            buckets: fields[2],
            strings: fields[3],
            end: fields[4],
        })
    }

    /// Offsets must be ordered and end exactly where the trailer starts.
    fn validate(&self, header_end: usize, len: usize) -> CodecResult<()> {
        let trailer_start = len - TRAILER_LEN;
        if self.end as usize != trailer_start {
            return Err(CodecError::OffsetOutOfRange {
                section: "end-of-record",
                offset: self.end as usize,
                min: trailer_start,
                max: trailer_start,
            });
        }
        let ordered = [
            ("trees", self.trees),
            ("features", self.features),
            ("buckets", self.buckets),
            ("strings", self.strings),
        ];
        let mut min = header_end;
        for (section, offset) in ordered {
            let offset = offset as usize;
            if offset < min || offset > trailer_start {
                return Err(CodecError::OffsetOutOfRange {
                    section,
                    offset,
                    min,
                    max: trailer_start,
                });
            }
            min = offset;
        }
        Ok(())
    }
}

/// Encode a tree revision.
///
/// Deterministic: the same logical tree always produces the same bytes.
/// Fails only if a lazily decoded node carries corrupt extra data.
pub fn encode_tree(tree: &RevTree) -> CodecResult<Bytes> {
    let mut buf = Vec::with_capacity(64 + tree.node_count() * 48);
    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    write_uvarint(&mut buf, tree.size());
    write_uvarint(&mut buf, tree.num_trees() as u64);

    let mut strings = StringTableBuilder::new();
    let trees = offset32(buf.len())?;
    write_node_set(&mut buf, &mut strings, tree.trees())?;
    let features = offset32(buf.len())?;
    write_node_set(&mut buf, &mut strings, tree.features())?;
    let buckets = offset32(buf.len())?;
    write_buckets(&mut buf, tree.buckets());
    let string_table = offset32(buf.len())?;
    strings.write(&mut buf);
    let end = offset32(buf.len())?;

    Trailer {
        trees,
        features,
        buckets,
        strings: string_table,
        end,
    }
    .write(&mut buf);
    Ok(Bytes::from(buf))
}

fn offset32(offset: usize) -> CodecResult<u32> {
    u32::try_from(offset).map_err(|_| CodecError::Malformed {
        offset,
        reason: "record exceeds 4 GiB".into(),
    })
}

fn write_buckets(buf: &mut Vec<u8>, buckets: &BTreeMap<u32, Bucket>) {
    write_uvarint(buf, buckets.len() as u64);
    for (index, bucket) in buckets {
        write_uvarint(buf, *index as u64);
        buf.extend_from_slice(bucket.object_id.as_bytes());
        let kind = bounds_kind(bucket.bounds.as_ref());
        buf.push(kind);
        if let Some(env) = &bucket.bounds {
            write_bounds(buf, kind, env);
        }
    }
}

fn read_buckets(section: &[u8], origin: usize) -> CodecResult<BTreeMap<u32, Bucket>> {
    let mut r = ByteReader::new(section, origin);
    let count = r.read_usize()?;
    let mut buckets = BTreeMap::new();
    for _ in 0..count {
        let raw = r.read_uvarint()?;
        let index = u32::try_from(raw).map_err(|_| r.malformed(format!("bucket index {raw}")))?;
        let object_id = r.read_id()?;
        let kind = r.read_u8()?;
        let bounds = read_bounds(&mut r, kind)?;
        if buckets
            .insert(index, Bucket::new(index, object_id, bounds))
            .is_some()
        {
            return Err(r.malformed(format!("duplicate bucket index {index}")));
        }
    }
    if !r.is_at_end() {
        return Err(r.malformed("trailing bytes after buckets"));
    }
    Ok(buckets)
}

/// Decode a tree revision stored under `id`.
///
/// Only the header, trailer, string table and node indexes are parsed up
/// front; node lists are built on first access and extra data on first
/// read of each node. An empty tree decodes to the shared
/// [`RevTree::empty`] instance without touching any section.
pub fn decode_tree(id: ObjectId, data: Bytes) -> CodecResult<RevTree> {
    if data.len() < MIN_HEADER_LEN + TRAILER_LEN {
        return Err(CodecError::Truncated {
            offset: data.len(),
            reason: format!("need at least {} bytes", MIN_HEADER_LEN + TRAILER_LEN),
        });
    }
    if &data[..4] != MAGIC {
        return Err(CodecError::InvalidMagic(data[..4].to_vec()));
    }
    if data[4] != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(data[4]));
    }
    let len = data.len();
    let body_end = len - TRAILER_LEN;
    let mut header = ByteReader::new(&data[5..body_end], 5);
    let size = header.read_uvarint()?;
    let num_trees = u32::try_from(header.read_uvarint()?)
        .map_err(|_| header.malformed("num_trees exceeds u32"))?;
    let header_end = header.offset();

    let trailer = Trailer::read(&data)?;
    trailer.validate(header_end, len)?;
    let (t, f, b, s) = (
        trailer.trees as usize,
        trailer.features as usize,
        trailer.buckets as usize,
        trailer.strings as usize,
    );

    let tree_count = peek_count(&data[t..f], t)?;
    let feature_count = peek_count(&data[f..b], f)?;
    let bucket_count = peek_count(&data[b..s], b)?;
    if size == 0 && num_trees == 0 && tree_count == 0 && feature_count == 0 && bucket_count == 0 {
        return Ok(RevTree::empty());
    }

    let body = if bucket_count > 0 {
        if tree_count > 0 || feature_count > 0 {
            return Err(CodecError::Malformed {
                offset: b,
                reason: "tree has both nodes and buckets".into(),
            });
        }
        TreeBody::Buckets(read_buckets(&data[b..s], b)?)
    } else {
        let mut r = ByteReader::new(&data[s..body_end], s);
        let strings = Arc::new(StringTable::read(&mut r)?);
        if !r.is_at_end() {
            return Err(r.malformed("trailing bytes after string table"));
        }
        let trees = NodeSetView::parse(data.slice(t..f), t, NodeKind::Tree, Arc::clone(&strings))?;
        let features = NodeSetView::parse(data.slice(f..b), f, NodeKind::Feature, strings)?;
        TreeBody::Leaf {
            trees: NodeList::encoded(trees),
            features: NodeList::encoded(features),
        }
    };
    Ok(RevTree::from_parts(id, size, num_trees, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ExtraData, Node};
    use super::precision::ENVELOPE_TOLERANCE;
    use strata_types::{Coord, Envelope, Geometry, Value};

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_hash([b; 32])
    }

    fn roundtrip(tree: &RevTree) -> RevTree {
        let bytes = encode_tree(tree).unwrap();
        decode_tree(tree.id(), bytes).unwrap()
    }

    fn assert_same_nodes(a: &[Node], b: &[Node]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_eq!(x, y);
            match (x.bounds(), y.bounds()) {
                (Some(ex), Some(ey)) => assert!(ex.approx_eq(ey, ENVELOPE_TOLERANCE)),
                (None, None) => {}
                other => panic!("bounds mismatch for {}: {other:?}", x.name()),
            }
        }
    }

    fn extra_for(i: usize) -> ExtraData {
        let mut nested = BTreeMap::new();
        nested.insert("id".to_string(), Value::Int(i as i64));
        nested.insert("class".to_string(), Value::from(format!("class-{}", i % 5)));
        let mut extra = ExtraData::new();
        extra.insert("@attributes".into(), Value::Map(nested));
        extra.insert(
            "geometry".into(),
            Value::from(Geometry::LineString(vec![
                Coord::new(i as f64 * 0.01, 1.0),
                Coord::new(i as f64 * 0.01 + 0.5, 1.25),
            ])),
        );
        extra
    }

    /// 1024 features: 512 sharing three metadata ids, 512 with unique ones.
    fn scenario_tree() -> RevTree {
        let shared = [oid(200), oid(201), oid(202)];
        let features: Vec<Node> = (0..1024)
            .map(|i| {
                let md = if i < 512 {
                    shared[i % 3]
                } else {
                    ObjectId::from_bytes(format!("md-{i}").as_bytes())
                };
                let x = (i as f64) * 0.123_456_7 - 60.0;
                Node::feature(
                    format!("feature.{i:04}"),
                    ObjectId::from_bytes(format!("f-{i}").as_bytes()),
                    Some(Envelope::new(x, x + 0.5, -10.0, 10.0).unwrap()),
                )
                .with_metadata_id(Some(md))
                .with_extra_data(extra_for(i))
            })
            .collect();
        RevTree::leaf(1024, 0, vec![], features).unwrap()
    }

    #[test]
    fn empty_tree_decodes_to_the_shared_constant() {
        let empty = RevTree::empty();
        let bytes = encode_tree(&empty).unwrap();
        let decoded = decode_tree(empty.id(), bytes).unwrap();
        assert!(RevTree::ptr_eq(&decoded, &empty));
    }

    #[test]
    fn encoding_is_deterministic() {
        let tree = scenario_tree();
        assert_eq!(encode_tree(&tree).unwrap(), encode_tree(&tree).unwrap());
    }

    #[test]
    fn scenario_roundtrip_preserves_content_and_hash() {
        let tree = scenario_tree();
        let decoded = roundtrip(&tree);
        assert_eq!(decoded.size(), 1024);
        assert_same_nodes(tree.features(), decoded.features());
        assert_eq!(decoded.compute_id().unwrap(), tree.id());

        // re-encoding the decoded tree yields the same logical content again
        let again = roundtrip(&decoded);
        assert_eq!(again.compute_id().unwrap(), tree.id());
        assert_same_nodes(tree.features(), again.features());
    }

    #[test]
    fn object_and_metadata_ids_are_deduplicated() {
        let bytes = encode_tree(&scenario_tree()).unwrap();
        let trailer = Trailer::read(&bytes).unwrap();
        let f = trailer.features as usize;
        let mut r = ByteReader::new(&bytes[f..trailer.buckets as usize], f);
        assert_eq!(r.read_usize().unwrap(), 1024);
        r.read_bytes(512).unwrap();
        // 1024 object ids, 3 shared metadata ids and 512 unique ones
        assert_eq!(r.read_usize().unwrap(), 1024 + 3 + 512);
    }

    #[test]
    fn mixed_tree_and_feature_children_roundtrip() {
        let trees = vec![
            Node::tree("layers/roads", oid(1), Some(Envelope::new(0.0, 1.0, 0.0, 1.0).unwrap()))
                .with_metadata_id(Some(oid(9))),
            Node::tree("layers/rivers", oid(2), None),
        ];
        let features = vec![Node::feature("readme", oid(3), None)];
        let tree = RevTree::leaf(120, 2, trees, features).unwrap();
        let decoded = roundtrip(&tree);
        assert_eq!(decoded.num_trees(), 2);
        assert_same_nodes(tree.trees(), decoded.trees());
        assert_same_nodes(tree.features(), decoded.features());
        assert!(decoded.trees().iter().all(Node::is_tree));
        assert_eq!(decoded.compute_id().unwrap(), tree.id());
    }

    #[test]
    fn bucket_tree_roundtrip() {
        let mut buckets = BTreeMap::new();
        buckets.insert(0, Bucket::new(0, oid(1), Some(Envelope::new(-1.0, 0.0, -1.0, 0.0).unwrap())));
        buckets.insert(3, Bucket::new(3, oid(2), Some(Envelope::point(5.0, 5.0))));
        buckets.insert(31, Bucket::new(31, oid(3), None));
        let tree = RevTree::bucketed(5000, 0, buckets);
        let decoded = roundtrip(&tree);
        assert!(!decoded.is_leaf());
        assert_eq!(decoded.buckets().len(), 3);
        assert_eq!(decoded.buckets()[&31].bounds, None);
        assert!(decoded.buckets()[&3].bounds.unwrap().is_point());
        assert_eq!(decoded.compute_id().unwrap(), tree.id());
    }

    #[test]
    fn extra_data_is_decoded_lazily_and_cached() {
        let tree = scenario_tree();
        let decoded = roundtrip(&tree);
        let node = &decoded.features()[7];
        assert!(node.has_extra_data());
        assert!(format!("{node:?}").contains("lazy"));
        let first = node.extra_data().unwrap() as *const ExtraData;
        let second = node.extra_data().unwrap() as *const ExtraData;
        assert_eq!(first, second);
        assert!(format!("{node:?}").contains("decoded"));
        assert_eq!(node.extra_data().unwrap(), &extra_for(7));
    }

    #[test]
    fn trailer_points_at_sections() {
        let tree = scenario_tree();
        let bytes = encode_tree(&tree).unwrap();
        let trailer = Trailer::read(&bytes).unwrap();
        assert_eq!(trailer.end as usize, bytes.len() - TRAILER_LEN);
        assert!(trailer.trees < trailer.features);
        assert!(trailer.features < trailer.buckets);
        assert!(trailer.buckets < trailer.strings);
        // string table count comes first: every distinct name, key and value
        let mut r = ByteReader::new(&bytes[trailer.strings as usize..trailer.end as usize], 0);
        let table = StringTable::read(&mut r).unwrap();
        assert_eq!(table.get(0).map(|s| &**s), Some("feature.0000"));
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let bytes = encode_tree(&scenario_tree()).unwrap();
        for cut in [0, 10, bytes.len() / 2, bytes.len() - 1] {
            let err = decode_tree(oid(1), bytes.slice(..cut)).unwrap_err();
            assert!(
                matches!(
                    err,
                    CodecError::Truncated { .. }
                        | CodecError::OffsetOutOfRange { .. }
                        | CodecError::Malformed { .. }
                ),
                "cut at {cut}: {err:?}"
            );
        }
    }

    #[test]
    fn out_of_range_trailer_offsets_are_rejected() {
        let bytes = encode_tree(&scenario_tree()).unwrap();
        let mut corrupt = bytes.to_vec();
        let at = corrupt.len() - TRAILER_LEN + 4; // features offset
        corrupt[at..at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = decode_tree(oid(1), Bytes::from(corrupt)).unwrap_err();
        assert!(matches!(err, CodecError::OffsetOutOfRange { section: "features", .. }));

        let mut corrupt = bytes.to_vec();
        let at = corrupt.len() - 4; // end-of-record
        corrupt[at..].copy_from_slice(&1u32.to_be_bytes());
        let err = decode_tree(oid(1), Bytes::from(corrupt)).unwrap_err();
        assert!(matches!(err, CodecError::OffsetOutOfRange { section: "end-of-record", .. }));
    }

    #[test]
    fn bad_magic_and_version() {
        let bytes = encode_tree(&scenario_tree()).unwrap();
        let mut wrong = bytes.to_vec();
        wrong[0] = b'X';
        assert!(matches!(
            decode_tree(oid(1), Bytes::from(wrong)),
            Err(CodecError::InvalidMagic(_))
        ));
        let mut wrong = bytes.to_vec();
        wrong[4] = 99;
        assert!(matches!(
            decode_tree(oid(1), Bytes::from(wrong)),
            Err(CodecError::UnsupportedVersion(99))
        ));
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_leaf_roundtrips(
            entries in proptest::collection::btree_map(
                "[a-z]{1,8}",
                (-180.0f64..180.0, -90.0f64..90.0, proptest::option::of(-1000i64..1000)),
                0..40,
            )
        ) {
            let features: Vec<Node> = entries
                .iter()
                .map(|(name, (x, y, attr))| {
                    let mut extra = ExtraData::new();
                    if let Some(v) = attr {
                        extra.insert("v".into(), Value::Int(*v));
                    }
                    Node::feature(name.as_str(), ObjectId::from_bytes(name.as_bytes()), Some(Envelope::point(*x, *y)))
                        .with_extra_data(extra)
                })
                .collect();
            let tree = RevTree::leaf(features.len() as u64, 0, vec![], features).unwrap();
            let decoded = roundtrip(&tree);
            proptest::prop_assert_eq!(decoded.compute_id().unwrap(), tree.id());
            proptest::prop_assert_eq!(decoded.features().len(), tree.features().len());
        }
    }
}
