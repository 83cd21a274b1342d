//! Encoding of node `extra_data` maps.
//!
//! Keys and string values go through the tree's string table; everything
//! else is written inline. Each record is self-delimiting, so a node only
//! stores the relative offset of its record within the section.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use strata_types::{Coord, Envelope, FieldType, Geometry, Value};

use super::strings::{StringTable, StringTableBuilder};
use super::varint::{write_f64, write_svarint, write_uvarint, ByteReader};
use crate::error::CodecResult;
use crate::node::ExtraData;

// Nested maps deeper than this are rejected on decode.
const MAX_NESTING: usize = 32;

const GEOM_POINT: u8 = 0;
const GEOM_MULTIPOINT: u8 = 1;
const GEOM_LINESTRING: u8 = 2;
const GEOM_POLYGON: u8 = 3;

pub(crate) fn write_extra(buf: &mut Vec<u8>, strings: &mut StringTableBuilder, map: &ExtraData) {
    write_uvarint(buf, map.len() as u64);
    for (key, value) in map {
        write_uvarint(buf, strings.intern(key) as u64);
        write_value(buf, strings, value);
    }
}

fn write_value(buf: &mut Vec<u8>, strings: &mut StringTableBuilder, value: &Value) {
    buf.push(value.field_type().tag());
    match value {
        Value::Null => {}
        Value::Bool(b) => buf.push(*b as u8),
        Value::Int(i) => write_svarint(buf, *i),
        Value::Double(d) => write_f64(buf, *d),
        Value::String(s) => write_uvarint(buf, strings.intern(s) as u64),
        Value::Map(m) => write_extra(buf, strings, m),
        Value::Geometry(g) => write_geometry(buf, g),
        Value::Envelope(e) => {
            for v in [e.min_x, e.max_x, e.min_y, e.max_y] {
                write_f64(buf, v);
            }
        }
        Value::Opaque { tag, bytes } => {
            buf.push(*tag);
            write_uvarint(buf, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
    }
}

fn write_coords(buf: &mut Vec<u8>, coords: &[Coord]) {
    write_uvarint(buf, coords.len() as u64);
    for c in coords {
        write_f64(buf, c.x);
        write_f64(buf, c.y);
    }
}

fn write_geometry(buf: &mut Vec<u8>, geom: &Geometry) {
    match geom {
        Geometry::Point(c) => {
            buf.push(GEOM_POINT);
            write_f64(buf, c.x);
            write_f64(buf, c.y);
        }
        Geometry::MultiPoint(cs) => {
            buf.push(GEOM_MULTIPOINT);
            write_coords(buf, cs);
        }
        Geometry::LineString(cs) => {
            buf.push(GEOM_LINESTRING);
            write_coords(buf, cs);
        }
        Geometry::Polygon { exterior, holes } => {
            buf.push(GEOM_POLYGON);
            write_coords(buf, exterior);
            write_uvarint(buf, holes.len() as u64);
            for h in holes {
                write_coords(buf, h);
            }
        }
    }
}

/// The extra-data section of one node set, kept encoded.
pub(crate) struct ExtraSection {
    data: Bytes,
    origin: usize,
    strings: Arc<StringTable>,
}

impl ExtraSection {
    pub(crate) fn new(data: Bytes, origin: usize, strings: Arc<StringTable>) -> Self {
        Self {
            data,
            origin,
            strings,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Decode the record starting at `offset` within the section.
    pub(crate) fn decode_at(&self, offset: usize) -> CodecResult<ExtraData> {
        let tail = self.data.get(offset..).unwrap_or_default();
        let mut r = ByteReader::new(tail, self.origin + offset);
        self.read_map(&mut r, 0)
    }

    fn read_map(&self, r: &mut ByteReader<'_>, depth: usize) -> CodecResult<ExtraData> {
        if depth > MAX_NESTING {
            return Err(r.malformed("extra data nested too deeply"));
        }
        let count = r.read_usize()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.string(r)?;
            let value = self.read_value(r, depth)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn string(&self, r: &mut ByteReader<'_>) -> CodecResult<String> {
        let index = r.read_usize()?;
        self.strings
            .get(index)
            .map(|s| s.to_string())
            .ok_or_else(|| r.malformed(format!("string index {index} out of range")))
    }

    fn read_value(&self, r: &mut ByteReader<'_>, depth: usize) -> CodecResult<Value> {
        let tag = r.read_u8()?;
        let ft = FieldType::from_tag(tag).map_err(|e| r.malformed(e.to_string()))?;
        Ok(match ft {
            FieldType::Null => Value::Null,
            FieldType::Bool => Value::Bool(r.read_u8()? != 0),
            FieldType::Int => Value::Int(r.read_svarint()?),
            FieldType::Double => Value::Double(r.read_f64()?),
            FieldType::String => Value::String(self.string(r)?),
            FieldType::Map => Value::Map(self.read_map(r, depth + 1)?),
            FieldType::Geometry => Value::Geometry(read_geometry(r)?),
            FieldType::Envelope => Value::Envelope(Envelope {
                min_x: r.read_f64()?,
                max_x: r.read_f64()?,
                min_y: r.read_f64()?,
                max_y: r.read_f64()?,
            }),
            FieldType::Opaque => {
                let tag = r.read_u8()?;
                let len = r.read_usize()?;
                Value::Opaque {
                    tag,
                    bytes: r.read_bytes(len)?.to_vec(),
                }
            }
        })
    }
}

fn read_coord(r: &mut ByteReader<'_>) -> CodecResult<Coord> {
    Ok(Coord::new(r.read_f64()?, r.read_f64()?))
}

fn read_coords(r: &mut ByteReader<'_>) -> CodecResult<Vec<Coord>> {
    let count = r.read_usize()?;
    let mut coords = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        coords.push(read_coord(r)?);
    }
    Ok(coords)
}

fn read_geometry(r: &mut ByteReader<'_>) -> CodecResult<Geometry> {
    Ok(match r.read_u8()? {
        GEOM_POINT => Geometry::Point(read_coord(r)?),
        GEOM_MULTIPOINT => Geometry::MultiPoint(read_coords(r)?),
        GEOM_LINESTRING => Geometry::LineString(read_coords(r)?),
        GEOM_POLYGON => {
            let exterior = read_coords(r)?;
            let count = r.read_usize()?;
            let mut holes = Vec::with_capacity(count.min(1 << 10));
            for _ in 0..count {
                holes.push(read_coords(r)?);
            }
            Geometry::Polygon { exterior, holes }
        }
        other => return Err(r.malformed(format!("unknown geometry kind {other}"))),
    })
}
