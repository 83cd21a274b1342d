use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::TypeError;
use crate::geometry::Geometry;
use crate::hasher::Funnel;

/// Type tag of a [`Value`]. The discriminants are part of the binary formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FieldType {
    Null = 0,
    Bool = 1,
    Int = 2,
    Double = 3,
    String = 4,
    Map = 5,
    Geometry = 6,
    Envelope = 7,
    Opaque = 0xFF,
}

impl FieldType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, TypeError> {
        Ok(match tag {
            0 => Self::Null,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Double,
            4 => Self::String,
            5 => Self::Map,
            6 => Self::Geometry,
            7 => Self::Envelope,
            0xFF => Self::Opaque,
            other => return Err(TypeError::UnknownFieldType(other)),
        })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "double",
            Self::String => "string",
            Self::Map => "map",
            Self::Geometry => "geometry",
            Self::Envelope => "envelope",
            Self::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

/// A typed attribute value.
///
/// Used both for feature attributes and for the open `extra_data` mapping of
/// tree nodes. `Opaque` preserves values written by newer encoders whose tag
/// this version does not understand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Map(BTreeMap<String, Value>),
    Geometry(Geometry),
    Envelope(Envelope),
    Opaque { tag: u8, bytes: Vec<u8> },
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Bool,
            Value::Int(_) => FieldType::Int,
            Value::Double(_) => FieldType::Double,
            Value::String(_) => FieldType::String,
            Value::Map(_) => FieldType::Map,
            Value::Geometry(_) => FieldType::Geometry,
            Value::Envelope(_) => FieldType::Envelope,
            Value::Opaque { .. } => FieldType::Opaque,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            Value::Geometry(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Canonical hash contribution. Maps are funneled in key order.
    pub fn funnel(&self, f: &mut Funnel) {
        match self {
            Value::Opaque { tag, bytes } => {
                f.put_u8(FieldType::Opaque.tag());
                f.put_u8(*tag);
                f.put_bytes(bytes);
                return;
            }
            other => f.put_u8(other.field_type().tag()),
        }
        match self {
            Value::Null | Value::Opaque { .. } => {}
            Value::Bool(b) => f.put_bool(*b),
            Value::Int(i) => f.put_i64(*i),
            Value::Double(d) => f.put_f64(*d),
            Value::String(s) => f.put_str(s),
            Value::Map(m) => {
                f.put_u32(m.len() as u32);
                for (k, v) in m {
                    f.put_str(k);
                    v.funnel(f);
                }
            }
            Value::Geometry(g) => g.funnel(f),
            Value::Envelope(e) => {
                f.put_f64(e.min_x);
                f.put_f64(e.max_x);
                f.put_f64(e.min_y);
                f.put_f64(e.max_y);
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Geometry> for Value {
    fn from(g: Geometry) -> Self {
        Value::Geometry(g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::ContentHasher;

    fn digest(v: &Value) -> crate::ObjectId {
        let mut f = ContentHasher::FEATURE.funnel();
        v.funnel(&mut f);
        f.finish()
    }

    #[test]
    fn field_type_tags_roundtrip() {
        for ft in [
            FieldType::Null,
            FieldType::Bool,
            FieldType::Int,
            FieldType::Double,
            FieldType::String,
            FieldType::Map,
            FieldType::Geometry,
            FieldType::Envelope,
            FieldType::Opaque,
        ] {
            assert_eq!(FieldType::from_tag(ft.tag()).unwrap(), ft);
        }
        assert_eq!(FieldType::from_tag(42), Err(TypeError::UnknownFieldType(42)));
    }

    #[test]
    fn map_hash_is_independent_of_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), Value::Int(2));
        a.insert("a".to_string(), Value::Int(1));
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), Value::Int(1));
        b.insert("b".to_string(), Value::Int(2));
        assert_eq!(digest(&Value::Map(a)), digest(&Value::Map(b)));
    }

    #[test]
    fn different_types_hash_differently() {
        assert_ne!(digest(&Value::Int(1)), digest(&Value::Double(1.0)));
        assert_ne!(digest(&Value::from("1")), digest(&Value::Int(1)));
        assert_ne!(digest(&Value::Null), digest(&Value::Bool(false)));
    }

    #[test]
    fn accessors() {
        let g = Value::from(Geometry::point(1.0, 2.0));
        assert_eq!(g.field_type(), FieldType::Geometry);
        assert!(g.as_geometry().is_some());
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert!(Value::Null.is_null());
        assert_eq!(FieldType::Map.to_string(), "map");
    }

    #[test]
    fn serde_roundtrip() {
        let mut m = BTreeMap::new();
        m.insert("geom".to_string(), Value::from(Geometry::point(3.0, 4.0)));
        m.insert("raw".to_string(), Value::Opaque { tag: 99, bytes: vec![1, 2] });
        let v = Value::Map(m);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), v);
    }
}
