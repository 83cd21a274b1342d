use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::hasher::Funnel;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Planar geometry carried by feature attributes.
///
/// Only the shapes needed to derive envelopes are modelled; geometric
/// semantics (validity, reference systems) are left to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    LineString(Vec<Coord>),
    Polygon {
        exterior: Vec<Coord>,
        holes: Vec<Vec<Coord>>,
    },
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point(Coord::new(x, y))
    }

    /// Bounding box of all coordinates; `None` for an empty geometry.
    pub fn envelope(&self) -> Option<Envelope> {
        let coords: Box<dyn Iterator<Item = &Coord>> = match self {
            Geometry::Point(c) => Box::new(std::iter::once(c)),
            Geometry::MultiPoint(cs) | Geometry::LineString(cs) => Box::new(cs.iter()),
            // holes lie inside the exterior ring
            Geometry::Polygon { exterior, .. } => Box::new(exterior.iter()),
        };
        coords.fold(None, |acc: Option<Envelope>, c| {
            let p = Envelope::point(c.x, c.y);
            Some(match acc {
                Some(e) => e.union(&p),
                None => p,
            })
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon { .. } => "Polygon",
        }
    }

    /// Canonical hash contribution.
    pub fn funnel(&self, f: &mut Funnel) {
        fn ring(f: &mut Funnel, coords: &[Coord]) {
            f.put_u32(coords.len() as u32);
            for c in coords {
                f.put_f64(c.x);
                f.put_f64(c.y);
            }
        }
        match self {
            Geometry::Point(c) => {
                f.put_u8(0);
                ring(f, std::slice::from_ref(c));
            }
            Geometry::MultiPoint(cs) => {
                f.put_u8(1);
                ring(f, cs);
            }
            Geometry::LineString(cs) => {
                f.put_u8(2);
                ring(f, cs);
            }
            Geometry::Polygon { exterior, holes } => {
                f.put_u8(3);
                ring(f, exterior);
                f.put_u32(holes.len() as u32);
                for h in holes {
                    ring(f, h);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_envelope_is_a_point() {
        let env = Geometry::point(1.5, -2.0).envelope().unwrap();
        assert!(env.is_point());
        assert_eq!(env.min_x, 1.5);
    }

    #[test]
    fn linestring_envelope() {
        let line = Geometry::LineString(vec![
            Coord::new(0.0, 5.0),
            Coord::new(3.0, -1.0),
            Coord::new(-2.0, 2.0),
        ]);
        let env = line.envelope().unwrap();
        assert_eq!(env, Envelope::new(-2.0, 3.0, -1.0, 5.0).unwrap());
        assert!(!env.is_point());
    }

    #[test]
    fn polygon_envelope_ignores_holes() {
        let poly = Geometry::Polygon {
            exterior: vec![
                Coord::new(0.0, 0.0),
                Coord::new(10.0, 0.0),
                Coord::new(10.0, 10.0),
                Coord::new(0.0, 0.0),
            ],
            holes: vec![vec![Coord::new(1.0, 1.0), Coord::new(2.0, 2.0)]],
        };
        assert_eq!(poly.envelope(), Envelope::new(0.0, 10.0, 0.0, 10.0).ok());
        assert_eq!(poly.kind_name(), "Polygon");
    }

    #[test]
    fn empty_geometry_has_no_envelope() {
        assert!(Geometry::MultiPoint(vec![]).envelope().is_none());
    }
}
