use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Axis-aligned bounding box.
///
/// Coordinates are treated as an opaque numeric range; no reference system
/// is implied. A point is an envelope whose min and max coincide.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// The four quadrants of an envelope, in the order used as bucket indexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quadrant {
    SouthWest = 0,
    NorthWest = 1,
    NorthEast = 2,
    SouthEast = 3,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::SouthWest,
        Quadrant::NorthWest,
        Quadrant::NorthEast,
        Quadrant::SouthEast,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl Envelope {
    /// World extent in longitude/latitude degrees.
    pub const WGS84: Envelope = Envelope {
        min_x: -180.0,
        max_x: 180.0,
        min_y: -90.0,
        max_y: 90.0,
    };

    /// Build an envelope from two corners, rejecting inverted or NaN ranges.
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> TypeResult<Self> {
        if !(min_x <= max_x && min_y <= max_y) {
            return Err(TypeError::InvalidEnvelope(format!(
                "[{min_x}, {max_x}] x [{min_y}, {max_y}]"
            )));
        }
        Ok(Self {
            min_x,
            max_x,
            min_y,
            max_y,
        })
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            max_x: x,
            min_y: y,
            max_y: y,
        }
    }

    pub fn is_point(&self) -> bool {
        self.min_x == self.max_x && self.min_y == self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.min_x + self.width() / 2.0,
            self.min_y + self.height() / 2.0,
        )
    }

    /// `other` lies entirely inside `self` (boundaries inclusive).
    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && other.max_x <= self.max_x
            && self.min_y <= other.min_y
            && other.max_y <= self.max_y
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        !(other.min_x > self.max_x
            || other.max_x < self.min_x
            || other.min_y > self.max_y
            || other.max_y < self.min_y)
    }

    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn union(&self, other: &Envelope) -> Envelope {
        let mut merged = *self;
        merged.expand_to_include(other);
        merged
    }

    /// Union of an iterator of optional envelopes; `None` when all are absent.
    pub fn union_all<'a, I>(envelopes: I) -> Option<Envelope>
    where
        I: IntoIterator<Item = Option<&'a Envelope>>,
    {
        envelopes
            .into_iter()
            .flatten()
            .fold(None, |acc: Option<Envelope>, e| match acc {
                Some(a) => Some(a.union(e)),
                None => Some(*e),
            })
    }

    /// Component-wise comparison within `eps`.
    pub fn approx_eq(&self, other: &Envelope, eps: f64) -> bool {
        (self.min_x - other.min_x).abs() <= eps
            && (self.max_x - other.max_x).abs() <= eps
            && (self.min_y - other.min_y).abs() <= eps
            && (self.max_y - other.max_y).abs() <= eps
    }

    /// The sub-envelope covering one quadrant of this one.
    pub fn quadrant(&self, q: Quadrant) -> Envelope {
        let (mid_x, mid_y) = self.center();
        match q {
            Quadrant::SouthWest => Envelope {
                min_x: self.min_x,
                max_x: mid_x,
                min_y: self.min_y,
                max_y: mid_y,
            },
            Quadrant::NorthWest => Envelope {
                min_x: self.min_x,
                max_x: mid_x,
                min_y: mid_y,
                max_y: self.max_y,
            },
            Quadrant::NorthEast => Envelope {
                min_x: mid_x,
                max_x: self.max_x,
                min_y: mid_y,
                max_y: self.max_y,
            },
            Quadrant::SouthEast => Envelope {
                min_x: mid_x,
                max_x: self.max_x,
                min_y: self.min_y,
                max_y: mid_y,
            },
        }
    }

    /// The single quadrant that fully contains `other`, if any.
    pub fn quadrant_containing(&self, other: &Envelope) -> Option<Quadrant> {
        Quadrant::ALL
            .into_iter()
            .find(|q| self.quadrant(*q).contains(other))
    }
}
