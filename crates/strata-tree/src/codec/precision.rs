//! Fixed-precision envelope encoding.
//!
//! Coordinates are scaled by 10^7 and rounded to the nearest integer, which
//! bounds the round-trip error by half a unit (5e-8).

use strata_types::Envelope;

use super::varint::{write_svarint, ByteReader};
use crate::error::CodecResult;

pub const FIXED_PRECISION: f64 = 10_000_000.0;

/// Tolerance to use when comparing envelopes that went through the codec.
pub const ENVELOPE_TOLERANCE: f64 = 1e-7;

pub(crate) const BOUNDS_NONE: u8 = 0;
pub(crate) const BOUNDS_POINT: u8 = 1;
pub(crate) const BOUNDS_BOX: u8 = 2;

fn to_fixed(v: f64) -> i64 {
    (v * FIXED_PRECISION).round() as i64
}

fn from_fixed(v: i64) -> f64 {
    v as f64 / FIXED_PRECISION
}

/// The envelope exactly as it will come back out of the codec.
///
/// Quantizing twice yields the same envelope, so placement decisions made
/// on quantized bounds agree before and after a round trip.
pub fn quantize(env: &Envelope) -> Envelope {
    Envelope {
        min_x: from_fixed(to_fixed(env.min_x)),
        max_x: from_fixed(to_fixed(env.max_x)),
        min_y: from_fixed(to_fixed(env.min_y)),
        max_y: from_fixed(to_fixed(env.max_y)),
    }
}

/// Kind tag for optional bounds; a box that collapses under quantization is
/// written as a point.
pub(crate) fn bounds_kind(bounds: Option<&Envelope>) -> u8 {
    match bounds {
        None => BOUNDS_NONE,
        Some(e) if quantize(e).is_point() => BOUNDS_POINT,
        Some(_) => BOUNDS_BOX,
    }
}

pub(crate) fn write_bounds(buf: &mut Vec<u8>, kind: u8, env: &Envelope) {
    match kind {
        BOUNDS_POINT => {
            write_svarint(buf, to_fixed(env.min_x));
            write_svarint(buf, to_fixed(env.min_y));
        }
        BOUNDS_BOX => {
            write_svarint(buf, to_fixed(env.min_x));
            write_svarint(buf, to_fixed(env.max_x));
            write_svarint(buf, to_fixed(env.min_y));
            write_svarint(buf, to_fixed(env.max_y));
        }
        _ => {}
    }
}

pub(crate) fn read_bounds(r: &mut ByteReader<'_>, kind: u8) -> CodecResult<Option<Envelope>> {
    match kind {
        BOUNDS_NONE => Ok(None),
        BOUNDS_POINT => {
            let x = from_fixed(r.read_svarint()?);
            let y = from_fixed(r.read_svarint()?);
            Ok(Some(Envelope::point(x, y)))
        }
        BOUNDS_BOX => {
            let min_x = from_fixed(r.read_svarint()?);
            let max_x = from_fixed(r.read_svarint()?);
            let min_y = from_fixed(r.read_svarint()?);
            let max_y = from_fixed(r.read_svarint()?);
            Envelope::new(min_x, max_x, min_y, max_y)
                .map(Some)
                .map_err(|e| r.malformed(e.to_string()))
        }
        other => Err(r.malformed(format!("unknown bounds kind {other}"))),
    }
}
