//! Heat-map aggregation of incident reports.
//!
//! Reports are grouped into buckets keyed by their coordinates rounded to a
//! fixed number of decimal digits. Each bucket's weight is the number of
//! reports that fell into it, which drives the rendered intensity.
//!
//! Buckets are recomputed from scratch whenever the report set changes; there
//! is no incremental update.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::report::{Coordinates, Located};

/// Decimal digits used when no precision is configured.
pub const DEFAULT_PRECISION: u32 = 4;

/// Largest supported precision. Larger requests are clamped to this.
pub const MAX_PRECISION: u32 = 10;

/// `10^n` for every supported precision, exact in `f64`.
const SCALES: [f64; MAX_PRECISION as usize + 1] = [
    1.0,
    10.0,
    100.0,
    1_000.0,
    10_000.0,
    100_000.0,
    1_000_000.0,
    10_000_000.0,
    100_000_000.0,
    1_000_000_000.0,
    10_000_000_000.0,
];

/// An aggregation cell of the heat map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatBucket {
    /// Rounded latitude of the cell.
    pub latitude: f64,
    /// Rounded longitude of the cell.
    pub longitude: f64,
    /// Number of reports that rounded to this cell.
    pub weight: u32,
}

impl HeatBucket {
    /// The cell position as a coordinate pair.
    #[must_use]
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

fn scale(precision: u32) -> f64 {
    SCALES[precision.min(MAX_PRECISION) as usize]
}

/// Scaled integer form of `value` at `precision`, used as the bucket key.
///
/// Callers guarantee `|value| <= 180`, so the scaled value fits in `i64`.
#[allow(clippy::cast_possible_truncation)]
fn scaled_key(value: f64, precision: u32) -> i64 {
    (value * scale(precision)).round() as i64
}

#[allow(clippy::cast_precision_loss)]
fn unscale(key: i64, precision: u32) -> f64 {
    key as f64 / scale(precision)
}

/// Round `value` to `precision` decimal digits.
///
/// Ties are broken away from zero, applied to the binary value of
/// `value * 10^precision` (so `0.00005` at precision 4 rounds according to
/// its nearest `f64`, not its decimal spelling). Rounding an already rounded
/// value returns it unchanged. Precision above [`MAX_PRECISION`] is clamped.
#[must_use]
pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scale = scale(precision);
    let rounded = (value * scale).round() / scale;
    // Collapse -0.0 so it prints and compares like 0.0.
    rounded + 0.0
}

/// Group located items into heat buckets.
///
/// Items without a position, or whose position is not a valid coordinate
/// pair, are skipped. Two items share a bucket exactly when both rounded
/// components are equal. The result holds one bucket per distinct key; its
/// order carries no meaning (it happens to be first-seen order).
#[must_use]
pub fn bucket_reports<'a, T, I>(items: I, precision: u32) -> Vec<HeatBucket>
where
    T: Located + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let precision = precision.min(MAX_PRECISION);
    let mut index: HashMap<(i64, i64), usize> = HashMap::new();
    let mut buckets: Vec<HeatBucket> = Vec::new();

    for coords in items.into_iter().filter_map(|item| item.coordinates()) {
        if !coords.is_valid() {
            continue;
        }
        let key = (
            scaled_key(coords.latitude, precision),
            scaled_key(coords.longitude, precision),
        );
        let slot = *index.entry(key).or_insert_with(|| {
            buckets.push(HeatBucket {
                latitude: unscale(key.0, precision) + 0.0,
                longitude: unscale(key.1, precision) + 0.0,
                weight: 0,
            });
            buckets.len() - 1
        });
        buckets[slot].weight += 1;
    }

    buckets
}

/// Largest weight among `buckets`, or 0 when empty.
#[must_use]
pub fn max_weight(buckets: &[HeatBucket]) -> u32 {
    buckets.iter().map(|b| b.weight).max().unwrap_or(0)
}

/// A color stop of the heat gradient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradientStop {
    /// Intensity (0..=1) from which this color applies.
    pub start: f64,
    /// Hex color.
    pub color: &'static str,
}

/// Blue to red ramp used by the map.
pub const DEFAULT_GRADIENT: [GradientStop; 5] = [
    GradientStop {
        start: 0.01,
        color: "#0000ff",
    },
    GradientStop {
        start: 0.25,
        color: "#00ffff",
    },
    GradientStop {
        start: 0.5,
        color: "#00ff00",
    },
    GradientStop {
        start: 0.75,
        color: "#ffff00",
    },
    GradientStop {
        start: 1.0,
        color: "#ff0000",
    },
];

/// Rendering parameters handed to a map surface along with the buckets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapStyle {
    /// Blur radius in pixels.
    pub radius: u32,
    /// Layer opacity (0..=1).
    pub opacity: f64,
    /// Color stops, ascending by `start`.
    pub gradient: Vec<GradientStop>,
}

impl Default for HeatmapStyle {
    fn default() -> Self {
        Self {
            radius: 20,
            opacity: 0.7,
            gradient: DEFAULT_GRADIENT.to_vec(),
        }
    }
}

impl HeatmapStyle {
    /// Relative intensity of a bucket against the heaviest one.
    #[must_use]
    pub fn intensity(bucket: &HeatBucket, max_weight: u32) -> f64 {
        if max_weight == 0 {
            0.0
        } else {
            f64::from(bucket.weight) / f64::from(max_weight)
        }
    }

    /// Color for an intensity: the last stop whose start it reaches.
    ///
    /// Intensities below the first stop are transparent and yield `None`.
    #[must_use]
    pub fn color_for(&self, intensity: f64) -> Option<&'static str> {
        self.gradient
            .iter()
            .take_while(|stop| intensity >= stop.start)
            .last()
            .map(|stop| stop.color)
    }
}
