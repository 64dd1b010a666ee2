//! Time-series data model for sensor telemetry.
//!
//! A [`Point`] is one immutable sensor reading; a [`Batch`] is the ordered
//! set of points produced by a single poll cycle and forwarded as one write
//! unit. Batches serialize transparently as JSON arrays, which is also the
//! journal's line format.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurement kinds accepted by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    Temperature,
    Humidity,
}

impl Measurement {
    /// Get the measurement name as written to the sink.
    pub fn name(&self) -> &'static str {
        match self {
            Measurement::Temperature => "temperature",
            Measurement::Humidity => "humidity",
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Field map of a point. The sink contract carries a single numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFields {
    pub value: f64,
}

/// A single sensor reading, immutable once created.
///
/// Serializes to the shape the sink and the journal share:
///
/// ```json
/// {"measurement":"temperature","tags":{"sensor":"water"},"time":"2026-03-01T12:00:00Z","fields":{"value":72.5}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement kind
    pub measurement: Measurement,

    /// Tag map identifying the sensor (e.g. `sensor=water`)
    pub tags: BTreeMap<String, String>,

    /// UTC instant of the reading, millisecond or better precision
    pub time: DateTime<Utc>,

    /// Field map with the single numeric value
    pub fields: PointFields,
}

impl Point {
    /// Create a point for the given measurement and sensor tag.
    pub fn new(
        measurement: Measurement,
        sensor: impl Into<String>,
        time: DateTime<Utc>,
        value: f64,
    ) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("sensor".to_string(), sensor.into());
        Self {
            measurement,
            tags,
            time,
            fields: PointFields { value },
        }
    }

    /// Create a temperature point.
    pub fn temperature(sensor: impl Into<String>, time: DateTime<Utc>, value: f64) -> Self {
        Self::new(Measurement::Temperature, sensor, time, value)
    }

    /// Create a humidity point.
    pub fn humidity(sensor: impl Into<String>, time: DateTime<Utc>, value: f64) -> Self {
        Self::new(Measurement::Humidity, sensor, time, value)
    }

    /// The sensor identity tag, if present.
    pub fn sensor(&self) -> Option<&str> {
        self.tags.get("sensor").map(String::as_str)
    }
}

/// The ordered set of points produced by one poll cycle.
///
/// Serializes transparently as a JSON array of points; one serialized batch
/// is one journal line. A batch with zero points is never forwarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    points: Vec<Point>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batch from an existing vector of points.
    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Append a point, preserving insertion order.
    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Append all points of `other` after the existing ones.
    pub fn extend(&mut self, other: Batch) {
        self.points.extend(other.points);
    }

    /// Number of points in the batch.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the batch holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The points in insertion order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }
}

impl FromIterator<Point> for Batch {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}
