use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A WGS84 coordinate. On the wire this is a GeoJSON position, `[lon, lat]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn to_position(self) -> geojson::Position {
        vec![self.lon, self.lat]
    }
}

impl From<[f64; 2]> for LonLat {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<LonLat> for [f64; 2] {
    fn from(pt: LonLat) -> Self {
        [pt.lon, pt.lat]
    }
}

/// One reported position of a vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// ISO-8601, as reported
    pub ts: String,
    pub lon: f64,
    pub lat: f64,
}

impl PositionSample {
    pub fn pos(&self) -> LonLat {
        LonLat::new(self.lon, self.lat)
    }

    /// None if the timestamp can't be parsed
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.ts)
    }
}

pub(crate) fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The path of one vehicle over some time window, in the order it was driven. Only coordinates
/// are kept. Nothing is deduplicated and there's no upper bound on length.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    inner: Vec<LonLat>,
}

impl Trace {
    pub fn new(pts: Vec<LonLat>) -> Self {
        Self { inner: pts }
    }

    pub fn replace(&mut self, pts: Vec<LonLat>) {
        self.inner = pts;
    }

    pub fn push(&mut self, pt: LonLat) {
        self.inner.push(pt);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn points(&self) -> &[LonLat] {
        &self.inner
    }

    pub fn last(&self) -> Option<LonLat> {
        self.inner.last().copied()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn to_geometry(&self) -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::LineString(
            self.inner.iter().map(|pt| pt.to_position()).collect(),
        ))
    }
}
