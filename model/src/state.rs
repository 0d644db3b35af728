use chrono::{DateTime, Duration, Utc};
use geojson::{Feature, FeatureCollection, JsonObject};

use crate::{FleetError, LonLat, Trace, VehicleID, VehicleRegistry};

/// Which of the two per-vehicle traces a query fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TraceKind {
    /// The whole day-count window. Live updates append here.
    Primary,
    /// A shorter window highlighting one day inside the primary one
    Subtrace,
}

/// Before anything is known, a vehicle pretends its last report was this long ago.
const UNKNOWN_AGE_DAYS: i64 = 365;

/// The most recent known position of a vehicle. The age isn't stored; it's measured from
/// whenever the position was last fresh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatestPosition {
    pub pos: Option<LonLat>,
    fresh_at: Option<DateTime<Utc>>,
}

impl LatestPosition {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        match self.fresh_at {
            Some(t) => now - t,
            None => Duration::days(UNKNOWN_AGE_DAYS),
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        self.age(now).num_milliseconds() as f64 / 1000.0
    }
}

struct Slots {
    trace: Trace,
    subtrace: Trace,
    latest: LatestPosition,
}

/// Everything the map shows per vehicle. Created once the vehicle snapshot is known; every
/// vehicle in the registry always has exactly one entry.
pub struct FleetState {
    registry: VehicleRegistry,
    // Parallel to the registry
    slots: Vec<Slots>,
}

impl FleetState {
    pub fn new(registry: VehicleRegistry) -> Self {
        let slots = registry
            .vehicles()
            .iter()
            .map(|_| Slots {
                trace: Trace::default(),
                subtrace: Trace::default(),
                latest: LatestPosition::default(),
            })
            .collect();
        Self { registry, slots }
    }

    pub fn registry(&self) -> &VehicleRegistry {
        &self.registry
    }

    fn slots_mut(&mut self, id: &VehicleID) -> Result<&mut Slots, FleetError> {
        let idx = self.registry.lookup(id)?;
        Ok(&mut self.slots[idx])
    }

    fn slots(&self, id: &VehicleID) -> Option<&Slots> {
        self.registry.position_of(id).map(|idx| &self.slots[idx])
    }

    pub fn replace_trace(
        &mut self,
        kind: TraceKind,
        id: &VehicleID,
        pts: Vec<LonLat>,
    ) -> Result<(), FleetError> {
        let slots = self.slots_mut(id)?;
        match kind {
            TraceKind::Primary => slots.trace.replace(pts),
            TraceKind::Subtrace => slots.subtrace.replace(pts),
        }
        Ok(())
    }

    pub fn append_point(&mut self, id: &VehicleID, pt: LonLat) -> Result<(), FleetError> {
        self.slots_mut(id)?.trace.push(pt);
        Ok(())
    }

    /// `age` is how old the position already is at `now`.
    pub fn replace_position(
        &mut self,
        id: &VehicleID,
        pt: LonLat,
        age: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        let slots = self.slots_mut(id)?;
        slots.latest = LatestPosition {
            pos: Some(pt),
            fresh_at: Some(now - age),
        };
        Ok(())
    }

    /// A live report: extends the primary trace and becomes the latest position, with age zero.
    /// Reports for vehicles outside the registry are dropped. Returns whether anything changed.
    pub fn apply_live(&mut self, id: &VehicleID, pt: LonLat, now: DateTime<Utc>) -> bool {
        let idx = match self.registry.position_of(id) {
            Some(idx) => idx,
            None => {
                debug!("Dropping live position for unknown vehicle {}", id);
                return false;
            }
        };
        let slots = &mut self.slots[idx];
        slots.trace.push(pt);
        slots.latest = LatestPosition {
            pos: Some(pt),
            fresh_at: Some(now),
        };
        true
    }

    pub fn clear_subtraces(&mut self) {
        for slots in &mut self.slots {
            slots.subtrace.clear();
        }
    }

    pub fn trace(&self, kind: TraceKind, id: &VehicleID) -> Option<&Trace> {
        let slots = self.slots(id)?;
        Some(match kind {
            TraceKind::Primary => &slots.trace,
            TraceKind::Subtrace => &slots.subtrace,
        })
    }

    pub fn latest(&self, id: &VehicleID) -> Option<&LatestPosition> {
        self.slots(id).map(|slots| &slots.latest)
    }

    /// One LineString feature per vehicle, in registry order
    pub fn traces_geojson(&self, kind: TraceKind) -> FeatureCollection {
        let features = self
            .registry
            .ids()
            .zip(&self.slots)
            .map(|(id, slots)| {
                let trace = match kind {
                    TraceKind::Primary => &slots.trace,
                    TraceKind::Subtrace => &slots.subtrace,
                };
                feature(id, Some(trace.to_geometry()), JsonObject::new())
            })
            .collect();
        collection(features)
    }

    /// One Point feature per vehicle, with `age_sec` measured at `now`. Vehicles without a known
    /// position get no geometry.
    pub fn positions_geojson(&self, now: DateTime<Utc>) -> FeatureCollection {
        let features = self
            .registry
            .ids()
            .zip(&self.slots)
            .map(|(id, slots)| {
                let geometry = slots.latest.pos.map(|pt| {
                    geojson::Geometry::new(geojson::Value::Point(pt.to_position()))
                });
                let mut props = JsonObject::new();
                props.insert("age_sec".to_string(), slots.latest.age_secs(now).into());
                feature(id, geometry, props)
            })
            .collect();
        collection(features)
    }
}

fn feature(id: &VehicleID, geometry: Option<geojson::Geometry>, mut props: JsonObject) -> Feature {
    props.insert("cid".to_string(), id.as_str().into());
    Feature {
        bbox: None,
        geometry,
        id: None,
        properties: Some(props),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
