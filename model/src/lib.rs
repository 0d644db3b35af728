#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod analytics;
mod error;
mod projection;
mod selection;
mod state;
mod trace;
mod vehicles;
mod window;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub use self::analytics::{
    hourly_windows, HourlyReport, HourlyRow, Measure, Unit, FIRST_HOUR, LAST_HOUR,
};
pub use self::error::FleetError;
pub use self::projection::{Focus, LayerFilter, Projection};
pub use self::selection::{DateFilter, Selection, VehicleFilter, DEFAULT_DAYS};
pub use self::state::{FleetState, LatestPosition, TraceKind};
pub use self::trace::{LonLat, PositionSample, Trace};
pub use self::vehicles::{RawPosition, RawVehicle, Status, Vehicle, VehicleRegistry};
pub use self::window::{
    date_choices, single_day, to_iso, trailing_days, Clock, FixedClock, LocalClock, TimeWindow,
};

/// The identifier the backend assigns to a cultivator. Always a decimal string in practice, but
/// kept as text so that odd ids still round-trip.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleID(pub String);

impl VehicleID {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.trim().parse().ok()
    }

    /// Orders by numeric value, so "2" comes before "10". Ids that aren't numbers go last, in
    /// lexicographic order.
    pub fn numeric_cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl std::fmt::Display for VehicleID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// The organization owning a fleet.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrgID(pub String);

impl std::fmt::Display for OrgID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_order() {
        let mut ids: Vec<VehicleID> = ["10", "2", "3"].into_iter().map(VehicleID::new).collect();
        ids.sort_by(|a, b| a.numeric_cmp(b));
        let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "10"]);
    }

    #[test]
    fn non_numeric_ids_go_last() {
        let mut ids: Vec<VehicleID> = ["b", "7", "a", "12"]
            .into_iter()
            .map(VehicleID::new)
            .collect();
        ids.sort_by(|a, b| a.numeric_cmp(b));
        let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["7", "12", "a", "b"]);
    }
}
