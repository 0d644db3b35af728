use crate::{FleetState, LonLat, Selection, VehicleFilter, VehicleID};

/// Which vehicles the trace and position layers should draw.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerFilter {
    All,
    Vehicle(VehicleID),
}

/// Where the map should move after a selection change.
#[derive(Clone, Debug, PartialEq)]
pub enum Focus {
    /// The default view of the whole fleet
    Overview,
    Vehicle(LonLat),
    /// The vehicle has no known position yet; leave the camera alone
    Unchanged,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    pub filter: LayerFilter,
    pub focus: Focus,
}

impl Projection {
    pub fn new(selection: &Selection, state: &FleetState) -> Self {
        match selection.vehicle {
            VehicleFilter::All => Self {
                filter: LayerFilter::All,
                focus: Focus::Overview,
            },
            VehicleFilter::Single(ref id) => Self {
                filter: LayerFilter::Vehicle(id.clone()),
                focus: match state.latest(id).and_then(|latest| latest.pos) {
                    Some(pt) => Focus::Vehicle(pt),
                    None => Focus::Unchanged,
                },
            },
        }
    }

    pub fn shows(&self, id: &VehicleID) -> bool {
        match self.filter {
            LayerFilter::All => true,
            LayerFilter::Vehicle(ref x) => x == id,
        }
    }
}
