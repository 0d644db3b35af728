use thiserror::Error;

use crate::VehicleID;

/// Failures of the fleet state itself. Network failures live with the API client.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FleetError {
    /// An operation referenced a vehicle that isn't in the registry. The registry is populated
    /// once from the snapshot, so this means a caller is out of sync with it.
    #[error("unknown vehicle {0}")]
    NotFound(VehicleID),

    #[error("day count must be at least 1, got {0}")]
    InvalidDayCount(u32),

    /// The vehicle snapshot hasn't resolved yet, or it failed.
    #[error("fleet state isn't initialized")]
    Uninitialized,
}
