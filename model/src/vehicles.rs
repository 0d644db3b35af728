use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trace::parse_timestamp;
use crate::{FleetError, VehicleID};

/// One record of the vehicle snapshot, as the backend returns it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawVehicle {
    #[serde(rename = "cid")]
    pub id: VehicleID,
    #[serde(rename = "oid", default)]
    pub org: Option<String>,
    #[serde(default)]
    pub description: serde_json::Value,
    #[serde(default)]
    pub ipv4: Option<String>,
    #[serde(rename = "pos", default)]
    pub last_position: Option<RawPosition>,
    #[serde(default)]
    pub cams: Vec<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawPosition {
    pub ts: String,
    pub lon: f64,
    pub lat: f64,
}

/// How long ago a vehicle last reported, bucketed for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Active,
    IdleMinutes(i64),
    IdleHours(i64),
    IdleDays(i64),
    /// Also used when the last report time is missing or unreadable
    IdleLong,
}

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

impl Status {
    /// Classifies from the time of the last report. The day count divides by five days, not one,
    /// so anything between 1 and 5 days reads as "0 days" or "1 days".
    pub fn from_last_report(last_report: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let age = match last_report {
            Some(ts) => (now - ts).num_milliseconds(),
            None => return Status::IdleLong,
        };
        if age < MINUTE_MS {
            Status::Active
        } else if age <= HOUR_MS {
            Status::IdleMinutes(age / MINUTE_MS)
        } else if age <= DAY_MS {
            Status::IdleHours(age / HOUR_MS)
        } else if age <= 5 * DAY_MS {
            Status::IdleDays(age / (5 * DAY_MS))
        } else {
            Status::IdleLong
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Status::Active => write!(f, "Active"),
            Status::IdleMinutes(n) => write!(f, "Idle for {} min", n),
            Status::IdleHours(n) => write!(f, "Idle for {} hours", n),
            Status::IdleDays(n) => write!(f, "Idle for {} days", n),
            Status::IdleLong => write!(f, "Idle for 5+ days"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Vehicle {
    pub id: VehicleID,
    /// Computed once, when the snapshot loads
    pub status: Status,
    pub cams: Vec<u32>,
}

/// The known vehicles, ordered by numeric id. Fixed once loaded; vehicles are never removed.
#[derive(Clone, Debug, Default)]
pub struct VehicleRegistry {
    vehicles: Vec<Vehicle>,
    index: BTreeMap<VehicleID, usize>,
}

impl VehicleRegistry {
    pub fn load(mut raw: Vec<RawVehicle>, now: DateTime<Utc>) -> Self {
        raw.sort_by(|a, b| a.id.numeric_cmp(&b.id));

        let mut registry = Self::default();
        for rec in raw {
            if registry.index.contains_key(&rec.id) {
                warn!("Vehicle {} appears twice in the snapshot, ignoring the repeat", rec.id);
                continue;
            }
            let last_report = rec
                .last_position
                .as_ref()
                .and_then(|pos| parse_timestamp(&pos.ts));
            registry.index.insert(rec.id.clone(), registry.vehicles.len());
            registry.vehicles.push(Vehicle {
                id: rec.id,
                status: Status::from_last_report(last_report, now),
                cams: rec.cams,
            });
        }
        registry
    }

    /// Like `load`, but only keeps vehicles in the allowlist. An empty allowlist keeps everything.
    pub fn load_filtered(raw: Vec<RawVehicle>, allowlist: &[VehicleID], now: DateTime<Utc>) -> Self {
        if allowlist.is_empty() {
            return Self::load(raw, now);
        }
        let raw = raw
            .into_iter()
            .filter(|rec| allowlist.contains(&rec.id))
            .collect();
        Self::load(raw, now)
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn ids(&self) -> impl Iterator<Item = &VehicleID> {
        self.vehicles.iter().map(|v| &v.id)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn contains(&self, id: &VehicleID) -> bool {
        self.index.contains_key(id)
    }

    pub fn position_of(&self, id: &VehicleID) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn lookup(&self, id: &VehicleID) -> Result<usize, FleetError> {
        self.position_of(id)
            .ok_or_else(|| FleetError::NotFound(id.clone()))
    }

    pub fn get(&self, id: &VehicleID) -> Option<&Vehicle> {
        self.position_of(id).map(|idx| &self.vehicles[idx])
    }
}
