use std::str::FromStr;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{FleetError, VehicleID};

pub const DEFAULT_DAYS: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleFilter {
    All,
    Single(VehicleID),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFilter {
    /// The whole day-count window
    Full,
    SingleDay(NaiveDate),
}

/// What the user has picked. Every range query is derived from this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub vehicle: VehicleFilter,
    pub days: u32,
    pub date: DateFilter,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            vehicle: VehicleFilter::All,
            days: DEFAULT_DAYS,
            date: DateFilter::Full,
        }
    }
}

impl Selection {
    pub fn new(days: u32) -> Result<Self, FleetError> {
        check_days(days)?;
        Ok(Self {
            days,
            ..Default::default()
        })
    }

    /// Picking a vehicle also drops back to the full date range.
    pub fn set_vehicle(&mut self, vehicle: VehicleFilter) {
        self.vehicle = vehicle;
        self.date = DateFilter::Full;
    }

    /// Changing the day count also drops back to the full date range.
    pub fn set_days(&mut self, days: u32) -> Result<(), FleetError> {
        check_days(days)?;
        self.days = days;
        self.date = DateFilter::Full;
        Ok(())
    }

    pub fn set_date(&mut self, date: DateFilter) {
        self.date = date;
    }
}

fn check_days(days: u32) -> Result<(), FleetError> {
    if days == 0 {
        return Err(FleetError::InvalidDayCount(days));
    }
    Ok(())
}

impl VehicleFilter {
    pub fn matches(&self, id: &VehicleID) -> bool {
        match self {
            VehicleFilter::All => true,
            VehicleFilter::Single(x) => x == id,
        }
    }
}

impl FromStr for VehicleFilter {
    type Err = anyhow::Error;

    fn from_str(x: &str) -> Result<Self> {
        let x = x.trim();
        if x.is_empty() {
            bail!("Empty vehicle filter; use \"all\" or a vehicle id");
        }
        if x.eq_ignore_ascii_case("all") {
            return Ok(VehicleFilter::All);
        }
        Ok(VehicleFilter::Single(VehicleID::new(x)))
    }
}

impl std::fmt::Display for VehicleFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VehicleFilter::All => write!(f, "all"),
            VehicleFilter::Single(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for DateFilter {
    type Err = anyhow::Error;

    fn from_str(x: &str) -> Result<Self> {
        let x = x.trim();
        if x.eq_ignore_ascii_case("full") {
            return Ok(DateFilter::Full);
        }
        match NaiveDate::parse_from_str(x, "%Y-%m-%d") {
            Ok(date) => Ok(DateFilter::SingleDay(date)),
            Err(err) => bail!("Date filter {:?} isn't \"full\" or YYYY-MM-DD: {}", x, err),
        }
    }
}

impl std::fmt::Display for DateFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DateFilter::Full => write!(f, "full"),
            DateFilter::SingleDay(date) => write!(f, "{}", date),
        }
    }
}
