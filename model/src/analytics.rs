use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::window::local_to_utc;
use crate::{DateFilter, TimeWindow, VehicleFilter};

/// Hourly analytics cover the working day, 06:00 through the 20:00 hour.
pub const FIRST_HOUR: u32 = 6;
pub const LAST_HOUR: u32 = 20;

const METERS_TO_YARDS: f64 = 1.094;
const SQ_METERS_TO_ACRES: f64 = 0.000247;

/// One bucket per hour, each an hour long minus a second, counted from local midnight.
pub fn hourly_windows<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Vec<(u32, TimeWindow)> {
    let midnight = local_to_utc(tz, date.and_time(NaiveTime::MIN));
    (FIRST_HOUR..=LAST_HOUR)
        .map(|hour| {
            let begin = midnight + Duration::hours(i64::from(hour));
            let end = begin + Duration::seconds(3600 - 1);
            (hour, TimeWindow { begin, end })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HourlyRow {
    pub hour: u32,
    pub speed: Option<f64>,
    // Nothing reports these yet
    pub uptime: Option<f64>,
    pub area: Option<f64>,
    pub crops: Option<f64>,
}

impl HourlyRow {
    pub fn new(hour: u32, speed: Option<f64>) -> Self {
        Self {
            hour,
            speed,
            uptime: None,
            area: None,
            crops: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measure {
    Speed,
    Uptime,
    Area,
    Crops,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Metric,
    Imperial,
}

/// A day of hourly rows for one vehicle or the fleet average.
#[derive(Clone, Debug, PartialEq)]
pub struct HourlyReport {
    pub vehicle: VehicleFilter,
    pub date: NaiveDate,
    /// True when the date came from "full", meaning today
    pub today: bool,
    pub rows: Vec<HourlyRow>,
}

impl HourlyReport {
    /// `today` is used when the date filter is `Full`.
    pub fn resolve_date(filter: DateFilter, today: NaiveDate) -> (NaiveDate, bool) {
        match filter {
            DateFilter::Full => (today, true),
            DateFilter::SingleDay(date) => (date, false),
        }
    }

    pub fn title(&self) -> String {
        match self.vehicle {
            VehicleFilter::All => "Hourly Performance Averaged over All Cultivators".to_string(),
            VehicleFilter::Single(ref id) => format!("Hourly Performance of Cultivator {}", id),
        }
    }

    pub fn subtitle(&self) -> String {
        if self.today {
            "Today".to_string()
        } else {
            self.date.to_string()
        }
    }

    pub fn series(&self, measure: Measure, unit: Unit) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|row| {
                let value = match measure {
                    Measure::Speed => row.speed,
                    Measure::Uptime => row.uptime,
                    Measure::Area => row.area,
                    Measure::Crops => row.crops,
                };
                match (unit, measure) {
                    (Unit::Imperial, Measure::Speed) => value.map(|x| x * METERS_TO_YARDS),
                    (Unit::Imperial, Measure::Area) => value.map(|x| x * SQ_METERS_TO_ACRES),
                    _ => value,
                }
            })
            .collect()
    }

    pub fn export_to_csv(&self) -> Result<String> {
        let mut out = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut out);
            for row in &self.rows {
                writer.serialize(ExportHourlyRow {
                    date: self.date,
                    vehicle: self.vehicle.to_string(),
                    hour: row.hour,
                    speed: row.speed,
                    uptime: row.uptime,
                    area: row.area,
                    crops: row.crops,
                })?;
            }
            writer.flush()?;
        }
        let out = String::from_utf8(out)?;
        Ok(out)
    }
}

#[derive(Serialize)]
struct ExportHourlyRow {
    date: NaiveDate,
    vehicle: String,
    hour: u32,
    speed: Option<f64>,
    uptime: Option<f64>,
    area: Option<f64>,
    crops: Option<f64>,
}
