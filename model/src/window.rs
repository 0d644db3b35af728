use std::cell::Cell;

use chrono::{
    DateTime, Days, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime,
    SecondsFormat, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

/// Where "now" comes from. Day boundaries are computed in the clock's time zone.
pub trait Clock {
    type Tz: TimeZone;

    fn now(&self) -> DateTime<Self::Tz>;

    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }
}

/// Wall-clock time in the machine's local time zone.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    type Tz = Local;

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to. Used in tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Cell<DateTime<FixedOffset>>,
}

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Cell::new(now),
        }
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for FixedClock {
    type Tz = FixedOffset;

    fn now(&self) -> DateTime<FixedOffset> {
        self.now.get()
    }
}

/// A closed time range, as sent to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn ts_begin(&self) -> String {
        to_iso(&self.begin)
    }

    pub fn ts_end(&self) -> String {
        to_iso(&self.end)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.begin && t <= self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.ts_begin(), self.ts_end())
    }
}

/// ISO-8601 in UTC with milliseconds, like `2026-10-17T07:00:00.000Z`
pub fn to_iso(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `days` calendar days ending now, today included. Starts at local midnight of the oldest day.
pub fn trailing_days<Tz: TimeZone>(now: &DateTime<Tz>, days: u32) -> TimeWindow {
    let back = u64::from(days.saturating_sub(1));
    let today = now.date_naive();
    let first = today.checked_sub_days(Days::new(back)).unwrap_or(today);
    TimeWindow {
        begin: local_to_utc(&now.timezone(), first.and_time(NaiveTime::MIN)),
        end: now.with_timezone(&Utc),
    }
}

/// From local midnight to 23:59:59 on one date.
pub fn single_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> TimeWindow {
    let midnight = date.and_time(NaiveTime::MIN);
    TimeWindow {
        begin: local_to_utc(tz, midnight),
        end: local_to_utc(tz, midnight + Duration::seconds(24 * 3600 - 1)),
    }
}

/// The local dates covered by the last `days` days, newest first.
pub fn date_choices<Tz: TimeZone>(now: &DateTime<Tz>, days: u32) -> Vec<NaiveDate> {
    let today = now.date_naive();
    (0..days)
        .filter_map(|back| today.checked_sub_days(Days::new(u64::from(back))))
        .collect()
}

pub(crate) fn local_to_utc<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt.with_timezone(&Utc);
    }
    // Skipped by a DST transition; the first valid instant after it is an hour later
    match tz.from_local_datetime(&(naive + Duration::hours(1))).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}
