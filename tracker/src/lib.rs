#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

pub mod api;
pub mod config;
pub mod feed;
pub mod query;
mod sync;

pub use self::api::{FetchError, FleetApi, HttpFleetApi};
pub use self::config::Config;
pub use self::feed::{LiveEvent, LiveFeed};
pub use self::query::{ApplyReport, Phase, QueryOutcome, RangeQuery, RangeQueryController};
pub use self::sync::Synchronizer;
