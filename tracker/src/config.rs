use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use model::{OrgID, VehicleID, DEFAULT_DAYS};

/// Everything the tracker needs to know up front about who it's tracking for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub api_url: String,
    pub org_id: OrgID,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Only track these vehicles. Empty means every vehicle in the snapshot.
    #[serde(default)]
    pub vehicle_allowlist: Vec<VehicleID>,
    #[serde(default = "default_days")]
    pub default_days: u32,
    /// No timeout unless set
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_days() -> u32 {
    DEFAULT_DAYS
}

impl Config {
    pub fn new(api_url: &str, org_id: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            org_id: OrgID(org_id.to_string()),
            user_id: None,
            vehicle_allowlist: Vec::new(),
            default_days: DEFAULT_DAYS,
            request_timeout_secs: None,
        }
    }

    pub fn load(path: &str) -> Result<Self> {
        let raw = fs_err::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            bail!("No API URL configured");
        }
        if self.org_id.0.trim().is_empty() {
            bail!("No organization configured");
        }
        if self.default_days == 0 {
            bail!("default_days must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
