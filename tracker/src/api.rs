//! The backend the dashboard reads from.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use model::{LonLat, OrgID, PositionSample, RawVehicle, TimeWindow, VehicleID};

#[derive(Clone, Debug, PartialEq, Error)]
pub enum FetchError {
    /// The backend answered, but not with success
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Every query the fleet views make. Implementations only do I/O; none of them touch fleet state.
pub trait FleetApi {
    fn fetch_vehicles(
        &self,
        org: &OrgID,
    ) -> impl Future<Output = Result<Vec<RawVehicle>, FetchError>>;

    fn fetch_trace(
        &self,
        id: &VehicleID,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Vec<LonLat>, FetchError>>;

    /// None if the vehicle has never reported
    fn fetch_latest_position(
        &self,
        id: &VehicleID,
    ) -> impl Future<Output = Result<Option<PositionSample>, FetchError>>;

    /// Distance covered by one vehicle during the window
    fn fetch_distance(
        &self,
        id: &VehicleID,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Option<f64>, FetchError>>;

    /// Distance covered during the window, averaged over the fleet
    fn fetch_avg_distance(
        &self,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Option<f64>, FetchError>>;
}

/// Talks JSON to the dashboard API.
#[derive(Clone)]
pub struct HttpFleetApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OrgRequest<'a> {
    oid: &'a str,
}

#[derive(Serialize)]
struct RangeRequest {
    ts_begin: String,
    ts_end: String,
}

impl RangeRequest {
    fn new(window: &TimeWindow) -> Self {
        Self {
            ts_begin: window.ts_begin(),
            ts_end: window.ts_end(),
        }
    }
}

impl HttpFleetApi {
    /// With no timeout, a request that never completes is waited on forever.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        decode(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            message,
        });
    }
    resp.json::<T>()
        .await
        .map_err(|err| FetchError::Decode(err.to_string()))
}

impl FleetApi for HttpFleetApi {
    async fn fetch_vehicles(&self, org: &OrgID) -> Result<Vec<RawVehicle>, FetchError> {
        self.post("/cultivators", &OrgRequest { oid: &org.0 }).await
    }

    async fn fetch_trace(
        &self,
        id: &VehicleID,
        window: &TimeWindow,
    ) -> Result<Vec<LonLat>, FetchError> {
        // The backend answers null when there's nothing in the window
        let trace: Option<Vec<LonLat>> = self
            .post(&format!("/cultivators/{}/trace", id), &RangeRequest::new(window))
            .await?;
        Ok(trace.unwrap_or_default())
    }

    async fn fetch_latest_position(
        &self,
        id: &VehicleID,
    ) -> Result<Option<PositionSample>, FetchError> {
        self.get(&format!("/cultivators/{}/pos", id)).await
    }

    async fn fetch_distance(
        &self,
        id: &VehicleID,
        window: &TimeWindow,
    ) -> Result<Option<f64>, FetchError> {
        self.post(
            &format!("/cultivators/{}/distance", id),
            &RangeRequest::new(window),
        )
        .await
    }

    async fn fetch_avg_distance(&self, window: &TimeWindow) -> Result<Option<f64>, FetchError> {
        self.post("/cultivators/all/avg_distance", &RangeRequest::new(window))
            .await
    }
}
