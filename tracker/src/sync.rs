use anyhow::Result;
use chrono::{Duration, NaiveDate};
use futures::channel::mpsc;
use futures::future::join_all;

use model::{
    date_choices, hourly_windows, Clock, DateFilter, FleetError, FleetState, HourlyReport,
    HourlyRow, Projection, Selection, TraceKind, VehicleFilter, VehicleRegistry,
};

use crate::api::FleetApi;
use crate::config::Config;
use crate::feed::LiveEvent;
use crate::query::{ApplyReport, Phase, QueryOutcome, RangeQuery, RangeQueryController};

/// Positions that arrive with an unreadable timestamp are treated as this old.
const UNKNOWN_AGE_DAYS: i64 = 365;

/// Keeps the fleet state in step with the user's selection and the live feed.
///
/// Selection changes can be driven in one step (`select_vehicle` and friends) or split into
/// `plan_*`, [`RangeQuery::run`] and `complete`, which lets a caller keep applying live events
/// while queries are in flight.
pub struct Synchronizer<A: FleetApi, C: Clock> {
    api: A,
    config: Config,
    controller: RangeQueryController<C>,
    // None until the vehicle snapshot resolves
    state: Option<FleetState>,
    listeners: Vec<mpsc::UnboundedSender<Selection>>,
}

impl<A: FleetApi, C: Clock> Synchronizer<A, C> {
    pub fn new(api: A, clock: C, config: Config) -> Result<Self, FleetError> {
        let selection = Selection::new(config.default_days)?;
        Ok(Self {
            api,
            config,
            controller: RangeQueryController::new(clock, selection),
            state: None,
            listeners: Vec::new(),
        })
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> Option<&FleetState> {
        self.state.as_ref()
    }

    pub fn registry(&self) -> Option<&VehicleRegistry> {
        self.state.as_ref().map(|state| state.registry())
    }

    pub fn selection(&self) -> &Selection {
        self.controller.selection()
    }

    pub fn phase(&self, kind: TraceKind) -> Phase {
        self.controller.phase(kind)
    }

    /// Every later selection change is sent here.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Selection> {
        let (tx, rx) = mpsc::unbounded();
        self.listeners.push(tx);
        rx
    }

    fn notify(&mut self) {
        let selection = self.controller.selection().clone();
        self.listeners
            .retain(|tx| tx.unbounded_send(selection.clone()).is_ok());
    }

    /// Loads the vehicle snapshot, then the latest positions and the primary traces for the
    /// current selection. If the snapshot can't be fetched, nothing is initialized.
    pub async fn initialize(&mut self) -> Result<()> {
        let raw = match self.api.fetch_vehicles(&self.config.org_id).await {
            Ok(raw) => raw,
            Err(err) => {
                error!("Couldn't load vehicles for org {}: {}", self.config.org_id, err);
                return Err(err.into());
            }
        };
        let registry = VehicleRegistry::load_filtered(
            raw,
            &self.config.vehicle_allowlist,
            self.controller.clock().now_utc(),
        );
        info!(
            "Tracking {} vehicles for org {}",
            registry.len(),
            self.config.org_id
        );
        self.state = Some(FleetState::new(registry));

        self.load_latest_positions().await?;
        let registry = self.state.as_ref().ok_or(FleetError::Uninitialized)?.registry();
        let query = self.controller.reload(registry)?;
        self.execute(query).await?;
        Ok(())
    }

    fn registry_or_err(&self) -> Result<&VehicleRegistry, FleetError> {
        self.registry().ok_or(FleetError::Uninitialized)
    }

    async fn load_latest_positions(&mut self) -> Result<(), FleetError> {
        let ids: Vec<_> = self.registry_or_err()?.ids().cloned().collect();
        let api = &self.api;
        let results = join_all(ids.into_iter().map(|id| async move {
            let result = api.fetch_latest_position(&id).await;
            (id, result)
        }))
        .await;

        let now = self.controller.clock().now_utc();
        let state = self.state.as_mut().ok_or(FleetError::Uninitialized)?;
        for (id, result) in results {
            match result {
                Ok(Some(sample)) => {
                    let age = match sample.timestamp() {
                        Some(ts) => now - ts,
                        None => {
                            warn!("Vehicle {} reported an unreadable time {:?}", id, sample.ts);
                            Duration::days(UNKNOWN_AGE_DAYS)
                        }
                    };
                    state.replace_position(&id, sample.pos(), age, now)?;
                }
                Ok(None) => {}
                Err(err) => warn!("Couldn't fetch the latest position of {}: {}", id, err),
            }
        }
        Ok(())
    }

    pub fn plan_vehicle(&mut self, vehicle: VehicleFilter) -> Result<RangeQuery, FleetError> {
        let registry = self.state.as_ref().ok_or(FleetError::Uninitialized)?.registry();
        let query = self.controller.select_vehicle(vehicle, registry)?;
        self.notify();
        Ok(query)
    }

    pub fn plan_days(&mut self, days: u32) -> Result<RangeQuery, FleetError> {
        let registry = self.state.as_ref().ok_or(FleetError::Uninitialized)?.registry();
        let query = self.controller.select_days(days, registry)?;
        self.notify();
        Ok(query)
    }

    /// Also empties every subtrace, until the new query fills them.
    pub fn plan_date(&mut self, date: DateFilter) -> Result<RangeQuery, FleetError> {
        let state = self.state.as_mut().ok_or(FleetError::Uninitialized)?;
        let query = self.controller.select_date(date, state.registry())?;
        state.clear_subtraces();
        self.notify();
        Ok(query)
    }

    pub fn complete(&mut self, outcome: QueryOutcome) -> Result<ApplyReport, FleetError> {
        let state = self.state.as_mut().ok_or(FleetError::Uninitialized)?;
        self.controller.apply(outcome, state)
    }

    async fn execute(&mut self, query: RangeQuery) -> Result<ApplyReport, FleetError> {
        let outcome = query.run(&self.api).await;
        self.complete(outcome)
    }

    pub async fn select_vehicle(
        &mut self,
        vehicle: VehicleFilter,
    ) -> Result<ApplyReport, FleetError> {
        let query = self.plan_vehicle(vehicle)?;
        self.execute(query).await
    }

    pub async fn select_days(&mut self, days: u32) -> Result<ApplyReport, FleetError> {
        let query = self.plan_days(days)?;
        self.execute(query).await
    }

    pub async fn select_date(&mut self, date: DateFilter) -> Result<ApplyReport, FleetError> {
        let query = self.plan_date(date)?;
        self.execute(query).await
    }

    /// Returns false if the event was dropped, because it's for an unknown vehicle or nothing
    /// is loaded yet.
    pub fn apply_live_event(&mut self, ev: &LiveEvent) -> bool {
        let now = self.controller.clock().now_utc();
        match self.state.as_mut() {
            Some(state) => state.apply_live(&ev.vehicle, ev.pos(), now),
            None => {
                debug!("Dropping live position for {}; nothing loaded yet", ev.vehicle);
                false
            }
        }
    }

    /// The dates that can be picked for the subtrace, newest first
    pub fn date_choices(&self) -> Vec<NaiveDate> {
        date_choices(&self.controller.clock().now(), self.selection().days)
    }

    pub fn projection(&self) -> Option<Projection> {
        self.state
            .as_ref()
            .map(|state| Projection::new(self.selection(), state))
    }

    /// Distance per working hour for one vehicle, or averaged over the fleet. Hours that fail to
    /// load are left empty.
    pub async fn hourly_report(&self, vehicle: VehicleFilter, date: DateFilter) -> HourlyReport {
        let now = self.controller.clock().now();
        let (date, today) = HourlyReport::resolve_date(date, now.date_naive());
        let windows = hourly_windows(&now.timezone(), date);

        let api = &self.api;
        let vehicle_ref = &vehicle;
        let rows = join_all(windows.into_iter().map(|(hour, window)| async move {
            let result = match vehicle_ref {
                VehicleFilter::All => api.fetch_avg_distance(&window).await,
                VehicleFilter::Single(id) => api.fetch_distance(id, &window).await,
            };
            let speed = match result {
                Ok(speed) => speed,
                Err(err) => {
                    warn!("Couldn't fetch distance for {} at hour {}: {}", vehicle_ref, hour, err);
                    None
                }
            };
            HourlyRow::new(hour, speed)
        }))
        .await;

        HourlyReport {
            vehicle,
            date,
            today,
            rows,
        }
    }
}
