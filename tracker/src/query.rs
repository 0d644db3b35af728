//! Turns selection changes into trace queries, and decides whether their results still apply.
//!
//! Every query carries a ticket naming the trace it fills and the revision of the selection that
//! issued it. Results are only written back if no newer query for that trace was issued in the
//! meantime, so a slow response for an old selection can't clobber the current one.

use futures::future::join_all;

use model::{
    single_day, trailing_days, Clock, DateFilter, FleetError, FleetState, LonLat, Selection,
    TimeWindow, TraceKind, VehicleFilter, VehicleID, VehicleRegistry,
};

use crate::api::{FetchError, FleetApi};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    FetchingSingle,
    FetchingAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub kind: TraceKind,
    revision: u64,
}

/// Fetches to fill one trace kind for some vehicles over one window.
#[derive(Clone, Debug)]
pub struct RangeQuery {
    pub ticket: Ticket,
    pub window: TimeWindow,
    pub vehicles: Vec<VehicleID>,
    phase: Phase,
}

impl RangeQuery {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Fetches every vehicle concurrently and waits for all of them. A failed fetch only affects
    /// its own vehicle.
    pub async fn run<A: FleetApi>(self, api: &A) -> QueryOutcome {
        let window = self.window;
        let results = join_all(self.vehicles.into_iter().map(|id| async move {
            let result = api.fetch_trace(&id, &window).await;
            (id, result)
        }))
        .await;
        QueryOutcome {
            ticket: self.ticket,
            results,
        }
    }
}

pub struct QueryOutcome {
    pub ticket: Ticket,
    pub results: Vec<(VehicleID, Result<Vec<LonLat>, FetchError>)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApplyReport {
    Applied {
        updated: Vec<VehicleID>,
        /// These vehicles keep whatever trace they had before
        failed: Vec<(VehicleID, FetchError)>,
    },
    /// The selection changed while the query was in flight; nothing was written
    Discarded,
}

impl ApplyReport {
    pub fn failures(&self) -> &[(VehicleID, FetchError)] {
        match self {
            ApplyReport::Applied { failed, .. } => failed,
            ApplyReport::Discarded => &[],
        }
    }
}

struct Slot {
    revision: u64,
    phase: Phase,
}

impl Slot {
    fn new() -> Self {
        Self {
            revision: 0,
            phase: Phase::Idle,
        }
    }

    fn invalidate(&mut self) {
        self.revision += 1;
        self.phase = Phase::Idle;
    }
}

pub struct RangeQueryController<C: Clock> {
    clock: C,
    selection: Selection,
    primary: Slot,
    subtrace: Slot,
}

impl<C: Clock> RangeQueryController<C> {
    pub fn new(clock: C, selection: Selection) -> Self {
        Self {
            clock,
            selection,
            primary: Slot::new(),
            subtrace: Slot::new(),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn phase(&self, kind: TraceKind) -> Phase {
        self.slot(kind).phase
    }

    fn slot(&self, kind: TraceKind) -> &Slot {
        match kind {
            TraceKind::Primary => &self.primary,
            TraceKind::Subtrace => &self.subtrace,
        }
    }

    fn slot_mut(&mut self, kind: TraceKind) -> &mut Slot {
        match kind {
            TraceKind::Primary => &mut self.primary,
            TraceKind::Subtrace => &mut self.subtrace,
        }
    }

    /// Refetches the primary trace for the current selection.
    pub fn reload(&mut self, registry: &VehicleRegistry) -> Result<RangeQuery, FleetError> {
        let window = trailing_days(&self.clock.now(), self.selection.days);
        self.issue(TraceKind::Primary, window, registry)
    }

    pub fn select_vehicle(
        &mut self,
        vehicle: VehicleFilter,
        registry: &VehicleRegistry,
    ) -> Result<RangeQuery, FleetError> {
        if let VehicleFilter::Single(ref id) = vehicle {
            registry.lookup(id)?;
        }
        self.selection.set_vehicle(vehicle);
        // The date went back to "full" without a fetch of its own
        self.subtrace.invalidate();
        self.reload(registry)
    }

    pub fn select_days(
        &mut self,
        days: u32,
        registry: &VehicleRegistry,
    ) -> Result<RangeQuery, FleetError> {
        self.selection.set_days(days)?;
        self.subtrace.invalidate();
        self.reload(registry)
    }

    pub fn select_date(
        &mut self,
        date: DateFilter,
        registry: &VehicleRegistry,
    ) -> Result<RangeQuery, FleetError> {
        self.selection.set_date(date);
        let now = self.clock.now();
        let window = match date {
            DateFilter::Full => trailing_days(&now, self.selection.days),
            DateFilter::SingleDay(date) => single_day(&now.timezone(), date),
        };
        self.issue(TraceKind::Subtrace, window, registry)
    }

    fn issue(
        &mut self,
        kind: TraceKind,
        window: TimeWindow,
        registry: &VehicleRegistry,
    ) -> Result<RangeQuery, FleetError> {
        let (vehicles, phase) = match self.selection.vehicle {
            VehicleFilter::All => (registry.ids().cloned().collect(), Phase::FetchingAll),
            VehicleFilter::Single(ref id) => {
                registry.lookup(id)?;
                (vec![id.clone()], Phase::FetchingSingle)
            }
        };
        let slot = self.slot_mut(kind);
        slot.revision += 1;
        slot.phase = phase;
        Ok(RangeQuery {
            ticket: Ticket {
                kind,
                revision: slot.revision,
            },
            window,
            vehicles,
            phase,
        })
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.slot(ticket.kind).revision == ticket.revision
    }

    /// Writes a finished query into the state, unless a newer one superseded it.
    pub fn apply(
        &mut self,
        outcome: QueryOutcome,
        state: &mut FleetState,
    ) -> Result<ApplyReport, FleetError> {
        if !self.is_current(&outcome.ticket) {
            debug!(
                "Discarding stale {:?} results for {} vehicles",
                outcome.ticket.kind,
                outcome.results.len()
            );
            return Ok(ApplyReport::Discarded);
        }

        // Nothing is written unless every vehicle is known
        if let Some((id, _)) = outcome
            .results
            .iter()
            .find(|(id, _)| !state.registry().contains(id))
        {
            error!("Query result for {} doesn't match the registry", id);
            self.slot_mut(outcome.ticket.kind).phase = Phase::Idle;
            return Err(FleetError::NotFound(id.clone()));
        }

        let mut updated = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in outcome.results {
            match result {
                Ok(pts) => {
                    state.replace_trace(outcome.ticket.kind, &id, pts)?;
                    updated.push(id);
                }
                Err(err) => {
                    warn!("Couldn't fetch {:?} for vehicle {}: {}", outcome.ticket.kind, id, err);
                    failed.push((id, err));
                }
            }
        }
        self.slot_mut(outcome.ticket.kind).phase = Phase::Idle;
        Ok(ApplyReport::Applied { updated, failed })
    }
}
