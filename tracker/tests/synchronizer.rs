use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use futures::channel::oneshot;
use futures::executor::block_on;

use model::{
    DateFilter, FixedClock, FleetError, LonLat, OrgID, PositionSample, RawVehicle, TimeWindow,
    TraceKind, VehicleFilter, VehicleID,
};
use tracker::{ApplyReport, Config, FetchError, FleetApi, LiveEvent, Phase, Synchronizer};

const NOW: &str = "2026-10-17T09:30:00-07:00";

fn now() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(NOW).unwrap()
}

fn id(x: &str) -> VehicleID {
    VehicleID::new(x)
}

fn pt(lon: f64, lat: f64) -> LonLat {
    LonLat::new(lon, lat)
}

#[derive(Default)]
struct Backend {
    // None means the snapshot request fails
    vehicles: Option<Vec<RawVehicle>>,
    traces: HashMap<VehicleID, Vec<LonLat>>,
    failing: HashSet<VehicleID>,
    positions: HashMap<VehicleID, PositionSample>,
    // Trace fetches for these vehicles wait until the test resolves them
    gates: HashMap<VehicleID, oneshot::Receiver<Vec<LonLat>>>,
    trace_calls: Vec<(VehicleID, TimeWindow)>,
    distance_calls: usize,
}

#[derive(Clone, Default)]
struct FakeApi {
    backend: Rc<RefCell<Backend>>,
}

impl FakeApi {
    fn fleet(ids: &[&str]) -> Self {
        let api = FakeApi::default();
        {
            let mut backend = api.backend.borrow_mut();
            backend.vehicles = Some(
                ids.iter()
                    .map(|x| RawVehicle {
                        id: id(x),
                        org: Some("1".to_string()),
                        description: serde_json::Value::Null,
                        ipv4: None,
                        last_position: None,
                        cams: Vec::new(),
                    })
                    .collect(),
            );
            for (idx, x) in ids.iter().enumerate() {
                backend
                    .traces
                    .insert(id(x), vec![pt(idx as f64, 0.0), pt(idx as f64, 1.0)]);
            }
        }
        api
    }

    fn set_trace(&self, vehicle: &str, pts: Vec<LonLat>) {
        self.backend.borrow_mut().traces.insert(id(vehicle), pts);
    }

    fn fail(&self, vehicle: &str) {
        self.backend.borrow_mut().failing.insert(id(vehicle));
    }

    fn gate(&self, vehicle: &str) -> oneshot::Sender<Vec<LonLat>> {
        let (tx, rx) = oneshot::channel();
        self.backend.borrow_mut().gates.insert(id(vehicle), rx);
        tx
    }

    fn trace_calls(&self) -> Vec<(VehicleID, TimeWindow)> {
        self.backend.borrow().trace_calls.clone()
    }
}

fn server_error() -> FetchError {
    FetchError::Status {
        status: 500,
        message: "boom".to_string(),
    }
}

impl FleetApi for FakeApi {
    async fn fetch_vehicles(&self, _: &OrgID) -> Result<Vec<RawVehicle>, FetchError> {
        self.backend
            .borrow()
            .vehicles
            .clone()
            .ok_or_else(server_error)
    }

    async fn fetch_trace(
        &self,
        vehicle: &VehicleID,
        window: &TimeWindow,
    ) -> Result<Vec<LonLat>, FetchError> {
        let gate = {
            let mut backend = self.backend.borrow_mut();
            backend.trace_calls.push((vehicle.clone(), *window));
            backend.gates.remove(vehicle)
        };
        if let Some(gate) = gate {
            return gate
                .await
                .map_err(|_| FetchError::Transport("gate dropped".to_string()));
        }
        let backend = self.backend.borrow();
        if backend.failing.contains(vehicle) {
            return Err(server_error());
        }
        Ok(backend.traces.get(vehicle).cloned().unwrap_or_default())
    }

    async fn fetch_latest_position(
        &self,
        vehicle: &VehicleID,
    ) -> Result<Option<PositionSample>, FetchError> {
        Ok(self.backend.borrow().positions.get(vehicle).cloned())
    }

    async fn fetch_distance(
        &self,
        vehicle: &VehicleID,
        window: &TimeWindow,
    ) -> Result<Option<f64>, FetchError> {
        let mut backend = self.backend.borrow_mut();
        backend.distance_calls += 1;
        if backend.failing.contains(vehicle) {
            return Err(server_error());
        }
        // 100 meters per hour of the day
        let hour = window.begin.with_timezone(&now().timezone()).format("%H");
        Ok(Some(hour.to_string().parse::<f64>().unwrap() * 100.0))
    }

    async fn fetch_avg_distance(&self, window: &TimeWindow) -> Result<Option<f64>, FetchError> {
        let mut backend = self.backend.borrow_mut();
        backend.distance_calls += 1;
        let hour = window.begin.with_timezone(&now().timezone()).format("%H");
        if hour.to_string() == "12" {
            return Err(FetchError::Transport("timed out".to_string()));
        }
        Ok(Some(50.0))
    }
}

fn synchronizer(api: &FakeApi) -> Synchronizer<FakeApi, FixedClock> {
    Synchronizer::new(
        api.clone(),
        FixedClock::new(now()),
        Config::new("http://localhost:22080/api", "1"),
    )
    .unwrap()
}

fn initialized(api: &FakeApi) -> Synchronizer<FakeApi, FixedClock> {
    let mut sync = synchronizer(api);
    block_on(sync.initialize()).unwrap();
    sync
}

fn primary(sync: &Synchronizer<FakeApi, FixedClock>, vehicle: &str) -> Vec<LonLat> {
    sync.state()
        .unwrap()
        .trace(TraceKind::Primary, &id(vehicle))
        .unwrap()
        .points()
        .to_vec()
}

#[test]
fn initialize_loads_everything() {
    let api = FakeApi::fleet(&["10", "2", "3"]);
    api.backend.borrow_mut().positions.insert(
        id("2"),
        PositionSample {
            ts: "2026-10-17T16:29:30Z".to_string(),
            lon: 5.0,
            lat: 6.0,
        },
    );
    api.backend.borrow_mut().positions.insert(
        id("3"),
        PositionSample {
            ts: "yesterday".to_string(),
            lon: 7.0,
            lat: 8.0,
        },
    );
    let sync = initialized(&api);

    let ids: Vec<_> = sync.registry().unwrap().ids().cloned().collect();
    assert_eq!(ids, vec![id("2"), id("3"), id("10")]);

    let state = sync.state().unwrap();
    let utc_now = now().with_timezone(&Utc);
    let latest = state.latest(&id("2")).unwrap();
    assert_eq!(latest.pos, Some(pt(5.0, 6.0)));
    assert_eq!(latest.age_secs(utc_now), 30.0);
    let unreadable = state.latest(&id("3")).unwrap();
    assert_eq!(unreadable.pos, Some(pt(7.0, 8.0)));
    assert_eq!(unreadable.age(utc_now), Duration::days(365));
    assert_eq!(state.latest(&id("10")).unwrap().pos, None);

    // The initial primary trace covers the default 3 days
    assert_eq!(primary(&sync, "10"), vec![pt(0.0, 0.0), pt(0.0, 1.0)]);
    let calls = api.trace_calls();
    assert_eq!(calls.len(), 3);
    for (_, window) in calls {
        assert_eq!(window.ts_begin(), "2026-10-15T07:00:00.000Z");
        assert_eq!(window.end, utc_now);
    }
    assert_eq!(sync.phase(TraceKind::Primary), Phase::Idle);
}

#[test]
fn failed_snapshot_leaves_nothing_loaded() {
    let api = FakeApi::default();
    let mut sync = synchronizer(&api);
    assert!(block_on(sync.initialize()).is_err());
    assert!(sync.state().is_none());
    assert!(api.trace_calls().is_empty());
    assert_eq!(
        block_on(sync.select_days(5)).unwrap_err(),
        FleetError::Uninitialized
    );
}

#[test]
fn one_failure_does_not_block_the_rest() {
    let api = FakeApi::fleet(&["2", "3", "4"]);
    let mut sync = initialized(&api);
    let before = primary(&sync, "3");

    api.set_trace("2", vec![pt(9.0, 9.0)]);
    api.set_trace("4", vec![pt(8.0, 8.0)]);
    api.fail("3");
    let report = block_on(sync.select_days(7)).unwrap();

    assert_eq!(
        report,
        ApplyReport::Applied {
            updated: vec![id("2"), id("4")],
            failed: vec![(id("3"), server_error())],
        }
    );
    assert_eq!(primary(&sync, "2"), vec![pt(9.0, 9.0)]);
    assert_eq!(primary(&sync, "4"), vec![pt(8.0, 8.0)]);
    assert_eq!(primary(&sync, "3"), before);
    assert_eq!(sync.phase(TraceKind::Primary), Phase::Idle);
}

#[test]
fn stale_results_are_discarded() {
    let api = FakeApi::fleet(&["2", "3"]);
    let mut sync = initialized(&api);

    let slow = api.gate("2");
    let fast = api.gate("3");
    let first = sync.plan_vehicle(VehicleFilter::Single(id("2"))).unwrap();
    let second = sync.plan_vehicle(VehicleFilter::Single(id("3"))).unwrap();
    assert_eq!(sync.phase(TraceKind::Primary), Phase::FetchingSingle);

    let first = first.run(&api);
    let second = second.run(&api);

    fast.send(vec![pt(3.0, 3.0)]).unwrap();
    let second = block_on(second);
    assert!(matches!(
        sync.complete(second).unwrap(),
        ApplyReport::Applied { .. }
    ));

    // The older query finishes last, after the newer one was already applied
    slow.send(vec![pt(2.0, 2.0)]).unwrap();
    let first = block_on(first);
    assert_eq!(sync.complete(first).unwrap(), ApplyReport::Discarded);

    assert_eq!(primary(&sync, "3"), vec![pt(3.0, 3.0)]);
    assert_eq!(primary(&sync, "2"), vec![pt(0.0, 0.0), pt(0.0, 1.0)]);
    assert_eq!(sync.selection().vehicle, VehicleFilter::Single(id("3")));
}

#[test]
fn older_result_arriving_first_is_still_discarded() {
    let api = FakeApi::fleet(&["2", "3"]);
    let mut sync = initialized(&api);

    let first = sync.plan_days(5).unwrap();
    let second = sync.plan_days(7).unwrap();
    api.set_trace("2", vec![pt(7.0, 7.0)]);

    let first = block_on(first.run(&api));
    assert_eq!(sync.complete(first).unwrap(), ApplyReport::Discarded);
    assert_eq!(sync.phase(TraceKind::Primary), Phase::FetchingAll);

    let second = block_on(second.run(&api));
    assert!(matches!(
        sync.complete(second).unwrap(),
        ApplyReport::Applied { .. }
    ));
    assert_eq!(primary(&sync, "2"), vec![pt(7.0, 7.0)]);
    assert_eq!(sync.phase(TraceKind::Primary), Phase::Idle);
}

#[test]
fn day_count_change_resets_the_date() {
    let api = FakeApi::fleet(&["2"]);
    let mut sync = initialized(&api);
    let utc_now = now().with_timezone(&Utc);

    block_on(sync.select_date("2026-10-16".parse().unwrap())).unwrap();
    let subtrace = sync
        .state()
        .unwrap()
        .trace(TraceKind::Subtrace, &id("2"))
        .unwrap();
    assert_eq!(subtrace.len(), 2);

    let calls_before = api.trace_calls().len();
    block_on(sync.select_days(7)).unwrap();
    let calls = api.trace_calls();
    // Only the primary trace was refetched
    assert_eq!(calls.len(), calls_before + 1);
    let (_, window) = calls.last().unwrap();
    assert_eq!(window.ts_begin(), "2026-10-11T07:00:00.000Z");
    assert_eq!(window.end, utc_now);

    assert_eq!(sync.selection().days, 7);
    assert_eq!(sync.selection().date, DateFilter::Full);
    assert_eq!(sync.phase(TraceKind::Subtrace), Phase::Idle);
    assert_eq!(sync.date_choices().len(), 7);
}

#[test]
fn single_day_subtrace() {
    let api = FakeApi::fleet(&["2", "3"]);
    let mut sync = initialized(&api);
    block_on(sync.select_vehicle(VehicleFilter::Single(id("3")))).unwrap();

    api.set_trace("3", vec![pt(4.0, 4.0)]);
    let report = block_on(sync.select_date("2026-10-16".parse().unwrap())).unwrap();
    assert_eq!(
        report,
        ApplyReport::Applied {
            updated: vec![id("3")],
            failed: Vec::new(),
        }
    );

    let (vehicle, window) = api.trace_calls().last().cloned().unwrap();
    assert_eq!(vehicle, id("3"));
    assert_eq!(window.ts_begin(), "2026-10-16T07:00:00.000Z");
    assert_eq!(window.ts_end(), "2026-10-17T06:59:59.000Z");

    let state = sync.state().unwrap();
    assert_eq!(
        state.trace(TraceKind::Subtrace, &id("3")).unwrap().points(),
        &[pt(4.0, 4.0)]
    );
    // Picking a date cleared every subtrace first
    assert!(state.trace(TraceKind::Subtrace, &id("2")).unwrap().is_empty());
}

#[test]
fn unknown_vehicle_selection_is_rejected() {
    let api = FakeApi::fleet(&["2"]);
    let mut sync = initialized(&api);
    let calls = api.trace_calls().len();
    assert_eq!(
        block_on(sync.select_vehicle(VehicleFilter::Single(id("99")))).unwrap_err(),
        FleetError::NotFound(id("99"))
    );
    assert_eq!(sync.selection().vehicle, VehicleFilter::All);
    assert_eq!(api.trace_calls().len(), calls);
}

#[test]
fn live_events() {
    let api = FakeApi::fleet(&["2", "3"]);
    let mut sync = initialized(&api);

    let ev = LiveEvent {
        vehicle: id("2"),
        ts: "2026-10-17T16:30:00Z".to_string(),
        lon: 11.0,
        lat: 12.0,
    };
    assert!(sync.apply_live_event(&ev));
    let state = sync.state().unwrap();
    assert_eq!(primary(&sync, "2").last(), Some(&pt(11.0, 12.0)));
    assert_eq!(primary(&sync, "2").len(), 3);
    let latest = state.latest(&id("2")).unwrap();
    assert_eq!(latest.pos, Some(pt(11.0, 12.0)));
    assert_eq!(latest.age_secs(now().with_timezone(&Utc)), 0.0);

    let latest_before = latest.clone();
    let unknown = LiveEvent {
        vehicle: id("77"),
        ..ev
    };
    assert!(!sync.apply_live_event(&unknown));
    let state = sync.state().unwrap();
    assert_eq!(state.latest(&id("2")), Some(&latest_before));
    assert_eq!(state.latest(&id("3")).unwrap().pos, None);
    assert_eq!(primary(&sync, "2").len(), 3);
    assert_eq!(primary(&sync, "3").len(), 2);
    assert_eq!(state.registry().len(), 2);
}

#[test]
fn live_events_before_initialize_are_dropped() {
    let api = FakeApi::fleet(&["2"]);
    let mut sync = synchronizer(&api);
    let ev = LiveEvent {
        vehicle: id("2"),
        ts: NOW.to_string(),
        lon: 1.0,
        lat: 1.0,
    };
    assert!(!sync.apply_live_event(&ev));
}

#[test]
fn selection_changes_are_broadcast() {
    let api = FakeApi::fleet(&["2", "3"]);
    let mut sync = initialized(&api);
    let mut rx = sync.subscribe();

    block_on(sync.select_vehicle(VehicleFilter::Single(id("3")))).unwrap();
    block_on(sync.select_days(4)).unwrap();

    let first = rx.try_next().unwrap().unwrap();
    assert_eq!(first.vehicle, VehicleFilter::Single(id("3")));
    assert_eq!(first.days, 3);
    let second = rx.try_next().unwrap().unwrap();
    assert_eq!(second.days, 4);
    assert!(rx.try_next().is_err());

    // A dropped listener doesn't break later changes
    drop(rx);
    block_on(sync.select_days(5)).unwrap();
}

#[test]
fn projection_follows_selection() {
    let api = FakeApi::fleet(&["2", "3"]);
    let mut sync = initialized(&api);
    let projection = sync.projection().unwrap();
    assert!(projection.shows(&id("2")));
    assert!(projection.shows(&id("3")));

    block_on(sync.select_vehicle(VehicleFilter::Single(id("3")))).unwrap();
    let projection = sync.projection().unwrap();
    assert!(!projection.shows(&id("2")));
    assert!(projection.shows(&id("3")));
}

#[test]
fn hourly_report_for_one_vehicle() {
    let api = FakeApi::fleet(&["2"]);
    let sync = initialized(&api);
    let report = block_on(sync.hourly_report(
        VehicleFilter::Single(id("2")),
        "2026-10-16".parse().unwrap(),
    ));
    assert!(!report.today);
    assert_eq!(report.rows.len(), 15);
    assert_eq!(report.rows[0].hour, 6);
    assert_eq!(report.rows[0].speed, Some(600.0));
    assert_eq!(report.rows[14].hour, 20);
    assert_eq!(report.rows[14].speed, Some(2000.0));
    assert_eq!(api.backend.borrow().distance_calls, 15);
}

#[test]
fn hourly_report_keeps_going_past_failed_hours() {
    let api = FakeApi::fleet(&["2"]);
    let sync = initialized(&api);
    let report = block_on(sync.hourly_report(VehicleFilter::All, DateFilter::Full));
    assert!(report.today);
    assert_eq!(report.date, now().date_naive());
    for row in &report.rows {
        if row.hour == 12 {
            assert_eq!(row.speed, None);
        } else {
            assert_eq!(row.speed, Some(50.0));
        }
    }
    assert!(report.export_to_csv().unwrap().lines().count() > 15);
}
