#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::path::Path;

use anyhow::Result;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use model::{DateFilter, FleetState, LocalClock, OrgID, TraceKind, VehicleFilter, VehicleID};
use tracker::{Config, FleetApi, HttpFleetApi, LiveFeed, Synchronizer};

#[derive(StructOpt)]
#[structopt(name = "fleet-tracker", about = "Follow a cultivator fleet from the dashboard API")]
struct Args {
    /// A JSON config file. Any flag below overrides the value from it.
    #[structopt(long)]
    config: Option<String>,
    #[structopt(long)]
    api_url: Option<String>,
    #[structopt(long)]
    org: Option<String>,
    #[structopt(long)]
    user: Option<String>,
    /// Only track these vehicles. Repeat the flag for more than one.
    #[structopt(long = "vehicle")]
    vehicles: Vec<String>,
    /// "all" or one vehicle id
    #[structopt(long, default_value = "all")]
    select: VehicleFilter,
    /// How many days of traces to show, today included
    #[structopt(long)]
    days: Option<u32>,
    /// "full" or YYYY-MM-DD, highlighting one day of the traces
    #[structopt(long, default_value = "full")]
    date: DateFilter,
    /// WebSocket URL of the live position feed, like ws://localhost:22080/ws
    #[structopt(long)]
    feed: Option<String>,
    /// Replay live positions from a JSON-lines file
    #[structopt(long)]
    replay: Option<String>,
    /// Where to write the GeoJSON output
    #[structopt(long, default_value = ".")]
    out: String,
    /// Also write hourly distances for the selection to hourly.csv
    #[structopt(long)]
    hourly: bool,
}

impl Args {
    fn config(&self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::load(path)?,
            None => Config::new(
                self.api_url.as_deref().unwrap_or_default(),
                self.org.as_deref().unwrap_or_default(),
            ),
        };
        if let Some(ref url) = self.api_url {
            config.api_url = url.clone();
        }
        if let Some(ref org) = self.org {
            config.org_id = OrgID(org.clone());
        }
        if self.user.is_some() {
            config.user_id = self.user.clone();
        }
        if !self.vehicles.is_empty() {
            config.vehicle_allowlist = self.vehicles.iter().map(VehicleID::new).collect();
        }
        if let Some(days) = self.days {
            config.default_days = days;
        }
        config.validate()?;
        Ok(config)
    }

    async fn live_feed(&self, ids: &[VehicleID]) -> Result<Option<LiveFeed>> {
        if self.feed.is_some() && self.replay.is_some() {
            bail!("Pick either --feed or --replay, not both");
        }
        if let Some(ref url) = self.feed {
            return Ok(Some(LiveFeed::connect(url, ids).await?));
        }
        if let Some(ref path) = self.replay {
            let file = tokio::fs::File::open(path).await?;
            return Ok(Some(LiveFeed::from_lines(tokio::io::BufReader::new(file))));
        }
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::from_args();
    let config = args.config()?;
    let api = HttpFleetApi::new(&config.api_url, config.request_timeout())?;
    let mut sync = Synchronizer::new(api, LocalClock, config)?;
    sync.initialize().await?;

    apply_selection(&mut sync, &args).await?;
    print_fleet(&sync);

    let ids: Vec<VehicleID> = match sync.registry() {
        Some(registry) => registry.ids().cloned().collect(),
        None => Vec::new(),
    };
    if let Some(mut feed) = args.live_feed(&ids).await? {
        let mut applied = 0;
        let mut dropped = 0;
        loop {
            tokio::select! {
                ev = feed.next_event() => match ev {
                    Some(ev) => {
                        if sync.apply_live_event(&ev) {
                            applied += 1;
                        } else {
                            dropped += 1;
                        }
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        info!("Applied {} live positions, dropped {}", applied, dropped);
    }

    if let Some(state) = sync.state() {
        write_geojson(state, &args.out)?;
    }

    if args.hourly {
        let selection = sync.selection().clone();
        let report = sync.hourly_report(selection.vehicle, selection.date).await;
        println!("{} ({})", report.title(), report.subtitle());
        let path = Path::new(&args.out).join("hourly.csv");
        fs_err::write(&path, report.export_to_csv()?)?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}

async fn apply_selection<A: FleetApi>(
    sync: &mut Synchronizer<A, LocalClock>,
    args: &Args,
) -> Result<()> {
    let mut reports = Vec::new();
    if args.select != VehicleFilter::All {
        reports.push(sync.select_vehicle(args.select.clone()).await?);
    }
    if args.date != DateFilter::Full {
        reports.push(sync.select_date(args.date).await?);
    }
    let failed: usize = reports.iter().map(|report| report.failures().len()).sum();
    if failed > 0 {
        warn!("{} trace queries failed; those vehicles show partial data", failed);
    }
    Ok(())
}

fn print_fleet<A: FleetApi>(sync: &Synchronizer<A, LocalClock>) {
    let registry = match sync.registry() {
        Some(registry) => registry,
        None => return,
    };
    println!("{} vehicles", registry.len());
    for vehicle in registry.vehicles() {
        println!("  {:>6}  {}", vehicle.id, vehicle.status);
    }
    let dates: Vec<String> = sync
        .date_choices()
        .into_iter()
        .map(|date| date.to_string())
        .collect();
    println!("Selection: {:?}", sync.selection());
    println!("Dates: {}", dates.join(", "));
}

fn write_geojson(state: &FleetState, out: &str) -> Result<()> {
    fs_err::create_dir_all(out)?;
    let now = chrono::Utc::now();
    for (name, collection) in [
        ("trace.geojson", state.traces_geojson(TraceKind::Primary)),
        ("subtrace.geojson", state.traces_geojson(TraceKind::Subtrace)),
        ("positions.geojson", state.positions_geojson(now)),
    ] {
        let path = Path::new(out).join(name);
        fs_err::write(&path, serde_json::to_string_pretty(&collection)?)?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}
