use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tradesim::backtest::{MarketScenario, ReplayReport, SyntheticTickGenerator};
use tradesim::collections::BarAggregator;
use tradesim::config::Settings;
use tradesim::execution::{parse_point, FeedEvent, FileSource, PointParser, PriceFeed, Replay};
use tradesim::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "tradesim", about = "Tick replay and order matching simulator")]
struct Cli {
    /// Config file; defaults to config/default.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay tick files (or generated ticks) through the simulation gateway
    Replay {
        #[arg(long)]
        source: Option<PathBuf>,
        /// Driver interval in milliseconds
        #[arg(long)]
        speed: Option<u64>,
        #[arg(long)]
        synthetic: bool,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        ticks: Option<usize>,
    },
    /// Aggregate one tick file into bars and print them as JSON lines
    Bars {
        #[arg(short, long)]
        file: PathBuf,
        /// Bar length in seconds
        #[arg(long, default_value_t = 60)]
        interval: i64,
        #[arg(long)]
        instrument: Option<String>,
    },
    /// Write synthetic tick files for every configured instrument
    Generate {
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        ticks: Option<usize>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    setup_logging(&settings.log_filter);

    match cli.command {
        Command::Replay {
            source,
            speed,
            synthetic,
            seed,
            ticks,
        } => {
            let simulation = &mut settings.simulation;
            if let Some(source) = source {
                simulation.source = source;
            }
            if let Some(speed) = speed {
                simulation.speed_ms = speed;
            }
            simulation.synthetic |= synthetic;
            if let Some(seed) = seed {
                simulation.seed = seed;
            }
            if let Some(ticks) = ticks {
                simulation.ticks = ticks;
            }

            run_replay(Context::new(settings)).await
        }
        Command::Bars {
            file,
            interval,
            instrument,
        } => run_bars(&file, interval, instrument),
        Command::Generate { out, seed, ticks } => {
            if let Some(seed) = seed {
                settings.simulation.seed = seed;
            }
            if let Some(ticks) = ticks {
                settings.simulation.ticks = ticks;
            }

            run_generate(&Context::new(settings), &out)
        }
    }
}

fn setup_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_replay(context: Context) -> Result<()> {
    let gateway = Arc::new(Mutex::new(context.gateway()?));

    {
        let mut gateway = gateway.lock().map_err(|e| e.to_string())?;
        gateway.connect();
        if !gateway.is_connected() {
            return Err("Gateway failed to connect, see log for details".into());
        }
    }

    tracing::info!("Replaying every {:?}, press Ctrl+C to stop", context.speed());

    let replay = Replay::subscribe(gateway.clone(), context.speed());
    let stop = replay.abort_handle();

    let emitted = tokio::select! {
        emitted = replay.finished() => emitted,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, stopping replay");
            stop.abort();
            None
        }
    };

    let gateway = gateway.lock().map_err(|e| e.to_string())?;
    let account = gateway.account();
    let ticks = emitted.unwrap_or_else(|| account.instruments.iter().map(|i| i.points.len()).sum());

    ReplayReport::from_account(account, ticks).print_report();
    Ok(())
}

fn run_bars(file: &Path, interval: i64, instrument: Option<String>) -> Result<()> {
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("Not a tick file: {}", file.display()))?
        .to_string();
    let dir = file.parent().unwrap_or_else(|| Path::new("."));

    let mut feed = PriceFeed::open(&FileSource::new(dir), &[name.clone()])?;
    let parser: PointParser = Box::new(parse_point);
    let interval = chrono::Duration::seconds(interval);
    let instrument = instrument.unwrap_or(name);

    let mut bars = BarAggregator::new();
    loop {
        match feed.next_point(&parser) {
            FeedEvent::Point { mut point, .. } => {
                point.instrument = Some(instrument.clone());
                point.time_frame = Some(interval);
                bars.add(point, interval);
            }
            FeedEvent::Pending => {}
            FeedEvent::Exhausted => break,
        }
    }

    for bar in bars.iter() {
        println!("{}", serde_json::to_string(bar)?);
    }

    tracing::info!(instrument = %instrument, "Aggregated {} bars", bars.len());
    Ok(())
}

fn run_generate(context: &Context, out: &Path) -> Result<()> {
    let profiles = context.tick_profiles();
    if profiles.is_empty() {
        return Err("No instruments configured".into());
    }

    let simulation = &context.settings().simulation;
    let written = SyntheticTickGenerator::new(simulation.seed).write_files(
        out,
        MarketScenario::Sideways,
        &profiles,
        simulation.ticks,
    )?;

    println!("Wrote {} tick files to {}", written, out.display());
    Ok(())
}
