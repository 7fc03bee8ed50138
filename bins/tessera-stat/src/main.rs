//! Prints the relay's counters once a second and drains its broadcast log.
//!
//! Usage: `tessera-stat [config.toml] [--once]`. With `--once` the counters
//! are printed a single time and the broadcast log is left alone.

use anyhow::{Context, Result};
use std::process;
use std::time::{Duration, Instant};
use tessera_config::TesseraConfig;
use tessera_ipc::{
    BroadcastReceiver, CopyBroadcastReceiver, CountersReader, IpcError, MappedRegion,
    ReceiverStart, RegionKind,
};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

const PRINT_INTERVAL: Duration = Duration::from_secs(1);

struct Args {
    config: Option<String>,
    once: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        once: false,
    };
    for arg in std::env::args().skip(1) {
        if arg == "--once" {
            args.once = true;
        } else {
            args.config = Some(arg);
        }
    }
    args
}

fn main() {
    let args = parse_args();
    let config = match &args.config {
        Some(path) => match TesseraConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("tessera-stat: loading {path}: {e}");
                process::exit(2);
            }
        },
        None => TesseraConfig::default(),
    };
    setup_tracing(&config.log_level);

    if let Err(e) = run(&config, args.once) {
        error!("FATAL: {e:#}");
        process::exit(1);
    }
}

fn setup_tracing(log_level: &str) {
    let level = log_level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn run(config: &TesseraConfig, once: bool) -> Result<()> {
    let counters_path = config.counters_path();
    let counters_region = MappedRegion::open(&counters_path, RegionKind::Counters)
        .with_context(|| format!("opening {}", counters_path.display()))?;
    let counters = CountersReader::new(counters_region.primary(), counters_region.secondary())?;

    if once {
        print_counters(&counters);
        return Ok(());
    }

    let broadcast_path = config.broadcast_path();
    let broadcast_region = MappedRegion::open(&broadcast_path, RegionKind::Broadcast)
        .with_context(|| format!("opening {}", broadcast_path.display()))?;
    let start = ReceiverStart::from(config.broadcast.receiver_start);
    let receiver = BroadcastReceiver::new(broadcast_region.primary(), start)?;
    let mut receiver = CopyBroadcastReceiver::new(receiver);
    info!(?start, "attached to {}", broadcast_path.display());

    let idle_sleep = config.idle_sleep();
    let mut received = 0u64;
    let mut received_bytes = 0u64;
    let mut unable_to_keep_up = 0u64;
    let mut last_print = Instant::now();

    loop {
        let delivered = match receiver.receive(|_, bytes| {
            received += 1;
            received_bytes += bytes.len() as u64;
        }) {
            Ok(n) => n,
            Err(IpcError::UnableToKeepUp) => {
                unable_to_keep_up += 1;
                1
            }
            Err(e) => {
                warn!("broadcast receive failed: {e}");
                0
            }
        };

        if last_print.elapsed() >= PRINT_INTERVAL {
            print_counters(&counters);
            println!(
                "  broadcast: {received} messages, {received_bytes} bytes, {} laps, {unable_to_keep_up} dropped",
                receiver.receiver().lapped_count()
            );
            last_print = Instant::now();
        }

        if delivered == 0 {
            std::thread::sleep(idle_sleep);
        }
    }
}

fn print_counters(counters: &CountersReader<'_>) {
    println!("{:>4}  {:>20}  {:>6}  label", "id", "value", "type");
    counters.for_each_metadata(|id, type_id, _, label| {
        println!(
            "{id:>4}  {:>20}  {type_id:>6}  {label}",
            counters.counter_value(id)
        );
    });
}
