//! Drains the many-to-one ring buffer and re-broadcasts every message.
//!
//! Usage: `tessera-relay [config.toml]`. Without an argument the built-in
//! defaults are used.

use anyhow::{Context, Result};
use std::process;
use std::time::{Duration, Instant};
use tessera_config::TesseraConfig;
use tessera_ipc::{
    BroadcastTransmitter, CountersManager, IpcError, ManyToOneRingBuffer, MappedRegion,
    EpochClock, SystemEpochClock,
};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tessera-relay: {e:#}");
            process::exit(2);
        }
    };
    setup_tracing(&config.log_level);

    info!("tessera-relay v{} starting", env!("CARGO_PKG_VERSION"));
    if let Err(e) = run(&config) {
        error!("FATAL: {e:#}");
        process::exit(1);
    }
}

fn load_config() -> Result<TesseraConfig> {
    match std::env::args().nth(1) {
        Some(path) => TesseraConfig::load(&path).with_context(|| format!("loading {path}")),
        None => Ok(TesseraConfig::default()),
    }
}

fn setup_tracing(log_level: &str) {
    let level = log_level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

fn run(config: &TesseraConfig) -> Result<()> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("creating {}", config.dir.display()))?;

    let counters_region =
        MappedRegion::create_counters(config.counters_path(), config.counters.max_counters)
            .context("creating counters region")?;
    let mut counters = CountersManager::with_clock(
        counters_region.primary(),
        counters_region.secondary(),
        SystemEpochClock,
        config.reuse_timeout(),
    )?;
    let messages = counters.new_counter("relay.messages", 0)?;
    let bytes = counters.new_counter("relay.bytes", 0)?;
    let dropped = counters.new_counter("relay.dropped", 0)?;
    let unblocks = counters.new_counter("relay.unblocks", 0)?;
    let heartbeat = counters.new_counter("relay.heartbeat_ms", 0)?;

    let broadcast_region =
        MappedRegion::create_broadcast(config.broadcast_path(), config.broadcast.capacity)
            .context("creating broadcast region")?;
    let mut transmitter = BroadcastTransmitter::new(broadcast_region.primary())?;

    let ring_region =
        MappedRegion::create_ring_buffer(config.ring_buffer_path(), config.ring_buffer.capacity)
            .context("creating ring buffer region")?;
    let ring = ManyToOneRingBuffer::new(ring_region.primary())?;

    info!(
        dir = %config.dir.display(),
        ring_capacity = ring.capacity(),
        broadcast_capacity = transmitter.capacity(),
        "relay ready"
    );

    let clock = SystemEpochClock;
    let idle_sleep = config.idle_sleep();
    let unblock_timeout = config.unblock_timeout();
    let mut scratch = vec![0u8; ring.max_msg_length()];

    let mut last_consumer_position = ring.consumer_position();
    let mut last_progress = Instant::now();
    let mut last_status = Instant::now();

    loop {
        let now_ms = clock.time_ms();
        ring.set_consumer_heartbeat_time(now_ms);
        heartbeat.set(now_ms);

        let read = ring.read(|msg_type_id, buffer, offset, length| {
            let message = &mut scratch[..length];
            buffer.get_bytes(offset, message);
            match transmitter.transmit(msg_type_id, message) {
                Ok(()) => {
                    messages.increment();
                    bytes.get_and_add(length as i64);
                }
                Err(e @ IpcError::MessageTooLong { .. }) => {
                    dropped.increment();
                    debug!(msg_type_id, length, "dropped: {e}");
                }
                Err(e) => {
                    dropped.increment();
                    warn!(msg_type_id, length, "transmit failed: {e}");
                }
            }
        });

        let position = ring.consumer_position();
        if position != last_consumer_position {
            last_consumer_position = position;
            last_progress = Instant::now();
        } else if ring.size() > 0 && last_progress.elapsed() >= unblock_timeout {
            if ring.unblock() {
                unblocks.increment();
                warn!(position, "unblocked ring buffer after stalled producer");
            }
            last_progress = Instant::now();
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            info!(
                messages = messages.get(),
                bytes = bytes.get(),
                dropped = dropped.get(),
                unblocks = unblocks.get(),
                lag = ring.size(),
                "relay status"
            );
            last_status = Instant::now();
        }

        if read == 0 {
            std::thread::sleep(idle_sleep);
        }
    }
}
