//! Shared measurement helpers for the tessera benches and `perf_report`.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

/// Latency distribution of a run, in nanoseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub min: u64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub max: u64,
    pub mean: f64,
}

impl LatencyStats {
    /// Sorts `samples` in place and summarises them. `None` when empty.
    pub fn from_samples(samples: &mut [u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let total: u128 = samples.iter().map(|&s| s as u128).sum();
        Some(Self {
            count: samples.len(),
            min: samples[0],
            p50: nearest_rank(samples, 50.0),
            p90: nearest_rank(samples, 90.0),
            p99: nearest_rank(samples, 99.0),
            p999: nearest_rank(samples, 99.9),
            max: samples[samples.len() - 1],
            mean: total as f64 / samples.len() as f64,
        })
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    let rank = (percentile / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchResult {
    pub name: String,
    pub stats: LatencyStats,
}

/// How many timed batches to run and how many calls each batch makes.
#[derive(Debug, Clone, Copy)]
pub struct BatchPlan {
    pub batches: usize,
    pub calls_per_batch: usize,
    pub warmup_batches: usize,
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self {
            batches: 1_000,
            calls_per_batch: 100,
            warmup_batches: 100,
        }
    }
}

/// Times `op` batch by batch; each sample is the mean ns per call of one
/// batch, which keeps timer overhead out of sub-100ns operations.
pub fn measure_batched<F: FnMut()>(name: &str, plan: BatchPlan, mut op: F) -> BenchResult {
    let calls = plan.calls_per_batch.max(1);
    for _ in 0..plan.warmup_batches * calls {
        op();
    }

    let mut samples: Vec<u64> = (0..plan.batches.max(1))
        .map(|_| {
            let start = Instant::now();
            for _ in 0..calls {
                op();
            }
            (start.elapsed().as_nanos() / calls as u128).max(1) as u64
        })
        .collect();

    BenchResult {
        name: name.to_string(),
        stats: LatencyStats::from_samples(&mut samples).unwrap_or(LatencyStats {
            count: 0,
            min: 0,
            p50: 0,
            p90: 0,
            p99: 0,
            p999: 0,
            max: 0,
            mean: 0.0,
        }),
    }
}

/// A per-process scratch path for a bench region file.
pub fn temp_shm_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tessera_bench_{label}_{}", std::process::id()))
}

/// Nanoseconds since the first call in this process. Comparable across
/// threads, not across processes.
#[inline]
pub fn mono_now_ns() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// `1234567` -> `1.23M`.
pub fn format_count(n: u64) -> String {
    match n {
        0..1_000 => n.to_string(),
        1_000..1_000_000 => format!("{:.1}K", n as f64 / 1e3),
        _ => format!("{:.2}M", n as f64 / 1e6),
    }
}

pub fn print_section(title: &str) {
    println!("\n== {title} ==");
    println!(
        "  {:<30} {:>7} {:>7} {:>7} {:>7} {:>7} {:>9}",
        "ns/op", "p50", "p90", "p99", "p99.9", "max", "mean"
    );
}

pub fn print_result(result: &BenchResult) {
    let s = &result.stats;
    println!(
        "  {:<30} {:>7} {:>7} {:>7} {:>7} {:>7} {:>9.1}",
        result.name, s.p50, s.p90, s.p99, s.p999, s.max, s.mean
    );
}
