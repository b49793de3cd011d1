//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters shared by the producer and every consumer.
///
/// Every field only ever grows; there is no reset.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Items synthesized and offered to the channel
    pub produced: AtomicU64,

    /// Items persisted by the sink
    pub saved: AtomicU64,

    /// Items evicted or refused by the channel's overflow policy
    pub dropped_by_overflow: AtomicU64,

    /// Slots skipped because their deadline had already passed
    pub dropped_by_deadline: AtomicU64,

    /// Total bytes reported by the sink
    pub bytes_written: AtomicU64,

    /// Slots where the generator failed
    pub generation_failures: AtomicU64,

    /// Items the sink failed to persist
    pub sink_failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    /// Time spent generating payloads (microseconds)
    pub generate_us: AtomicU64,

    /// Time spent persisting payloads (microseconds, summed across workers)
    pub persist_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record an item offered to the channel.
    pub fn add_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a persisted item and its size.
    pub fn add_saved(&self, bytes: u64) {
        self.saved.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record an item lost to the overflow policy.
    pub fn add_dropped_by_overflow(&self) {
        self.dropped_by_overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Record skipped slots.
    pub fn add_dropped_by_deadline(&self, slots: u64) {
        self.dropped_by_deadline.fetch_add(slots, Ordering::Relaxed);
    }

    /// Record a generator failure.
    pub fn add_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sink failure.
    pub fn add_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent generating (in microseconds).
    pub fn add_generate_time(&self, duration: Duration) {
        self.generate_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent persisting (in microseconds).
    pub fn add_persist_time(&self, duration: Duration) {
        self.persist_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get saved items per second.
    pub fn saved_per_second(&self) -> f64 {
        per_second(self.saved.load(Ordering::Relaxed), self.elapsed())
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.elapsed();
        let saved = self.saved.load(Ordering::Relaxed);
        let bytes_written = self.bytes_written.load(Ordering::Relaxed);

        MetricsSnapshot {
            produced: self.produced.load(Ordering::Relaxed),
            saved,
            dropped_by_overflow: self.dropped_by_overflow.load(Ordering::Relaxed),
            dropped_by_deadline: self.dropped_by_deadline.load(Ordering::Relaxed),
            bytes_written,
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            elapsed,
            saved_per_second: per_second(saved, elapsed),
            write_throughput_mbps: per_second(bytes_written, elapsed) / (1024.0 * 1024.0),
            generate_secs: self.generate_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            persist_secs: self.persist_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub produced: u64,
    pub saved: u64,
    pub dropped_by_overflow: u64,
    pub dropped_by_deadline: u64,
    pub bytes_written: u64,
    pub generation_failures: u64,
    pub sink_failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub saved_per_second: f64,
    pub write_throughput_mbps: f64,
    /// Total time spent in the generator (seconds)
    pub generate_secs: f64,
    /// Total time spent in the sink (seconds, summed across workers)
    pub persist_secs: f64,
}

impl MetricsSnapshot {
    /// Items produced but never persisted.
    pub fn lost(&self) -> u64 {
        self.produced.saturating_sub(self.saved)
    }

    /// Slots whose fate is final: saved, dropped, or failed at either end.
    pub fn settled(&self) -> u64 {
        self.saved
            + self.dropped_by_overflow
            + self.sink_failures
            + self.dropped_by_deadline
            + self.generation_failures
    }

    /// Saved items per second of wall-clock time.
    pub fn effective_rate(&self) -> f64 {
        per_second(self.saved, self.elapsed)
    }

    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Items: {} produced, {} saved, {} lost | \
             Dropped: {} overflow, {} deadline | Failures: {} gen, {} sink | \
             Write: {:.2} MB @ {:.2} MB/s | Rate: {:.1} items/s | Elapsed: {:.1}s",
            self.produced,
            self.saved,
            self.lost(),
            self.dropped_by_overflow,
            self.dropped_by_deadline,
            self.generation_failures,
            self.sink_failures,
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.write_throughput_mbps,
            self.saved_per_second,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_items: Option<u64>,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_items: Option<u64>) -> Self {
        Self {
            metrics,
            interval_secs,
            total_items,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    match self.total_items {
                        Some(total) if total > 0 => {
                            let progress = snapshot.settled() as f64 / total as f64 * 100.0;
                            tracing::info!("[{:.1}%] {}", progress, snapshot);
                        }
                        _ => tracing::info!("{}", snapshot),
                    }
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Pipeline Summary ===");
        if let Some(total) = self.total_items {
            println!("Target items: {}", total);
        }
        println!("Total time: {:.2}s", snapshot.elapsed.as_secs_f64());
        println!("Produced: {}", snapshot.produced);
        println!("Saved: {}", snapshot.saved);
        println!("Lost: {}", snapshot.lost());
        println!("Dropped (overflow): {}", snapshot.dropped_by_overflow);
        println!("Dropped (deadline): {}", snapshot.dropped_by_deadline);
        println!("Generation failures: {}", snapshot.generation_failures);
        println!("Sink failures: {}", snapshot.sink_failures);
        println!(
            "Data written: {:.2} MB",
            snapshot.bytes_written as f64 / (1024.0 * 1024.0)
        );
        println!("Effective rate: {:.2} items/s", snapshot.effective_rate());

        let total_component = snapshot.generate_secs + snapshot.persist_secs;
        if total_component > 0.0 {
            println!("\n--- Component Time Breakdown ---");
            println!("Generate: {:>7.2}s ({:>5.1}%)", snapshot.generate_secs, snapshot.generate_secs / total_component * 100.0);
            println!("Persist:  {:>7.2}s ({:>5.1}%)", snapshot.persist_secs, snapshot.persist_secs / total_component * 100.0);
        }
        println!("========================\n");
    }
}
