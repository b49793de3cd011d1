//! Pipeline orchestration: wires the producer, the channel and the consumer
//! pool together, runs them to completion and reports.

use crate::io::{Generator, Sink};
use crate::pipeline::{
    BoundedChannel, ConsumerPool, DeadlinePolicy, Item, Metrics, MetricsReporter,
    MetricsSnapshot, OverflowPolicy, Producer, ProducerSummary, WorkerSummary,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fixed configuration of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Width passed to the generator
    pub width: u32,

    /// Height passed to the generator
    pub height: u32,

    /// Channel capacity
    pub capacity: usize,

    /// Number of consumer workers
    pub consumers: usize,

    /// Items per second; 0 disables pacing
    pub target_rate: f64,

    /// Stop after this many slots
    pub total_items: Option<u64>,

    /// Stop after this much wall-clock time
    pub duration: Option<Duration>,

    /// Channel behavior when full
    pub overflow_policy: OverflowPolicy,

    /// Producer behavior when behind schedule
    pub deadline_policy: DeadlinePolicy,

    /// Enable periodic progress reporting
    pub enable_metrics: bool,

    /// Progress reporting interval in seconds
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            capacity: 64,
            consumers: 7,
            target_rate: 30.0,
            total_items: None,
            duration: Some(Duration::from_secs(10)),
            overflow_policy: OverflowPolicy::Block,
            deadline_policy: DeadlinePolicy::Elastic,
            enable_metrics: false,
            metrics_interval_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            anyhow::bail!("Channel capacity must be > 0");
        }
        if self.consumers == 0 {
            anyhow::bail!("Consumer pool size must be > 0");
        }
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("Width and height must be > 0");
        }
        if !self.target_rate.is_finite() || self.target_rate < 0.0 {
            anyhow::bail!("Target rate must be a finite value >= 0");
        }
        Ok(())
    }

    /// Slots the run is expected to cover, if bounded.
    pub fn expected_items(&self) -> Option<u64> {
        let by_duration = match self.duration {
            Some(d) if self.target_rate > 0.0 => Some((d.as_secs_f64() * self.target_rate) as u64),
            _ => None,
        };
        match (self.total_items, by_duration) {
            (Some(total), Some(timed)) => Some(total.min(timed)),
            (Some(total), None) => Some(total),
            (None, timed) => timed,
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Final counters, read after every task joined
    pub metrics: MetricsSnapshot,

    pub producer: ProducerSummary,

    pub workers: Vec<WorkerSummary>,

    /// Highest channel length observed
    pub peak_queue_depth: usize,

    pub capacity: usize,

    /// Wall-clock time from start to the last join
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Items produced but not persisted.
    pub fn lost(&self) -> u64 {
        self.metrics.lost()
    }

    /// Saved items per second of wall-clock run time.
    pub fn effective_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.metrics.saved as f64 / secs
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Produced: {}, Saved: {}, Lost: {}, Dropped: {} overflow / {} deadline, \
             Peak queue: {}/{}, Workers: {}, Rate: {:.2}/s, Elapsed: {:.2}s",
            self.metrics.produced,
            self.metrics.saved,
            self.lost(),
            self.metrics.dropped_by_overflow,
            self.metrics.dropped_by_deadline,
            self.peak_queue_depth,
            self.capacity,
            self.workers.len(),
            self.effective_rate(),
            self.elapsed.as_secs_f64()
        )
    }
}

/// Runs one producer and a pool of consumers over a bounded channel.
pub struct Scheduler {
    config: PipelineConfig,
    metrics: Arc<Metrics>,
    stop: CancellationToken,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(config: PipelineConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            metrics,
            stop: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that ends production early when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run the pipeline to completion.
    ///
    /// Configuration errors are reported before any task is spawned.
    pub async fn run<G>(&self, generator: G, sink: Arc<dyn Sink<G::Payload>>) -> Result<PipelineReport>
    where
        G: Generator,
    {
        self.config.validate()?;

        let channel = Arc::new(BoundedChannel::new(
            self.config.capacity,
            self.config.overflow_policy,
        )?);
        let start = Instant::now();
        let producer = Producer::new(
            &self.config,
            start,
            generator,
            channel.clone(),
            self.metrics.clone(),
            self.stop.clone(),
        )?;

        tracing::info!(
            "Starting pipeline: capacity {} ({}), {} consumers",
            self.config.capacity,
            self.config.overflow_policy,
            self.config.consumers
        );

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                self.config.expected_items(),
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        let pool = ConsumerPool::spawn(
            self.config.consumers,
            channel.clone(),
            sink,
            self.metrics.clone(),
        );
        let producer_handle = tokio::spawn(producer.run());

        let producer_result = match producer_handle.await {
            Ok(result) => result,
            Err(e) => {
                // The producer may have died mid-drain; send only what is missing.
                release_pool(&channel, pool.size()).await;
                Err(anyhow::anyhow!("Producer task failed: {}", e))
            }
        };

        let workers = pool.join().await;

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let producer = producer_result?;
        let workers = workers?;

        let report = PipelineReport {
            metrics: self.metrics.snapshot(),
            producer,
            workers,
            peak_queue_depth: channel.peak_len(),
            capacity: channel.capacity(),
            elapsed: start.elapsed(),
        };

        tracing::info!("Pipeline complete: {}", report);
        Ok(report)
    }
}

/// Close the channel and top it up to one terminal item per worker.
async fn release_pool<P>(channel: &BoundedChannel<P>, consumers: usize) {
    channel.close();
    let missing = consumers.saturating_sub(channel.terminals_enqueued());
    for _ in 0..missing {
        channel.push(Item::Terminal).await;
    }
}
