//! The single paced producer.
//!
//! The producer runs three phases:
//!
//! ```text
//! Running ──(item limit | run deadline | stop token)──▶ Draining ──▶ Closed
//! ```
//!
//! While running it synthesizes one payload per slot, offers it to the
//! channel and asks the [`Pacer`] when the next slot is due. Draining closes
//! the channel for work and sends one terminal item per consumer. Draining
//! always happens, even when running ends with an error, so the consumer
//! pool can never be left waiting.

use crate::io::Generator;
use crate::pipeline::{BoundedChannel, Item, Metrics, Pacer, PipelineConfig, PushOutcome};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

/// Phase of the producer's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Running,
    Draining,
    Closed,
}

/// Why the producer stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every configured slot was used (produced, failed or skipped).
    ItemLimit,
    /// The configured run duration elapsed.
    Deadline,
    /// The stop token was cancelled.
    Cancelled,
    /// The generator panicked; production cannot continue.
    GeneratorLost,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::ItemLimit => "item limit reached",
            StopReason::Deadline => "run duration elapsed",
            StopReason::Cancelled => "stop requested",
            StopReason::GeneratorLost => "generator panicked",
        };
        f.write_str(reason)
    }
}

/// What the producer did over its lifetime.
#[derive(Debug, Clone)]
pub struct ProducerSummary {
    /// Slots consumed, including skipped and failed ones.
    pub slots: u64,
    pub produced: u64,
    pub dropped_by_overflow: u64,
    pub dropped_by_deadline: u64,
    pub generation_failures: u64,
    pub terminals_sent: usize,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

impl ProducerSummary {
    fn new() -> Self {
        Self {
            slots: 0,
            produced: 0,
            dropped_by_overflow: 0,
            dropped_by_deadline: 0,
            generation_failures: 0,
            terminals_sent: 0,
            stop_reason: StopReason::ItemLimit,
            elapsed: Duration::ZERO,
        }
    }

    /// Items produced per second of producer run time.
    pub fn effective_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.produced as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for ProducerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slots: {}, Produced: {}, Overflow drops: {}, Deadline drops: {}, \
             Generation failures: {}, Rate: {:.2}/s, Stopped: {}",
            self.slots,
            self.produced,
            self.dropped_by_overflow,
            self.dropped_by_deadline,
            self.generation_failures,
            self.effective_rate(),
            self.stop_reason,
        )
    }
}

/// Paced producer feeding a [`BoundedChannel`].
pub struct Producer<G: Generator> {
    generator: Option<G>,
    channel: Arc<BoundedChannel<G::Payload>>,
    metrics: Arc<Metrics>,
    pacer: Pacer,
    width: u32,
    height: u32,
    total_items: Option<u64>,
    run_deadline: Option<Instant>,
    consumers: usize,
    stop: CancellationToken,
    state: ProducerState,
}

impl<G: Generator> Producer<G> {
    /// Create a producer whose schedule starts at `start`.
    pub fn new(
        config: &PipelineConfig,
        start: Instant,
        generator: G,
        channel: Arc<BoundedChannel<G::Payload>>,
        metrics: Arc<Metrics>,
        stop: CancellationToken,
    ) -> Result<Self> {
        let pacer = Pacer::new(config.target_rate, config.deadline_policy, start)?;

        Ok(Self {
            generator: Some(generator),
            channel,
            metrics,
            pacer,
            width: config.width,
            height: config.height,
            total_items: config.total_items,
            run_deadline: config.duration.map(|d| start + d),
            consumers: config.consumers,
            stop,
            state: ProducerState::Running,
        })
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Run until a stop condition, then drain and close.
    ///
    /// Returns an error only if the generator panicked; terminal items
    /// have still been delivered in that case.
    pub async fn run(mut self) -> Result<ProducerSummary> {
        let started = Instant::now();
        let mut summary = ProducerSummary::new();

        tracing::info!(
            "Producer started ({}x{}, rate: {}, limit: {:?}, deadline policy: {})",
            self.width,
            self.height,
            if self.pacer.is_unlimited() {
                "unlimited".to_string()
            } else {
                format!("{}/s", self.pacer.rate())
            },
            self.total_items,
            self.pacer.policy()
        );

        let outcome = self.produce(&mut summary).await;

        self.state = ProducerState::Draining;
        summary.terminals_sent = self.drain().await;

        self.state = ProducerState::Closed;
        summary.elapsed = started.elapsed();
        tracing::info!("Producer closed: {}", summary);

        outcome.map(|()| summary)
    }

    async fn produce(&mut self, summary: &mut ProducerSummary) -> Result<()> {
        let mut slot: u64 = 0;

        loop {
            if let Some(reason) = self.stop_reason(slot) {
                tracing::debug!("Producer stopping at slot {}: {}", slot, reason);
                summary.stop_reason = reason;
                return Ok(());
            }

            summary.slots += 1;

            let generate_start = Instant::now();
            let generated = match self.generate().await {
                Ok(generated) => generated,
                Err(e) => {
                    summary.stop_reason = StopReason::GeneratorLost;
                    return Err(e);
                }
            };
            self.metrics.add_generate_time(generate_start.elapsed());

            match generated {
                Ok(payload) => self.offer(slot, payload, summary).await,
                Err(e) => {
                    tracing::warn!("Generation failed for slot {}: {:#}", slot, e);
                    self.metrics.add_generation_failure();
                    summary.generation_failures += 1;
                }
            }

            let plan = self.pacer.plan_after(slot, Instant::now());
            let skipped = self.countable_skips(plan.slot - plan.skipped, plan.skipped);
            if skipped > 0 {
                tracing::debug!(
                    "Behind schedule after slot {}: skipping {} slot(s)",
                    slot,
                    skipped
                );
                self.metrics.add_dropped_by_deadline(skipped);
                summary.dropped_by_deadline += skipped;
                summary.slots += skipped;
            }

            slot = plan.slot;
            if let Some(when) = plan.wait_until {
                self.pace_until(when).await;
            }
        }
    }

    /// First stop condition that holds before running `slot`.
    fn stop_reason(&self, slot: u64) -> Option<StopReason> {
        if self.stop.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if self.total_items.is_some_and(|total| slot >= total) {
            return Some(StopReason::ItemLimit);
        }
        if self.run_deadline.is_some_and(|end| Instant::now() >= end) {
            return Some(StopReason::Deadline);
        }
        None
    }

    /// Skipped slots that fall inside the run's limits.
    fn countable_skips(&self, first: u64, skipped: u64) -> u64 {
        let mut countable = skipped;
        if let Some(total) = self.total_items {
            countable = countable.min(total.saturating_sub(first));
        }
        if let Some(limit) = self.run_deadline.and_then(|end| self.pacer.first_slot_due_from(end)) {
            countable = countable.min(limit.saturating_sub(first));
        }
        countable
    }

    /// Call the generator on the blocking pool.
    ///
    /// The outer error means the generator panicked and is gone; the inner
    /// one is an ordinary, recoverable generation failure.
    async fn generate(&mut self) -> Result<Result<G::Payload>> {
        let mut generator = self
            .generator
            .take()
            .ok_or_else(|| anyhow::anyhow!("Generator is no longer available"))?;
        let (width, height) = (self.width, self.height);

        let (generator, result) = tokio::task::spawn_blocking(move || {
            let result = generator.generate(width, height);
            (generator, result)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Generator task failed: {}", e))?;

        self.generator = Some(generator);
        Ok(result)
    }

    async fn offer(&self, slot: u64, payload: G::Payload, summary: &mut ProducerSummary) {
        self.metrics.add_produced();
        summary.produced += 1;

        match self.channel.push(Item::work(slot, payload)).await {
            PushOutcome::Enqueued => {}
            PushOutcome::Evicted(old) => {
                tracing::debug!(
                    "Channel full: evicted item {:?} for {}",
                    old.sequence_id(),
                    slot
                );
                self.metrics.add_dropped_by_overflow();
                summary.dropped_by_overflow += 1;
            }
            PushOutcome::Rejected(_) => {
                tracing::debug!("Channel full: dropped item {}", slot);
                self.metrics.add_dropped_by_overflow();
                summary.dropped_by_overflow += 1;
            }
            PushOutcome::Closed(_) => {
                tracing::warn!("Channel closed while producing; item {} discarded", slot);
                self.metrics.add_dropped_by_overflow();
                summary.dropped_by_overflow += 1;
            }
        }
    }

    /// Sleep until `when`, waking early for the stop token or the end of the
    /// run.
    async fn pace_until(&self, when: Instant) {
        let when = match self.run_deadline {
            Some(end) => when.min(end),
            None => when,
        };

        tokio::select! {
            _ = sleep_until(when.into()) => {}
            _ = self.stop.cancelled() => {}
        }
    }

    /// Close the channel and hand every consumer its terminal item.
    async fn drain(&self) -> usize {
        self.channel.close();

        let mut sent = 0;
        for _ in 0..self.consumers {
            if self.channel.push(Item::Terminal).await.is_enqueued() {
                sent += 1;
            }
        }
        tracing::debug!("Sent {} terminal item(s)", sent);
        sent
    }
}
