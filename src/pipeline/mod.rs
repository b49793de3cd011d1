//! Bounded producer/consumer pipeline with pacing and metrics.

mod channel;
mod consumer;
mod item;
mod metrics;
mod pacer;
mod producer;
mod scheduler;


pub use channel::{BoundedChannel, OverflowPolicy, PushOutcome};
pub use consumer::{worker_loop, ConsumerPool, WorkerSummary};
pub use item::{item_key, Item};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use pacer::{DeadlinePolicy, Pacer, SlotPlan};
pub use producer::{Producer, ProducerState, ProducerSummary, StopReason};
pub use scheduler::{PipelineConfig, PipelineReport, Scheduler};
