//! Collaborators at the edges of the pipeline: payload synthesis and
//! persistence.
//!
//! The pipeline only sees the two traits below. Both are synchronous and are
//! driven from `tokio::task::spawn_blocking`, so implementations are free to
//! do CPU-heavy or blocking file work.

mod frame;
mod image_sink;

pub use frame::{Frame, RandomFrameGenerator};
pub use image_sink::ImageFileSink;

use anyhow::Result;

/// Source of payloads, called repeatedly from the single producer.
///
/// The producer task is spawned onto the multi-thread runtime and borrows
/// itself across awaits, so generators must be `Sync` as well as `Send`.
pub trait Generator: Send + Sync + 'static {
    type Payload: Send + 'static;

    /// Synthesize one payload. An error skips the slot; it never stops the
    /// producer.
    fn generate(&mut self, width: u32, height: u32) -> Result<Self::Payload>;
}

/// Destination for payloads, shared by every consumer.
///
/// Called concurrently with distinct keys. The pipeline never retries a
/// failed persist.
pub trait Sink<P>: Send + Sync + 'static {
    /// Persist `payload` under `key` and return the number of bytes written.
    fn persist(&self, key: &str, payload: P) -> Result<u64>;
}
