//! Fixed pool of workers draining the channel into the sink.

use crate::io::Sink;
use crate::pipeline::{item_key, BoundedChannel, Item, Metrics};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Per-worker totals, returned when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub saved: u64,
    pub failed: u64,
    pub bytes_written: u64,
}

/// Worker task: persist items until a terminal item arrives.
///
/// A failed persist is logged and counted; it never stops the worker.
pub async fn worker_loop<P: Send + 'static>(
    worker_id: usize,
    channel: Arc<BoundedChannel<P>>,
    sink: Arc<dyn Sink<P>>,
    metrics: Arc<Metrics>,
) -> WorkerSummary {
    tracing::trace!("Worker {} started", worker_id);

    let mut summary = WorkerSummary {
        worker_id,
        ..Default::default()
    };

    loop {
        let (sequence_id, payload) = match channel.pop().await {
            Item::Terminal => break,
            Item::Work {
                sequence_id,
                payload,
            } => (sequence_id, payload),
        };

        let key = item_key(sequence_id);
        let sink = sink.clone();
        let start = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            let result = sink.persist(&key, payload);
            (key, result)
        })
        .await;
        metrics.add_persist_time(start.elapsed());

        match result {
            Ok((_, Ok(bytes))) => {
                metrics.add_saved(bytes);
                summary.saved += 1;
                summary.bytes_written += bytes;
            }
            Ok((key, Err(e))) => {
                tracing::warn!("Worker {} failed to persist {}: {:#}", worker_id, key, e);
                metrics.add_sink_failure();
                summary.failed += 1;
            }
            Err(e) => {
                tracing::warn!("Worker {} sink task for item {} failed: {}", worker_id, sequence_id, e);
                metrics.add_sink_failure();
                summary.failed += 1;
            }
        }
    }

    tracing::debug!(
        "Worker {} received terminal item (saved: {}, failed: {})",
        worker_id,
        summary.saved,
        summary.failed
    );
    summary
}

/// Handles to a running pool of [`worker_loop`] tasks.
pub struct ConsumerPool {
    handles: Vec<JoinHandle<WorkerSummary>>,
}

impl ConsumerPool {
    /// Spawn `size` workers sharing one channel and one sink.
    pub fn spawn<P: Send + 'static>(
        size: usize,
        channel: Arc<BoundedChannel<P>>,
        sink: Arc<dyn Sink<P>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let handles = (0..size)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    channel.clone(),
                    sink.clone(),
                    metrics.clone(),
                ))
            })
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) -> Result<Vec<WorkerSummary>> {
        let results = futures::future::join_all(self.handles).await;

        let mut summaries = Vec::with_capacity(results.len());
        for result in results {
            summaries.push(result.map_err(|e| anyhow::anyhow!("Worker task failed: {}", e))?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OverflowPolicy;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records keys; fails for every key ending in the given digit.
    struct RecordingSink {
        keys: Mutex<Vec<String>>,
        fail_suffix: Option<char>,
    }

    impl RecordingSink {
        fn new(fail_suffix: Option<char>) -> Arc<Self> {
            Arc::new(Self {
                keys: Mutex::new(Vec::new()),
                fail_suffix,
            })
        }
    }

    impl Sink<Vec<u8>> for RecordingSink {
        fn persist(&self, key: &str, payload: Vec<u8>) -> Result<u64> {
            if self.fail_suffix.is_some_and(|c| key.ends_with(c)) {
                anyhow::bail!("disk full");
            }
            self.keys.lock().push(key.to_string());
            Ok(payload.len() as u64)
        }
    }

    async fn feed(channel: &BoundedChannel<Vec<u8>>, items: u64, consumers: usize) {
        for id in 0..items {
            channel.push(Item::work(id, vec![0u8; 10])).await;
        }
        channel.close();
        for _ in 0..consumers {
            channel.push(Item::Terminal).await;
        }
    }

    #[tokio::test]
    async fn test_worker_persists_in_fifo_order() {
        let channel = Arc::new(BoundedChannel::new(16, OverflowPolicy::Block).unwrap());
        let sink = RecordingSink::new(None);
        let metrics = Metrics::new();

        feed(&channel, 5, 1).await;
        let dyn_sink: Arc<dyn Sink<Vec<u8>>> = sink.clone();
        let summary = worker_loop(0, channel.clone(), dyn_sink, metrics.clone()).await;

        assert_eq!(summary.saved, 5);
        assert_eq!(summary.bytes_written, 50);
        assert_eq!(
            *sink.keys.lock(),
            vec!["image_0", "image_1", "image_2", "image_3", "image_4"]
        );
        assert_eq!(metrics.snapshot().saved, 5);
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_worker() {
        let channel = Arc::new(BoundedChannel::new(16, OverflowPolicy::Block).unwrap());
        let sink = RecordingSink::new(Some('3'));
        let metrics = Metrics::new();

        feed(&channel, 10, 1).await;
        let summary = worker_loop(0, channel, sink as Arc<dyn Sink<Vec<u8>>>, metrics.clone()).await;

        assert_eq!(summary.saved, 9);
        assert_eq!(summary.failed, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.saved, 9);
        assert_eq!(snapshot.sink_failures, 1);
        assert_eq!(snapshot.bytes_written, 90);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_each_worker_takes_one_terminal() {
        const CONSUMERS: usize = 5;

        let channel = Arc::new(BoundedChannel::new(4, OverflowPolicy::Block).unwrap());
        let sink = RecordingSink::new(None);
        let metrics = Metrics::new();

        let dyn_sink: Arc<dyn Sink<Vec<u8>>> = sink.clone();
        let pool = ConsumerPool::spawn(CONSUMERS, channel.clone(), dyn_sink, metrics.clone());
        assert_eq!(pool.size(), CONSUMERS);

        feed(&channel, 200, CONSUMERS).await;
        let summaries = tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .expect("every worker should exit")
            .unwrap();

        assert_eq!(summaries.len(), CONSUMERS);
        assert_eq!(summaries.iter().map(|s| s.saved).sum::<u64>(), 200);
        assert_eq!(sink.keys.lock().len(), 200);
        assert!(channel.is_empty());
    }
}
