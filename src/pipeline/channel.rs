//! Fixed-capacity FIFO between the producer and the consumer pool.
//!
//! The channel owns its lock: callers only see `push`, `pop` and a few
//! advisory accessors. Waiting on a full or empty queue is cooperative
//! (`tokio::sync::Notify`), so a blocked producer or idle consumer never
//! holds a runtime worker thread.
//!
//! What happens when the queue is full is decided by the [`OverflowPolicy`]
//! given at construction. Terminal items always use blocking semantics and
//! are accepted after [`BoundedChannel::close`], so shutdown can never be
//! dropped.

use crate::pipeline::Item;
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tokio::sync::Notify;

/// Behavior of a non-terminal push when the channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for a consumer to make room.
    #[default]
    Block,

    /// Evict the oldest queued item to make room for the new one.
    DropOldest,

    /// Discard the incoming item.
    DropNewest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverflowPolicy::Block => "block",
            OverflowPolicy::DropOldest => "drop_oldest",
            OverflowPolicy::DropNewest => "drop_newest",
        };
        f.write_str(name)
    }
}

impl FromStr for OverflowPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            other => anyhow::bail!(
                "Unknown overflow policy '{}' (expected block, drop_oldest or drop_newest)",
                other
            ),
        }
    }
}

/// Result of a push.
#[derive(Debug)]
pub enum PushOutcome<P> {
    /// The item was queued.
    Enqueued,

    /// The item was queued after evicting the returned oldest item.
    Evicted(Item<P>),

    /// The channel was full and the item was discarded.
    Rejected(Item<P>),

    /// The channel is closed for work items.
    Closed(Item<P>),
}

impl<P> PushOutcome<P> {
    /// Whether the pushed item ended up in the queue.
    pub fn is_enqueued(&self) -> bool {
        matches!(self, PushOutcome::Enqueued | PushOutcome::Evicted(_))
    }
}

struct State<P> {
    contents: VecDeque<Item<P>>,
    closed: bool,
    peak_len: usize,
    terminals: usize,
}

impl<P> State<P> {
    fn enqueue(&mut self, item: Item<P>) {
        if item.is_terminal() {
            self.terminals += 1;
        }
        self.contents.push_back(item);
        self.peak_len = self.peak_len.max(self.contents.len());
    }
}

/// Bounded multi-consumer FIFO of [`Item`]s.
pub struct BoundedChannel<P> {
    state: Mutex<State<P>>,
    capacity: usize,
    policy: OverflowPolicy,
    not_empty: Notify,
    not_full: Notify,
}

impl<P> BoundedChannel<P> {
    /// Create a channel holding at most `capacity` items.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self> {
        if capacity == 0 {
            anyhow::bail!("Channel capacity must be > 0");
        }

        Ok(Self {
            state: Mutex::new(State {
                contents: VecDeque::with_capacity(capacity),
                closed: false,
                peak_len: 0,
                terminals: 0,
            }),
            capacity,
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        })
    }

    /// Push an item according to the overflow policy.
    ///
    /// Terminal items ignore the policy and wait for room, even after
    /// the channel has been closed.
    pub async fn push(&self, item: Item<P>) -> PushOutcome<P> {
        if item.is_terminal() || self.policy == OverflowPolicy::Block {
            return self.push_blocking(item).await;
        }

        let mut state = self.state.lock();
        if state.closed {
            return PushOutcome::Closed(item);
        }

        if state.contents.len() < self.capacity {
            state.enqueue(item);
            drop(state);
            self.not_empty.notify_one();
            return PushOutcome::Enqueued;
        }

        match self.policy {
            OverflowPolicy::DropNewest => PushOutcome::Rejected(item),
            OverflowPolicy::DropOldest | OverflowPolicy::Block => {
                let evicted = state.contents.pop_front();
                state.enqueue(item);
                drop(state);
                self.not_empty.notify_one();
                match evicted {
                    Some(old) => PushOutcome::Evicted(old),
                    None => PushOutcome::Enqueued,
                }
            }
        }
    }

    async fn push_blocking(&self, item: Item<P>) -> PushOutcome<P> {
        let terminal = item.is_terminal();

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            // Register before checking so a pop between the check and the
            // await cannot be missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed && !terminal {
                    return PushOutcome::Closed(item);
                }
                if state.contents.len() < self.capacity {
                    state.enqueue(item);
                    drop(state);
                    self.not_empty.notify_one();
                    return PushOutcome::Enqueued;
                }
            }

            notified.await;
        }
    }

    /// Pop the front item, waiting while the channel is empty.
    pub async fn pop(&self) -> Item<P> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let front = self.state.lock().contents.pop_front();
            if let Some(item) = front {
                self.not_full.notify_one();
                return item;
            }

            notified.await;
        }
    }

    /// Pop the front item without waiting.
    pub fn try_pop(&self) -> Option<Item<P>> {
        let front = self.state.lock().contents.pop_front();
        if front.is_some() {
            self.not_full.notify_one();
        }
        front
    }

    /// Refuse further work items. Terminal items are still accepted.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            drop(state);
            self.not_full.notify_waiters();
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current queue length. Advisory only under concurrent access.
    pub fn len(&self) -> usize {
        self.state.lock().contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Highest queue length observed since construction.
    pub fn peak_len(&self) -> usize {
        self.state.lock().peak_len
    }

    /// Terminal items accepted since construction, popped or not.
    pub fn terminals_enqueued(&self) -> usize {
        self.state.lock().terminals
    }
}
