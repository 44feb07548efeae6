// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded queue with a configurable per-message overflow strategy
//! (spec §4.2, "Buffered channel primitive"). Used by the event bus's
//! channel-mode subscriptions and by TUI-style reporters.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// What happens when [`BufferedChannel::send`] is called on a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// New message discarded, counted.
    Drop,
    /// Writer suspends until space frees. Reserved for tests; off by
    /// default for lifecycle/health events (spec §5).
    Block,
    /// Oldest queued element removed; new element enqueued; counted.
    /// The default for lifecycle/health so the most recent state wins.
    EvictOldest,
}

/// Outcome of a single [`BufferedChannel::send`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued,
    Dropped,
    Evicted,
}

#[derive(Debug, Default)]
pub struct ChannelMetrics {
    pub dropped: AtomicU64,
    pub evicted: AtomicU64,
}

impl ChannelMetrics {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

/// A message's classifier into an overflow strategy. `None` means the
/// message carries no priority of its own and the channel's configured
/// default applies.
type Classifier<T> = Arc<dyn Fn(&T) -> Option<OverflowStrategy> + Send + Sync>;

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    default_strategy: OverflowStrategy,
    classify: Option<Classifier<T>>,
    closed: std::sync::atomic::AtomicBool,
    item_added: Notify,
    space_freed: Notify,
    metrics: ChannelMetrics,
}

/// A bounded, multi-producer single-consumer-friendly queue. Cheap to clone
/// (shares one `Arc`'d inner state), so both ends can hold a handle.
pub struct BufferedChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BufferedChannel<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> BufferedChannel<T> {
    /// A channel with one fixed strategy for every message.
    pub fn new(capacity: usize, strategy: OverflowStrategy) -> Self {
        Self::with_priority(capacity, strategy, None)
    }

    /// A channel whose overflow strategy is chosen per-message: `classify`
    /// is consulted first, and its `None` result falls back to
    /// `default_strategy`. This is the *priority strategy* the event bus
    /// uses to keep lifecycle/health messages from being silently dropped
    /// behind a subscriber's chosen default.
    pub fn with_priority(
        capacity: usize,
        default_strategy: OverflowStrategy,
        classify: Option<Classifier<T>>,
    ) -> Self {
        assert!(capacity > 0, "buffered channel capacity must be positive");
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                default_strategy,
                classify,
                closed: std::sync::atomic::AtomicBool::new(false),
                item_added: Notify::new(),
                space_freed: Notify::new(),
                metrics: ChannelMetrics::default(),
            }),
        }
    }

    fn strategy_for(&self, item: &T) -> OverflowStrategy {
        self.inner
            .classify
            .as_ref()
            .and_then(|classify| classify(item))
            .unwrap_or(self.inner.default_strategy)
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.inner.metrics
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.item_added.notify_waiters();
        self.inner.space_freed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Enqueue `item` per this channel's overflow strategy. Never blocks
    /// unless the strategy is [`OverflowStrategy::Block`].
    pub async fn send(&self, item: T) -> SendOutcome {
        loop {
            {
                let mut queue = self.inner.queue.lock();
                if queue.len() < self.inner.capacity {
                    queue.push_back(item);
                    drop(queue);
                    self.inner.item_added.notify_one();
                    return SendOutcome::Enqueued;
                }
                match self.strategy_for(&item) {
                    OverflowStrategy::Drop => {
                        self.inner.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        return SendOutcome::Dropped;
                    }
                    OverflowStrategy::EvictOldest => {
                        queue.pop_front();
                        queue.push_back(item);
                        drop(queue);
                        self.inner.metrics.evicted.fetch_add(1, Ordering::Relaxed);
                        self.inner.item_added.notify_one();
                        return SendOutcome::Evicted;
                    }
                    OverflowStrategy::Block => {
                        // fall through to wait below
                    }
                }
            }
            if self.is_closed() {
                self.inner.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                return SendOutcome::Dropped;
            }
            self.inner.space_freed.notified().await;
        }
    }

    /// Non-blocking variant used where the caller must never suspend
    /// (state-store subscriber delivery, spec §4.1).
    pub fn try_send(&self, item: T) -> SendOutcome {
        let mut queue = self.inner.queue.lock();
        if queue.len() < self.inner.capacity {
            queue.push_back(item);
            drop(queue);
            self.inner.item_added.notify_one();
            return SendOutcome::Enqueued;
        }
        match self.strategy_for(&item) {
            OverflowStrategy::EvictOldest => {
                queue.pop_front();
                queue.push_back(item);
                drop(queue);
                self.inner.metrics.evicted.fetch_add(1, Ordering::Relaxed);
                self.inner.item_added.notify_one();
                SendOutcome::Evicted
            }
            OverflowStrategy::Drop | OverflowStrategy::Block => {
                self.inner.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Dropped
            }
        }
    }

    /// Await the next item. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut queue = self.inner.queue.lock();
                if let Some(item) = queue.pop_front() {
                    drop(queue);
                    self.inner.space_freed.notify_one();
                    return Some(item);
                }
            }
            if self.is_closed() {
                return None;
            }
            self.inner.item_added.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        let mut queue = self.inner.queue.lock();
        let item = queue.pop_front();
        drop(queue);
        if item.is_some() {
            self.inner.space_freed.notify_one();
        }
        item
    }
}
