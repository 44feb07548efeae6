// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event bus itself (spec §4.2, Event Bus).
//!
//! Publish takes the subscriber lock only long enough to snapshot the
//! matching subscribers, then delivers outside the lock: a slow or panicking
//! handler can never stall a publisher, and publishers can never stall each
//! other on delivery.

use crate::channel::{BufferedChannel, OverflowStrategy, SendOutcome};
use crate::event::Event;
use crate::filter::Filter;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub type Handler = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Clone)]
struct HandlerSub {
    id: u64,
    filter: Filter,
    handler: Handler,
}

#[derive(Clone)]
struct ChannelSub {
    id: u64,
    filter: Filter,
    channel: BufferedChannel<Event>,
}

#[derive(Default)]
struct Subscribers {
    handlers: Vec<HandlerSub>,
    channels: Vec<ChannelSub>,
}

/// A subscription's handle. Dropping it does not unsubscribe; call
/// [`EventBus::unsubscribe`] explicitly, mirroring the teacher's dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Capacity used for channel-mode subscriptions that don't specify one
/// (spec §4.2: bounded, evict-oldest default for lifecycle/health events).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub struct EventBus {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Subscribe a callback, invoked on its own spawned task per delivered
    /// event so one slow or panicking handler can't affect others.
    pub fn subscribe_handler(
        &self,
        filter: Filter,
        handler: impl Fn(Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.subscribers.lock().handlers.push(HandlerSub {
            id,
            filter,
            handler: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    /// Subscribe a bounded channel. `strategy` is this subscription's
    /// *default* — the one applied to event kinds with no priority of their
    /// own. Lifecycle/health events always carry evict-oldest regardless of
    /// `strategy` (spec §4.2's priority strategy: "a priority strategy maps
    /// event kind → strategy, with a default"), so the most recent state
    /// wins even for a subscriber that otherwise wants `Drop`/`Block`.
    pub fn subscribe_channel(
        &self,
        filter: Filter,
        capacity: usize,
        strategy: OverflowStrategy,
    ) -> (SubscriptionId, BufferedChannel<Event>) {
        let id = self.allocate_id();
        let channel = BufferedChannel::with_priority(
            capacity,
            strategy,
            Some(Arc::new(|event: &Event| crate::priority_for_kind(&event.kind))),
        );
        self.subscribers.lock().channels.push(ChannelSub {
            id,
            filter,
            channel: channel.clone(),
        });
        (SubscriptionId(id), channel)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscribers.lock();
        subs.handlers.retain(|h| h.id != id.0);
        subs.channels.retain(|c| c.id != id.0);
    }

    /// Deliver `event` to every matching subscriber. Never blocks on a
    /// subscriber: handler callbacks run on spawned tasks, channel sends use
    /// `try_send`.
    pub fn publish(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let (matching_handlers, matching_channels, dead_channel_ids) = {
            let subs = self.subscribers.lock();
            let handlers: Vec<HandlerSub> = subs
                .handlers
                .iter()
                .filter(|h| h.filter.matches(&event))
                .cloned()
                .collect();
            let mut dead = Vec::new();
            let channels: Vec<ChannelSub> = subs
                .channels
                .iter()
                .filter(|c| {
                    if c.channel.is_closed() {
                        dead.push(c.id);
                        false
                    } else {
                        c.filter.matches(&event)
                    }
                })
                .cloned()
                .collect();
            (handlers, channels, dead)
        };

        if !dead_channel_ids.is_empty() {
            let mut subs = self.subscribers.lock();
            subs.channels.retain(|c| !dead_channel_ids.contains(&c.id));
        }

        for sub in matching_handlers {
            let event = event.clone();
            tokio::spawn(async move {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| (sub.handler)(event)));
                if outcome.is_err() {
                    warn!(subscription_id = sub.id, "event handler panicked");
                }
            });
        }

        for sub in matching_channels {
            match sub.channel.try_send(event.clone()) {
                SendOutcome::Dropped => {
                    warn!(subscription_id = sub.id, kind = event.kind.name(), "event dropped, subscriber channel full");
                }
                SendOutcome::Enqueued | SendOutcome::Evicted => {}
            }
        }
    }

    /// Stop accepting new publishes and close every channel subscription so
    /// their receivers observe end-of-stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let subs = self.subscribers.lock();
        for channel_sub in &subs.channels {
            channel_sub.channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CascadeKind, EventKind, Severity};
    use envctl_core::{CorrelationId, ServiceLabel};
    use std::sync::atomic::AtomicUsize;

    fn sample() -> Event {
        Event {
            kind: EventKind::System { message: "hello".into() },
            source: ServiceLabel::new("svc"),
            severity: Severity::Info,
            timestamp_epoch_ms: 0,
            correlation_id: CorrelationId::new(),
            cause: "test".into(),
            parent_id: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn channel_subscriber_receives_matching_events() {
        let bus = EventBus::new();
        let (_id, channel) = bus.subscribe_channel(Filter::all(), 8, OverflowStrategy::Drop);
        bus.publish(sample());
        let received = channel.recv().await.unwrap();
        assert_eq!(received.kind.name(), "system");
    }

    #[tokio::test]
    async fn unsubscribed_channel_receives_nothing() {
        let bus = EventBus::new();
        let (id, channel) = bus.subscribe_channel(Filter::all(), 8, OverflowStrategy::Drop);
        bus.unsubscribe(id);
        bus.publish(sample());
        assert!(channel.try_recv().is_none());
    }

    #[tokio::test]
    async fn handler_subscriber_runs_on_its_own_task() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        bus.subscribe_handler(Filter::all(), move |_| {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(sample());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_affect_other_subscribers() {
        let bus = EventBus::new();
        bus.subscribe_handler(Filter::all(), |_| panic!("boom"));
        let (_id, channel) = bus.subscribe_channel(Filter::all(), 8, OverflowStrategy::Drop);
        bus.publish(sample());
        let received = tokio::time::timeout(std::time::Duration::from_millis(50), channel.recv())
            .await
            .unwrap();
        assert!(received.is_some());
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_events() {
        let bus = EventBus::new();
        let (_id, channel) =
            bus.subscribe_channel(Filter::by_source("other"), 8, OverflowStrategy::Drop);
        bus.publish(sample());
        assert!(channel.try_recv().is_none());
    }

    #[tokio::test]
    async fn close_terminates_channel_subscriptions() {
        let bus = EventBus::new();
        let (_id, channel) = bus.subscribe_channel(Filter::all(), 8, OverflowStrategy::Drop);
        bus.close();
        assert_eq!(channel.recv().await, None);
        bus.publish(sample());
        assert!(channel.try_recv().is_none());
    }

    #[allow(dead_code)]
    fn cascade_kind_is_constructible() -> CascadeKind {
        CascadeKind::Restart
    }

    fn lifecycle_event() -> Event {
        Event {
            kind: EventKind::Lifecycle {
                old_state: envctl_core::LifecycleState::Starting,
                new_state: envctl_core::LifecycleState::Running,
                ready: true,
                error: None,
                data: envctl_core::ServiceData::None,
            },
            ..sample()
        }
    }

    #[tokio::test]
    async fn priority_strategy_uses_its_priority_and_unknown_kinds_fall_back_to_default() {
        let bus = EventBus::new();
        let (_id, channel) = bus.subscribe_channel(Filter::all(), 1, OverflowStrategy::Drop);

        // A lifecycle update carries its own priority (evict-oldest), so the
        // second send evicts the first even though the subscription's
        // default is `Drop`.
        bus.publish(lifecycle_event());
        bus.publish(lifecycle_event());
        assert_eq!(channel.try_recv().unwrap().kind.name(), "lifecycle");
        assert!(channel.try_recv().is_none());
        assert_eq!(channel.metrics().evicted(), 1);
        assert_eq!(channel.metrics().dropped(), 0);

        // A kind with no priority of its own (system) falls back to the
        // subscription's configured default.
        bus.publish(sample());
        bus.publish(sample());
        assert_eq!(channel.try_recv().unwrap().kind.name(), "system");
        assert!(channel.try_recv().is_none());
        assert_eq!(channel.metrics().dropped(), 1);
    }
}
