// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The state store (spec §4.1): the authoritative, concurrently-readable
//! map from label to snapshot, plus its bounded history buffers and
//! subscription list.
//!
//! Single read-write lock. Readers hold it only to clone a snapshot;
//! writers hold it for the full upsert + transition-append +
//! subscriber-dispatch, matching the serialization discipline the spec
//! mandates so dispatch never races the write it reports on.

use crate::metrics::Metrics;
use crate::subscription::{StoreNotification, Subscription, SubscriptionId, SubscriptionTarget};
use crate::transitions::{CascadeRecord, TransitionRecord, CASCADE_HISTORY_CAP, TRANSITION_HISTORY_CAP};
use envctl_bus::{BufferedChannel, CascadeKind};
use envctl_core::{
    next_sequence, Clock, CorrelationId, LifecycleState, ServiceKind, ServiceLabel, ServiceSnapshot,
    SnapshotUpdate, SystemClock,
};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Enumeration predicate for [`StateStore::enumerate`].
#[derive(Debug, Clone)]
pub enum EnumerateFilter {
    All,
    Kind(ServiceKind),
    State(LifecycleState),
}

impl EnumerateFilter {
    fn matches(&self, snapshot: &ServiceSnapshot) -> bool {
        match self {
            EnumerateFilter::All => true,
            EnumerateFilter::Kind(kind) => snapshot.kind == *kind,
            EnumerateFilter::State(state) => snapshot.state == *state,
        }
    }
}

struct Inner {
    snapshots: HashMap<ServiceLabel, ServiceSnapshot>,
    subscriptions: Vec<Subscription>,
    transitions: VecDeque<TransitionRecord>,
    cascades: VecDeque<CascadeRecord>,
    state_changes: u64,
    subscription_deliveries: u64,
    subscription_drops: u64,
    last_change_epoch_ms: Option<u64>,
}

impl Inner {
    fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
            subscriptions: Vec::new(),
            transitions: VecDeque::new(),
            cascades: VecDeque::new(),
            state_changes: 0,
            subscription_deliveries: 0,
            subscription_drops: 0,
            last_change_epoch_ms: None,
        }
    }
}

pub struct StateStore<C: Clock = SystemClock> {
    clock: C,
    inner: RwLock<Inner>,
    next_subscription_id: AtomicU64,
}

impl<C: Clock> StateStore<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, inner: RwLock::new(Inner::new()), next_subscription_id: AtomicU64::new(1) }
    }

    /// Concurrent, non-blocking read of the current snapshot.
    pub fn read_snapshot(&self, label: &ServiceLabel) -> Option<ServiceSnapshot> {
        self.inner.read().snapshots.get(label).cloned()
    }

    /// Upsert from an incoming update. Returns whether `state` actually
    /// changed (spec §4.1's `stateChanged` rule: new label, or stored state
    /// differs from the update's state).
    ///
    /// An update whose `state` is not a legal successor of the currently
    /// stored state (per [`LifecycleState::can_transition_to`]) is rejected:
    /// the stored state is retained and only readiness/error/data are
    /// refreshed. This is what keeps a flapping driver callback (e.g. a
    /// port-forward reporting `forwarding-lost` while the label is already
    /// `Running`, which maps to `Starting`) from recording a bogus
    /// `Running -> Starting` transition.
    pub fn write_snapshot(&self, update: SnapshotUpdate) -> bool {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.write();

        let previous = inner.snapshots.get(&update.label).cloned();

        let target_state = match &previous {
            None => update.state,
            Some(existing) if existing.state.can_transition_to(update.state) => update.state,
            Some(existing) => {
                warn!(
                    label = %update.label,
                    from = %existing.state,
                    attempted = %update.state,
                    "illegal lifecycle transition rejected, retaining current state"
                );
                existing.state
            }
        };

        let state_changed = match &previous {
            None => true,
            Some(existing) => existing.state != target_state,
        };

        let old_state = previous.as_ref().map(|s| s.state).unwrap_or(LifecycleState::Unknown);

        let snapshot = ServiceSnapshot {
            label: update.label.clone(),
            kind: update.kind,
            state: target_state,
            ready: update.ready,
            error: update.error,
            data: update.data,
            last_updated_epoch_ms: now,
            correlation_id: update.correlation_id,
            cause: update.cause.clone(),
            parent_correlation_id: update.parent_correlation_id,
        };
        inner.snapshots.insert(update.label.clone(), snapshot.clone());

        if state_changed {
            inner.state_changes += 1;
            inner.last_change_epoch_ms = Some(now);

            let record = TransitionRecord {
                sequence: next_sequence(),
                label: update.label.clone(),
                kind: update.kind,
                old_state,
                new_state: target_state,
                correlation_id: update.correlation_id,
                cause: update.cause,
                timestamp_epoch_ms: now,
            };
            inner.transitions.push_back(record);
            if inner.transitions.len() > TRANSITION_HISTORY_CAP {
                inner.transitions.pop_front();
            }

            let notification = StoreNotification { snapshot, old_state };
            let mut dead = Vec::new();
            for sub in &inner.subscriptions {
                if sub.channel.is_closed() {
                    dead.push(sub.id);
                    continue;
                }
                if sub.matches(&notification.snapshot) {
                    match sub.channel.try_send(notification.clone()) {
                        envctl_bus::SendOutcome::Dropped => {
                            inner.subscription_drops += 1;
                        }
                        envctl_bus::SendOutcome::Enqueued | envctl_bus::SendOutcome::Evicted => {
                            inner.subscription_deliveries += 1;
                        }
                    }
                }
            }
            if !dead.is_empty() {
                inner.subscriptions.retain(|s| !dead.contains(&s.id));
            }
        }

        state_changed
    }

    /// Point-in-time copy; iteration order is unspecified.
    pub fn enumerate(&self, filter: EnumerateFilter) -> Vec<ServiceSnapshot> {
        self.inner.read().snapshots.values().filter(|s| filter.matches(s)).cloned().collect()
    }

    pub fn subscribe(&self, target: SubscriptionTarget) -> (SubscriptionId, BufferedChannel<StoreNotification>) {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription::new(id, target);
        let channel = subscription.channel.clone();
        self.inner.write().subscriptions.push(subscription);
        (id, channel)
    }

    /// Closes the subscription's channel idempotently and drops it from the
    /// active list.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.subscriptions.iter().position(|s| s.id == id) {
            let sub = inner.subscriptions.remove(pos);
            sub.channel.close();
        }
    }

    pub fn clear(&self, label: &ServiceLabel) {
        self.inner.write().snapshots.remove(label);
    }

    pub fn clear_all(&self) {
        self.inner.write().snapshots.clear();
    }

    pub fn record_cascade_operation(&self, correlation_id: CorrelationId, cascade_kind: CascadeKind, affected: Vec<ServiceLabel>) {
        let mut inner = self.inner.write();
        let record = CascadeRecord {
            sequence: next_sequence(),
            correlation_id,
            cascade_kind,
            affected,
            timestamp_epoch_ms: self.clock.epoch_ms(),
        };
        inner.cascades.push_back(record);
        if inner.cascades.len() > CASCADE_HISTORY_CAP {
            inner.cascades.pop_front();
        }
    }

    pub fn get_state_transitions(&self, label: Option<&ServiceLabel>) -> Vec<TransitionRecord> {
        let inner = self.inner.read();
        match label {
            None => inner.transitions.iter().cloned().collect(),
            Some(label) => inner.transitions.iter().filter(|t| t.label == *label).cloned().collect(),
        }
    }

    pub fn get_cascades_by_correlation_id(&self, id: CorrelationId) -> Vec<CascadeRecord> {
        self.inner.read().cascades.iter().filter(|c| c.correlation_id == id).cloned().collect()
    }

    pub fn metrics(&self) -> Metrics {
        let inner = self.inner.read();
        let mut per_kind: HashMap<ServiceKind, usize> = HashMap::new();
        let mut per_state: HashMap<LifecycleState, usize> = HashMap::new();
        for snapshot in inner.snapshots.values() {
            *per_kind.entry(snapshot.kind).or_default() += 1;
            *per_state.entry(snapshot.state).or_default() += 1;
        }
        Metrics {
            total_services: inner.snapshots.len(),
            active_subscriptions: inner.subscriptions.len(),
            state_changes: inner.state_changes,
            per_kind,
            per_state,
            last_change_epoch_ms: inner.last_change_epoch_ms,
            subscription_deliveries: inner.subscription_deliveries,
            subscription_drops: inner.subscription_drops,
        }
    }
}
