// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store-level subscriptions (spec §4.1, Subscribe/Unsubscribe).
//!
//! Distinct from the event bus: a store subscription delivers only the
//! transitions this particular store produces, scoped to one label or every
//! label, with its own bounded capacity-100 channel.

use envctl_bus::{BufferedChannel, OverflowStrategy};
use envctl_core::{LifecycleState, ServiceSnapshot};

/// Delivery-channel capacity for a store subscription (spec §4.1).
pub const SUBSCRIPTION_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(pub(crate) u64);

#[derive(Debug, Clone)]
pub enum SubscriptionTarget {
    All,
    Label(envctl_core::ServiceLabel),
}

impl SubscriptionTarget {
    fn matches(&self, snapshot: &ServiceSnapshot) -> bool {
        match self {
            SubscriptionTarget::All => true,
            SubscriptionTarget::Label(label) => *label == snapshot.label,
        }
    }
}

/// What a store subscriber receives: the new snapshot plus the state it
/// transitioned from.
#[derive(Debug, Clone)]
pub struct StoreNotification {
    pub snapshot: ServiceSnapshot,
    pub old_state: LifecycleState,
}

pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub target: SubscriptionTarget,
    pub channel: BufferedChannel<StoreNotification>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, target: SubscriptionTarget) -> Self {
        Self {
            id,
            target,
            channel: BufferedChannel::new(SUBSCRIPTION_CAPACITY, OverflowStrategy::Drop),
        }
    }

    pub fn matches(&self, snapshot: &ServiceSnapshot) -> bool {
        self.target.matches(snapshot)
    }
}
