// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Point-in-time metrics snapshot (spec §4.1, Metrics).

use envctl_core::{LifecycleState, ServiceKind};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub total_services: usize,
    pub active_subscriptions: usize,
    pub state_changes: u64,
    pub per_kind: HashMap<ServiceKind, usize>,
    pub per_state: HashMap<LifecycleState, usize>,
    pub last_change_epoch_ms: Option<u64>,
    pub subscription_deliveries: u64,
    pub subscription_drops: u64,
}
