// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The service table (spec §4.6, §9 "Service table serialization"): active
//! stop handles, configs, stop reasons, and pending-restart flags, all
//! behind the one mutex the supervisor guards. This module holds the data;
//! the supervisor holds the lock and the two-phase-locking discipline.

use crate::driver::StopChannel;
use envctl_core::{NodeId, ServiceConfig, ServiceLabel, StopReason};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What the supervisor knows about a currently-dispatched (driver running)
/// service.
pub struct ActiveEntry {
    pub stop_channel: Arc<StopChannel>,
    pub node_id: NodeId,
}

#[derive(Default)]
pub struct ServiceTable {
    pub configs: HashMap<ServiceLabel, ServiceConfig>,
    pub active: HashMap<ServiceLabel, ActiveEntry>,
    /// Labels reserved between "start dispatched" and "driver start() returned",
    /// so a concurrent second start request for the same label is rejected
    /// rather than racing the driver call.
    pub starting: HashSet<ServiceLabel>,
    pub stop_reasons: HashMap<ServiceLabel, StopReason>,
    pub pending_restart: HashSet<ServiceLabel>,
}

impl ServiceTable {
    pub fn is_busy(&self, label: &ServiceLabel) -> bool {
        self.active.contains_key(label) || self.starting.contains(label)
    }
}
