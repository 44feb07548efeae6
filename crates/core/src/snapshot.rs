// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service snapshots: the state store's per-label view (spec §3).

use crate::correlation::CorrelationId;
use crate::label::{ServiceKind, ServiceLabel};
use crate::state::LifecycleState;
use serde::{Deserialize, Serialize};

/// Service-kind-specific data carried on a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceData {
    None,
    PortForward { listening_port: Option<u16> },
    Subprocess { pid: Option<u32>, listening_port: Option<u16> },
    Kubernetes { ready_nodes: u32, total_nodes: u32 },
}

impl Default for ServiceData {
    fn default() -> Self {
        ServiceData::None
    }
}

/// The state store's authoritative view of one label at one moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub label: ServiceLabel,
    pub kind: ServiceKind,
    pub state: LifecycleState,
    pub ready: bool,
    pub error: Option<String>,
    pub data: ServiceData,
    pub last_updated_epoch_ms: u64,
    pub correlation_id: CorrelationId,
    pub cause: String,
    /// Correlation id of the cascade (if any) that produced this update.
    pub parent_correlation_id: Option<CorrelationId>,
}

impl ServiceSnapshot {
    /// Returns the `(state, ready, error-identity, data)` tuple the
    /// debounce rule (spec §4.6) compares against.
    pub fn debounce_key(&self) -> (LifecycleState, bool, Option<&str>, &ServiceData) {
        (self.state, self.ready, self.error.as_deref(), &self.data)
    }
}

/// An incoming update bound for the state store (spec §4.1, Write snapshot).
///
/// Produced by the reporter from a raw driver callback, or by the
/// reconciler for readiness-only updates.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotUpdate {
    pub label: ServiceLabel,
    pub kind: ServiceKind,
    pub state: LifecycleState,
    pub ready: bool,
    pub error: Option<String>,
    pub data: ServiceData,
    pub correlation_id: CorrelationId,
    pub cause: String,
    pub parent_correlation_id: Option<CorrelationId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_key_ignores_bookkeeping_fields() {
        let snap = ServiceSnapshot {
            label: ServiceLabel::new("a"),
            kind: ServiceKind::PortForward,
            state: LifecycleState::Running,
            ready: true,
            error: None,
            data: ServiceData::None,
            last_updated_epoch_ms: 1,
            correlation_id: CorrelationId::new(),
            cause: "x".to_string(),
            parent_correlation_id: None,
        };
        let mut later = snap.clone();
        later.last_updated_epoch_ms = 999;
        later.correlation_id = CorrelationId::new();
        assert_eq!(snap.debounce_key(), later.debounce_key());
    }
}
