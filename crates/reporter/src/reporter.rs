// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reporter contract (spec §4.3): the adapter from driver callbacks to
//! the state store and event bus. The supervisor owns debounce; by the time
//! a [`RawStatusUpdate`] reaches a reporter it is assumed worth writing.

use envctl_core::{CorrelationId, LifecycleState, ServiceData, ServiceKind, ServiceLabel};

/// A raw status update, as translated by the supervisor from a driver
/// callback through the status-mapping table (spec §4.6).
#[derive(Debug, Clone)]
pub struct RawStatusUpdate {
    pub label: ServiceLabel,
    pub kind: ServiceKind,
    pub state: LifecycleState,
    pub ready: bool,
    pub error: Option<String>,
    pub data: ServiceData,
    pub correlation_id: Option<CorrelationId>,
    pub cause: String,
    pub parent_correlation_id: Option<CorrelationId>,
}

/// A raw health result from the reconciler (spec §4.4).
#[derive(Debug, Clone)]
pub struct RawHealthUpdate {
    pub label: ServiceLabel,
    pub kind: ServiceKind,
    pub ready: bool,
    pub error: Option<String>,
    /// Set only when the probe result itself constitutes a failed service,
    /// not merely an unhealthy one (spec §4.3: "do not alter lifecycle
    /// state unless the update explicitly carries Failed").
    pub failed: bool,
    pub correlation_id: Option<CorrelationId>,
    pub cause: String,
}

/// Adapter from drivers' update callbacks to the store + bus (spec §4.3).
/// Multiple reporters may coexist; the supervisor is agnostic to sinks.
pub trait Reporter: Send + Sync {
    /// Forward a status update. Returns whether the lifecycle state
    /// actually changed (and thus whether a lifecycle event was published).
    fn report_status(&self, update: RawStatusUpdate) -> bool;

    /// Forward a reconciler health result.
    fn report_health(&self, update: RawHealthUpdate);
}
