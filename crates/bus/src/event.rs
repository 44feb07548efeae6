// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The typed event carried on the bus (spec §3, §4.2).

use envctl_core::{CorrelationId, LifecycleState, ServiceData, ServiceLabel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity, totally ordered `trace < debug < info < warn < error < fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

envctl_core::simple_display! {
    Severity {
        Trace => "trace",
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
        Fatal => "fatal",
    }
}

/// What kind of cascade produced a [`EventKind::CascadeStart`]/`CascadeStop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeKind {
    Stop,
    Restart,
    Health,
}

/// The event payload, tagged by kind.
///
/// Lifecycle events carry the old/new state pair plus the readiness, error,
/// and service-specific data that produced the transition — everything a
/// consumer needs to render the change without a follow-up store read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle {
        old_state: LifecycleState,
        new_state: LifecycleState,
        ready: bool,
        error: Option<String>,
        data: ServiceData,
    },
    Health {
        ready: bool,
        error: Option<String>,
    },
    CascadeStart {
        cascade_kind: CascadeKind,
        affected: Vec<ServiceLabel>,
    },
    CascadeStop {
        cascade_kind: CascadeKind,
        affected: Vec<ServiceLabel>,
    },
    UserAction {
        action: String,
    },
    System {
        message: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Lifecycle { .. } => "lifecycle",
            EventKind::Health { .. } => "health",
            EventKind::CascadeStart { .. } => "cascade-start",
            EventKind::CascadeStop { .. } => "cascade-stop",
            EventKind::UserAction { .. } => "user-action",
            EventKind::System { .. } => "system",
        }
    }
}

/// A single item on the event bus (spec §3, Event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub source: ServiceLabel,
    pub severity: Severity,
    pub timestamp_epoch_ms: u64,
    pub correlation_id: CorrelationId,
    pub cause: String,
    pub parent_id: Option<CorrelationId>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Severity derived from lifecycle state, per spec §7's console-reporter
    /// rule: `Failed`→error, `Unknown`→warn, starting/stopping→debug,
    /// running/stopped→info.
    pub fn severity_for_state(state: LifecycleState) -> Severity {
        use LifecycleState::*;
        match state {
            Failed => Severity::Error,
            Unknown => Severity::Warn,
            Starting | Stopping | Retrying => Severity::Debug,
            Running | Stopped => Severity::Info,
        }
    }
}
