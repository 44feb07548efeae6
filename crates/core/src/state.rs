// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service lifecycle state machine (spec §3, §4.6) and readiness.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one managed service. Distinct from [readiness](Readiness).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Retrying,
}

crate::simple_display! {
    LifecycleState {
        Unknown => "unknown",
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
        Stopped => "stopped",
        Failed => "failed",
        Retrying => "retrying",
    }
}

impl LifecycleState {
    /// Whether a transition from `self` to `next` is legal per the state
    /// machine in spec §4.6.
    ///
    /// `Unknown` is exempted from the table: a driver may report an unmapped
    /// status at any point, and any known state may supersede it.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        if next == Unknown {
            return true;
        }
        if self == Unknown {
            return true;
        }

        matches!(
            (self, next),
            (Starting, Running | Failed | Stopped)
                | (Running, Stopping | Failed | Retrying)
                | (Stopping, Stopped | Failed)
                | (Stopped, Starting)
                | (Failed, Starting | Stopped)
                | (Retrying, Running | Failed)
        )
    }

    /// Whether this is the initial transition out of "no snapshot".
    pub fn is_valid_initial(self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Unknown)
    }
}

/// Readiness is orthogonal to lifecycle state: a service may be `Running`
/// but not yet ready. Only the reconciler flips this after a service has
/// become `Running`.
pub type Readiness = bool;

/// Enforces the invariant "readiness may be true only if state is Running".
pub fn readiness_is_legal(state: LifecycleState, ready: Readiness) -> bool {
    !ready || state == LifecycleState::Running
}
