// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stop-reason tracking that gates selective restart (spec §3, §4.5).

use serde::{Deserialize, Serialize};

/// Why a currently-stopped label is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Explicit user stop of exactly this label.
    Manual,
    /// Stopped because a parent became unhealthy or was stopped.
    Cascade,
    /// Configured but has never been started.
    NeverStarted,
}

crate::simple_display! {
    StopReason {
        Manual => "manual",
        Cascade => "cascade",
        NeverStarted => "never-started",
    }
}

impl StopReason {
    /// Selective-restart eligibility (spec §4.5): only `cascade`-stopped
    /// dependents are restarted when a parent recovers. `manual` stops
    /// preserve user intent and `never-started` labels are not "stopped"
    /// in the sense the cascade cares about.
    pub fn eligible_for_cascade_restart(self) -> bool {
        matches!(self, StopReason::Cascade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cascade_stops_are_restart_eligible() {
        assert!(!StopReason::Manual.eligible_for_cascade_restart());
        assert!(StopReason::Cascade.eligible_for_cascade_restart());
        assert!(!StopReason::NeverStarted.eligible_for_cascade_restart());
    }
}
