// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! envctl-reconciler: keeps readiness truthful per label and, when enabled,
//! signals sustained parent-connection failure for the supervisor to act on
//! (spec §4.4).

pub mod probe;
pub mod reconciler;

pub use probe::{HealthProbe, ProbeFactory, ProbeOutcome};
pub use reconciler::{Reconciler, BASE_TICK, DEFAULT_PROBE_INTERVAL, PROBE_TIMEOUT, SUSTAINED_FAILURE_THRESHOLD};
