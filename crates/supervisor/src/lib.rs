// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! envctl-supervisor: the public façade (spec §4.6, §6) — accepts commands,
//! drives drivers, routes callbacks, orchestrates cascades.

pub mod driver;
pub mod status_map;
pub mod table;
pub mod supervisor;

pub use driver::{
    AlreadyClosed, DriverCallback, DriverStartError, KubernetesProbeResult, PortForwardStatus,
    ServiceDriver, StopChannel, UpdateCallback,
};
pub use status_map::map_callback;
pub use supervisor::{Supervisor, SupervisorError, LEVEL_WAIT_TIMEOUT};
