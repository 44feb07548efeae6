// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status mapping (spec §4.6): every driver-native status maps to exactly
//! one lifecycle state. The table here is illustrative, as the spec notes;
//! drivers with different verbiage extend it in the same shape.

use crate::driver::{DriverCallback, KubernetesProbeResult, PortForwardStatus};
use envctl_core::{LifecycleState, ServiceData};

/// Translate one driver callback into the `(state, ready, error, data)`
/// tuple the supervisor debounces against the stored snapshot.
pub fn map_callback(previous_data: &ServiceData, callback: &DriverCallback) -> (LifecycleState, bool, Option<String>, ServiceData) {
    use LifecycleState::*;

    match callback {
        DriverCallback::PortForward { status, operationally_ready, error } => {
            let data = match previous_data {
                ServiceData::PortForward { .. } => previous_data.clone(),
                _ => ServiceData::PortForward { listening_port: None },
            };
            if let Some(err) = error {
                return (Failed, false, Some(err.clone()), data);
            }
            match status {
                PortForwardStatus::Initializing => (Starting, false, None, data),
                PortForwardStatus::ForwardingActive if *operationally_ready => (Running, true, None, data),
                PortForwardStatus::ForwardingActive => (Starting, false, None, data),
                PortForwardStatus::Stopped => (Stopped, false, None, data),
                PortForwardStatus::Failed | PortForwardStatus::Error => (Failed, false, None, data),
                PortForwardStatus::Unknown => (Unknown, false, None, data),
            }
        }
        DriverCallback::Subprocess { status, error, listening_port, pid } => {
            let data = ServiceData::Subprocess {
                pid: pid.or(match previous_data {
                    ServiceData::Subprocess { pid, .. } => *pid,
                    _ => None,
                }),
                listening_port: listening_port.or(match previous_data {
                    ServiceData::Subprocess { listening_port, .. } => *listening_port,
                    _ => None,
                }),
            };
            if let Some(err) = error {
                return (Failed, false, Some(err.clone()), data);
            }
            match status.as_str() {
                "subprocess-starting" | "initializing" => (Starting, false, None, data),
                "subprocess-running" => (Running, true, None, data),
                "subprocess-stopped-by-user" | "exited-gracefully" | "stopped" => (Stopped, false, None, data),
                "subprocess-start-failed" | "exited-with-error" | "failed" | "error" => (Failed, false, None, data),
                _ => (Unknown, false, None, data),
            }
        }
        DriverCallback::Kubernetes { result } => match result {
            KubernetesProbeResult::Ok { ready_nodes, total_nodes } => {
                let ready = *total_nodes > 0 && ready_nodes == total_nodes;
                (Running, ready, None, ServiceData::Kubernetes { ready_nodes: *ready_nodes, total_nodes: *total_nodes })
            }
            KubernetesProbeResult::Failure { error } => (Failed, false, Some(error.clone()), previous_data.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_forward_ready_maps_to_running() {
        let (state, ready, error, _) = map_callback(
            &ServiceData::None,
            &DriverCallback::PortForward { status: PortForwardStatus::ForwardingActive, operationally_ready: true, error: None },
        );
        assert_eq!(state, LifecycleState::Running);
        assert!(ready);
        assert!(error.is_none());
    }

    #[test]
    fn port_forward_active_but_not_ready_maps_to_starting() {
        let (state, ready, _, _) = map_callback(
            &ServiceData::None,
            &DriverCallback::PortForward { status: PortForwardStatus::ForwardingActive, operationally_ready: false, error: None },
        );
        assert_eq!(state, LifecycleState::Starting);
        assert!(!ready);
    }

    #[test]
    fn any_error_maps_to_failed_regardless_of_status() {
        let (state, ready, error, _) = map_callback(
            &ServiceData::None,
            &DriverCallback::PortForward { status: PortForwardStatus::Initializing, operationally_ready: false, error: Some("boom".into()) },
        );
        assert_eq!(state, LifecycleState::Failed);
        assert!(!ready);
        assert_eq!(error.as_deref(), Some("boom"));
    }

    #[test]
    fn subprocess_running_maps_to_running_and_preserves_port() {
        let previous = ServiceData::Subprocess { pid: Some(10), listening_port: Some(9090) };
        let (state, ready, _, data) = map_callback(
            &previous,
            &DriverCallback::Subprocess { status: "subprocess-running".into(), error: None, listening_port: None, pid: None },
        );
        assert_eq!(state, LifecycleState::Running);
        assert!(ready);
        assert_eq!(data, ServiceData::Subprocess { pid: Some(10), listening_port: Some(9090) });
    }

    #[test]
    fn kubernetes_partial_readiness_is_running_but_not_ready() {
        let (state, ready, _, data) = map_callback(
            &ServiceData::None,
            &DriverCallback::Kubernetes { result: KubernetesProbeResult::Ok { ready_nodes: 2, total_nodes: 3 } },
        );
        assert_eq!(state, LifecycleState::Running);
        assert!(!ready);
        assert_eq!(data, ServiceData::Kubernetes { ready_nodes: 2, total_nodes: 3 });
    }

    #[test]
    fn unmapped_status_is_unknown() {
        let (state, ready, _, _) = map_callback(
            &ServiceData::None,
            &DriverCallback::Subprocess { status: "mystery".into(), error: None, listening_port: None, pid: None },
        );
        assert_eq!(state, LifecycleState::Unknown);
        assert!(!ready);
    }
}
