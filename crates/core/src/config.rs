// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service configuration: the opaque-to-drivers payload the supervisor
//! accepts, expressed as a tagged union rather than a runtime type
//! assertion (spec §9, "Variant-over-kind instead of dynamic dispatch").

use crate::label::{NodeId, ServiceKind, ServiceLabel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Driver-specific configuration payload. The supervisor branches on the
/// tag; a payload that doesn't match the service's declared `kind` is a
/// configuration error (spec §7, category 1), never a runtime panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriverConfig {
    KubernetesConnection(KubernetesConnectionConfig),
    PortForward(PortForwardConfig),
    SubprocessServer(SubprocessServerConfig),
}

impl DriverConfig {
    pub fn kind(&self) -> ServiceKind {
        match self {
            DriverConfig::KubernetesConnection(_) => ServiceKind::KubernetesConnection,
            DriverConfig::PortForward(_) => ServiceKind::PortForward,
            DriverConfig::SubprocessServer(_) => ServiceKind::SubprocessServer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesConnectionConfig {
    pub context: String,
    pub kubeconfig_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardConfig {
    pub namespace: String,
    pub resource: String,
    pub local_port: u16,
    pub remote_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SubprocessServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Per-label configuration (spec §3, Service Configuration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub label: ServiceLabel,
    pub kind: ServiceKind,
    pub driver_config: DriverConfig,
    /// Health-check interval override; reconciler default is 30s (spec §4.4).
    pub health_check_interval: Option<Duration>,
    pub auto_start: bool,
    pub depends_on: Vec<NodeId>,
}

impl ServiceConfig {
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.kind, self.label.clone())
    }

    /// Reject configs whose driver payload doesn't match the declared kind
    /// (spec §7, category 1 — configuration error, surfaced synchronously,
    /// no state entered for the offending label).
    pub fn validate_kind(&self) -> Result<(), ConfigMismatch> {
        if self.driver_config.kind() == self.kind {
            Ok(())
        } else {
            Err(ConfigMismatch { label: self.label.clone(), declared: self.kind, payload: self.driver_config.kind() })
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("service {label} declares kind {declared} but carries a {payload} driver config")]
pub struct ConfigMismatch {
    pub label: ServiceLabel,
    pub declared: ServiceKind,
    pub payload: ServiceKind,
}

#[cfg(any(test, feature = "test-support"))]
impl ServiceConfig {
    /// Build a minimal, valid config for tests.
    pub fn test_fixture(kind: ServiceKind, label: impl Into<ServiceLabel>) -> Self {
        let label = label.into();
        let driver_config = match kind {
            ServiceKind::KubernetesConnection => {
                DriverConfig::KubernetesConnection(KubernetesConnectionConfig {
                    context: "test-context".to_string(),
                    kubeconfig_path: None,
                })
            }
            ServiceKind::PortForward => DriverConfig::PortForward(PortForwardConfig {
                namespace: "default".to_string(),
                resource: "svc/test".to_string(),
                local_port: 0,
                remote_port: 9090,
            }),
            ServiceKind::SubprocessServer => {
                DriverConfig::SubprocessServer(SubprocessServerConfig::default())
            }
        };
        Self {
            label,
            kind,
            driver_config,
            health_check_interval: None,
            auto_start: true,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.depends_on = nodes.into_iter().collect();
        self
    }
}
