// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service labels, kinds, and the typed dependency-graph node identifier.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Process-unique printable identifier for one managed service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceLabel(pub String);

impl ServiceLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceLabel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceLabel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for ServiceLabel {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ServiceLabel {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Which driver handles a service, and which health probe the reconciler
/// selects for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    KubernetesConnection,
    PortForward,
    SubprocessServer,
}

impl ServiceKind {
    /// Short tag used in [`NodeId`]'s `kind:label` form.
    pub fn tag(self) -> &'static str {
        match self {
            ServiceKind::KubernetesConnection => "k8s",
            ServiceKind::PortForward => "pf",
            ServiceKind::SubprocessServer => "mcp",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "k8s" => Some(ServiceKind::KubernetesConnection),
            "pf" => Some(ServiceKind::PortForward),
            "mcp" => Some(ServiceKind::SubprocessServer),
            _ => None,
        }
    }
}

crate::simple_display! {
    ServiceKind {
        KubernetesConnection => "kubernetes-connection",
        PortForward => "port-forward",
        SubprocessServer => "subprocess-server",
    }
}

/// Typed node identity in the dependency graph: `kind:label`.
///
/// Service labels alone are not sufficient because a `kubernetes-connection`
/// node may be a dependency target that is never itself a managed/supervised
/// service (see spec §3, Dependency Graph).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub kind: ServiceKind,
    pub label: ServiceLabel,
}

impl NodeId {
    pub fn new(kind: ServiceKind, label: impl Into<ServiceLabel>) -> Self {
        Self { kind, label: label.into() }
    }

    /// Parse a `kind:label` string such as `pf:mc-prom`.
    pub fn parse(s: &str) -> Option<Self> {
        let (tag, label) = s.split_once(':')?;
        let kind = ServiceKind::from_tag(tag)?;
        Some(Self { kind, label: ServiceLabel::new(label) })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.tag(), self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_round_trips_through_display_and_parse() {
        let id = NodeId::new(ServiceKind::PortForward, "mc-prom");
        assert_eq!(id.to_string(), "pf:mc-prom");
        assert_eq!(NodeId::parse("pf:mc-prom"), Some(id));
    }

    #[test]
    fn node_id_parse_rejects_unknown_tag() {
        assert_eq!(NodeId::parse("bogus:mc-prom"), None);
        assert_eq!(NodeId::parse("no-colon"), None);
    }
}
