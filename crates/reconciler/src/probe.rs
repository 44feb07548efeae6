// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The health-probe contract. Concrete probes (kubectl API reachability,
//! TCP dial on a port-forward, subprocess liveness) are driver internals
//! and out of scope here; this crate only defines the interface the
//! monitor loop drives.

use async_trait::async_trait;
use envctl_core::ServiceSnapshot;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Unhealthy { error: String },
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

/// Lazily constructs a label's health checker from its current snapshot.
/// Returns `None` when construction isn't yet possible (e.g. a
/// subprocess-server whose listening port hasn't been reported yet) —
/// never an error; the reconciler treats this as "not ready to probe yet."
pub trait ProbeFactory: Send + Sync {
    fn build(&self, snapshot: &ServiceSnapshot) -> Option<Arc<dyn HealthProbe>>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A probe whose outcome can be flipped from test code.
    pub struct ScriptedProbe {
        healthy: AtomicBool,
    }

    impl ScriptedProbe {
        pub fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self { healthy: AtomicBool::new(healthy) })
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> ProbeOutcome {
            if self.healthy.load(Ordering::SeqCst) {
                ProbeOutcome::Ready
            } else {
                ProbeOutcome::Unhealthy { error: "scripted failure".to_string() }
            }
        }
    }

    /// Always builds the same scripted probe, regardless of snapshot —
    /// useful for kinds that don't need deferred construction in tests.
    pub struct AlwaysFactory(pub Arc<ScriptedProbe>);

    impl ProbeFactory for AlwaysFactory {
        fn build(&self, _snapshot: &ServiceSnapshot) -> Option<Arc<dyn HealthProbe>> {
            Some(self.0.clone())
        }
    }

    /// Builds a probe only once the snapshot carries a listening port —
    /// models the subprocess-server deferred-construction case.
    pub struct PortGatedFactory(pub Arc<ScriptedProbe>);

    impl ProbeFactory for PortGatedFactory {
        fn build(&self, snapshot: &ServiceSnapshot) -> Option<Arc<dyn HealthProbe>> {
            match &snapshot.data {
                envctl_core::ServiceData::Subprocess { listening_port: Some(_), .. } => Some(self.0.clone()),
                envctl_core::ServiceData::PortForward { listening_port: Some(_) } => Some(self.0.clone()),
                _ => None,
            }
        }
    }
}
