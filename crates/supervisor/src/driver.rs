// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-service driver contract (spec §4.6, §6). Drivers are opaque
//! here by design — concrete Kubernetes/port-forward/subprocess internals
//! are out of scope; this module only defines what a driver must expose.

use async_trait::async_trait;
use envctl_core::{ServiceConfig, ServiceKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Port-forward driver status detail (spec §6 callback shapes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortForwardStatus {
    Initializing,
    ForwardingActive,
    Stopped,
    Failed,
    Error,
    Unknown,
}

/// Kubernetes-connection probe result (spec §6 callback shapes).
#[derive(Debug, Clone)]
pub enum KubernetesProbeResult {
    Ok { ready_nodes: u32, total_nodes: u32 },
    Failure { error: String },
}

/// The union of callback shapes a driver may invoke (spec §6).
#[derive(Debug, Clone)]
pub enum DriverCallback {
    PortForward { status: PortForwardStatus, operationally_ready: bool, error: Option<String> },
    Subprocess { status: String, error: Option<String>, listening_port: Option<u16>, pid: Option<u32> },
    Kubernetes { result: KubernetesProbeResult },
}

/// The capability a driver is lent to report status changes — narrow,
/// bound to the supervisor's debounce path, never a registered global
/// (spec §9, "Driver-to-supervisor callback").
pub type UpdateCallback = Arc<dyn Fn(DriverCallback) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DriverStartError {
    #[error("no driver registered for kind {0}")]
    NoDriverForKind(ServiceKind),
    #[error("driver failed to start: {0}")]
    Failed(String),
}

/// A driver owns the actual OS-level work of one service kind. It spawns
/// its own task(s) and returns a [`StopChannel`] that, when closed,
/// instructs it to terminate promptly. It must never reuse a stop channel
/// after it has been closed.
#[async_trait]
pub trait ServiceDriver: Send + Sync {
    async fn start(&self, config: ServiceConfig, update: UpdateCallback) -> Result<Arc<StopChannel>, DriverStartError>;
}

#[derive(Debug, thiserror::Error)]
#[error("stop channel already closed")]
pub struct AlreadyClosed;

/// One-shot, idempotency-enforcing stop signal handed to a running driver.
pub struct StopChannel {
    closed: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<()>>>,
}

impl StopChannel {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self { closed: AtomicBool::new(false), sender: Mutex::new(Some(tx)) }), rx)
    }

    /// Signal the driver to stop. Returns [`AlreadyClosed`] if called twice;
    /// must not close again (spec §5, Idempotence).
    pub fn close(&self) -> Result<(), AlreadyClosed> {
        let mut sender = self.sender.lock();
        match sender.take() {
            Some(tx) => {
                let _ = tx.send(());
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(AlreadyClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// A driver whose behavior is entirely scripted by test code: `start`
    /// succeeds unless the label was armed via [`MockDriver::fail_next`],
    /// records the callback so tests can drive transitions by hand, and
    /// spawns nothing.
    #[derive(Default)]
    pub struct MockDriver {
        callbacks: Mutex<HashMap<String, UpdateCallback>>,
        start_order: Mutex<Vec<String>>,
        fail_next: Mutex<std::collections::HashSet<String>>,
    }

    impl MockDriver {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Drive a callback for `label` as if the underlying process/connection
        /// reported a new status. Panics (test-only) if the label never started.
        pub fn send(&self, label: &str, callback: DriverCallback) {
            let callbacks = self.callbacks.lock();
            let cb = callbacks.get(label).unwrap_or_else(|| panic!("no mock driver callback registered for {label}"));
            cb(callback);
        }

        /// Labels in the order `start` was called, for asserting dispatch order.
        pub fn start_order(&self) -> Vec<String> {
            self.start_order.lock().clone()
        }

        /// Arm `label`'s next `start` call to fail. Consumed after one use.
        pub fn fail_next(&self, label: &str) {
            self.fail_next.lock().insert(label.to_string());
        }
    }

    #[async_trait]
    impl ServiceDriver for MockDriver {
        async fn start(&self, config: ServiceConfig, update: UpdateCallback) -> Result<Arc<StopChannel>, DriverStartError> {
            let label = config.label.as_str().to_string();
            if self.fail_next.lock().remove(&label) {
                return Err(DriverStartError::Failed("scripted failure".to_string()));
            }
            self.callbacks.lock().insert(label.clone(), update);
            self.start_order.lock().push(label);
            let (stop_channel, _rx) = StopChannel::new();
            Ok(stop_channel)
        }
    }
}
