// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciler's monitor loop (spec §4.4): keeps readiness truthful and
//! emits a cascade-health event on sustained parent failure.

use crate::probe::{HealthProbe, ProbeFactory, ProbeOutcome};
use envctl_bus::{CascadeKind, Event, EventBus, EventKind, Severity};
use envctl_core::{Clock, CorrelationId, ServiceKind, ServiceLabel, SystemClock};
use envctl_reporter::{RawHealthUpdate, Reporter};
use envctl_store::StateStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Base tick of the monitor loop (spec §4.4, design value).
pub const BASE_TICK: Duration = Duration::from_secs(5);
/// Default per-service health-check interval (spec §4.4).
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
/// Bounded timeout for a single probe (spec §4.4, design value).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Consecutive probe failures before a `kubernetes-connection` parent is
/// considered sustained-unhealthy and a cascade-health event is emitted.
pub const SUSTAINED_FAILURE_THRESHOLD: u32 = 3;

struct LabelEntry {
    kind: ServiceKind,
    checker: Option<Arc<dyn HealthProbe>>,
    interval: Duration,
    last_probe_at: Option<Instant>,
    consecutive_failures: u32,
}

pub struct Reconciler<C: Clock = SystemClock> {
    clock: C,
    store: Arc<StateStore<C>>,
    reporter: Arc<dyn Reporter>,
    bus: Arc<EventBus>,
    factory: Arc<dyn ProbeFactory>,
    labels: Mutex<HashMap<ServiceLabel, LabelEntry>>,
    cascade_health_enabled: AtomicBool,
}

impl<C: Clock> Reconciler<C> {
    pub fn new(clock: C, store: Arc<StateStore<C>>, reporter: Arc<dyn Reporter>, bus: Arc<EventBus>, factory: Arc<dyn ProbeFactory>) -> Self {
        Self { clock, store, reporter, bus, factory, labels: Mutex::new(HashMap::new()), cascade_health_enabled: AtomicBool::new(false) }
    }

    /// Enabled explicitly; disabled by default (see design notes on the
    /// reconciler's cascade-on-health hook).
    pub fn enable_health_cascade(&self) {
        self.cascade_health_enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_health_cascade_enabled(&self) -> bool {
        self.cascade_health_enabled.load(Ordering::SeqCst)
    }

    /// Register a label for monitoring, constructed lazily on first tick.
    pub fn register(&self, label: ServiceLabel, kind: ServiceKind, interval_override: Option<Duration>) {
        self.labels.lock().insert(
            label,
            LabelEntry {
                kind,
                checker: None,
                interval: interval_override.unwrap_or(DEFAULT_PROBE_INTERVAL),
                last_probe_at: None,
                consecutive_failures: 0,
            },
        );
    }

    /// On service stop, the reconciler discards its checker, interval
    /// override, and last-status entry for that label (spec §4.4).
    pub fn deregister(&self, label: &ServiceLabel) {
        self.labels.lock().remove(label);
    }

    pub fn is_registered(&self, label: &ServiceLabel) -> bool {
        self.labels.lock().contains_key(label)
    }

    /// Run the monitor loop until `cancel` fires. Cancellation terminates
    /// all pending probes (they are spawned as independent tasks and simply
    /// abandoned; each has its own bounded timeout regardless).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken)
    where
        C: 'static,
    {
        let mut ticker = tokio::time::interval(BASE_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciler monitor loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Probe every label whose interval has elapsed. Exposed directly so
    /// tests can drive reconciliation without waiting on the real loop.
    pub async fn tick(self: &Arc<Self>)
    where
        C: 'static,
    {
        let due = self.collect_due_labels();
        for (label, kind) in due {
            let this = self.clone();
            tokio::spawn(async move {
                this.probe_one(label, kind).await;
            });
        }
    }

    fn collect_due_labels(&self) -> Vec<(ServiceLabel, ServiceKind)> {
        let now = self.clock.now();
        let mut labels = self.labels.lock();
        let mut due = Vec::new();
        for (label, entry) in labels.iter_mut() {
            let is_due = match entry.last_probe_at {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= entry.interval,
            };
            if is_due {
                entry.last_probe_at = Some(now);
                due.push((label.clone(), entry.kind));
            }
        }
        due
    }

    async fn probe_one(self: Arc<Self>, label: ServiceLabel, kind: ServiceKind) {
        let Some(snapshot) = self.store.read_snapshot(&label) else {
            debug!(service = %label, "no snapshot yet, skipping probe");
            return;
        };

        let checker = {
            let mut labels = self.labels.lock();
            let Some(entry) = labels.get_mut(&label) else { return };
            if entry.checker.is_none() {
                entry.checker = self.factory.build(&snapshot);
            }
            entry.checker.clone()
        };

        let Some(checker) = checker else {
            debug!(service = %label, "health checker not constructible yet");
            return;
        };

        let outcome = tokio::time::timeout(PROBE_TIMEOUT, checker.probe()).await;
        match outcome {
            Ok(ProbeOutcome::Ready) => {
                self.record_result(&label, true);
                self.reporter.report_health(RawHealthUpdate {
                    label,
                    kind,
                    ready: true,
                    error: None,
                    failed: false,
                    correlation_id: None,
                    cause: "health probe".to_string(),
                });
            }
            Ok(ProbeOutcome::Unhealthy { error }) => {
                let sustained = self.record_result(&label, false);
                self.reporter.report_health(RawHealthUpdate {
                    label: label.clone(),
                    kind,
                    ready: false,
                    error: Some(error),
                    failed: false,
                    correlation_id: None,
                    cause: "health probe".to_string(),
                });
                if sustained && kind == ServiceKind::KubernetesConnection && self.is_health_cascade_enabled() {
                    self.emit_cascade_health(label);
                }
            }
            Err(_) => {
                warn!(service = %label, timeout_secs = PROBE_TIMEOUT.as_secs(), "health probe timed out");
                self.record_result(&label, false);
            }
        }
    }

    /// Returns true the first time the failure count crosses the sustained
    /// threshold (edge-triggered, so the cascade fires once per outage).
    fn record_result(&self, label: &ServiceLabel, ready: bool) -> bool {
        let mut labels = self.labels.lock();
        let Some(entry) = labels.get_mut(label) else { return false };
        if ready {
            entry.consecutive_failures = 0;
            false
        } else {
            entry.consecutive_failures += 1;
            entry.consecutive_failures == SUSTAINED_FAILURE_THRESHOLD
        }
    }

    fn emit_cascade_health(&self, label: ServiceLabel) {
        warn!(service = %label, "sustained health-check failure, emitting cascade-health event");
        let event = Event {
            kind: EventKind::CascadeStart { cascade_kind: CascadeKind::Health, affected: vec![label.clone()] },
            source: label,
            severity: Severity::Error,
            timestamp_epoch_ms: self.clock.epoch_ms(),
            correlation_id: CorrelationId::new(),
            cause: "sustained health-check failure".to_string(),
            parent_id: None,
            metadata: Default::default(),
        };
        self.bus.publish(event);
    }
}
