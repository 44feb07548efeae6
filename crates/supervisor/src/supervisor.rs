// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor (spec §4.6): public façade over the service table, the
//! drivers, the reconciler, and the dependency engine. Every table-touching
//! operation follows the two-phase discipline from spec §9: inspect+mutate
//! under the table lock to produce a plan, then execute the plan (a driver
//! call, a wait on the store) without the lock held.

use crate::driver::{DriverCallback, DriverStartError, ServiceDriver, UpdateCallback};
use crate::status_map::map_callback;
use crate::table::{ActiveEntry, ServiceTable};
use envctl_bus::{CascadeKind, Event, EventBus, EventKind, Severity};
use envctl_core::{
    Clock, ConfigMismatch, CorrelationId, LifecycleState, NodeId, ServiceConfig, ServiceData,
    ServiceKind, ServiceLabel, StopReason, SystemClock,
};
use envctl_depgraph::{DependencyGraph, GraphError};
use envctl_reconciler::Reconciler;
use envctl_reporter::{RawStatusUpdate, Reporter};
use envctl_store::{StateStore, SubscriptionTarget};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Per-level wait bound in Ordered-start (spec §4.5, design value), reused
/// as the Restart wait bound for the same reason: neither is a correctness
/// requirement, both exist purely to bound how long one command blocks.
pub const LEVEL_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigMismatch),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("driver start failed for {0}: {1}")]
    DriverStart(ServiceLabel, String),
    #[error("service {0} is already active or starting")]
    AlreadyActive(ServiceLabel),
    #[error("service {0} is not active")]
    NotActive(ServiceLabel),
    #[error("service {0}'s stop channel is already closed")]
    AlreadyClosed(ServiceLabel),
    #[error("no configuration known for service {0}")]
    NotFound(ServiceLabel),
}

pub struct Supervisor<C: Clock = SystemClock> {
    clock: C,
    store: Arc<StateStore<C>>,
    reporter: RwLock<Arc<dyn Reporter>>,
    reconciler: Arc<Reconciler<C>>,
    bus: Arc<EventBus>,
    drivers: HashMap<ServiceKind, Arc<dyn ServiceDriver>>,
    table: Mutex<ServiceTable>,
}

impl<C: Clock> Supervisor<C> {
    pub fn new(
        clock: C,
        store: Arc<StateStore<C>>,
        reporter: Arc<dyn Reporter>,
        reconciler: Arc<Reconciler<C>>,
        bus: Arc<EventBus>,
        drivers: HashMap<ServiceKind, Arc<dyn ServiceDriver>>,
    ) -> Self {
        Self { clock, store, reporter: RwLock::new(reporter), reconciler, bus, drivers, table: Mutex::new(ServiceTable::default()) }
    }

    // -- readers (spec §6) --

    pub fn get_config(&self, label: &ServiceLabel) -> Option<ServiceConfig> {
        self.table.lock().configs.get(label).cloned()
    }

    pub fn is_active(&self, label: &ServiceLabel) -> bool {
        self.table.lock().active.contains_key(label)
    }

    pub fn list_active_labels(&self) -> Vec<ServiceLabel> {
        self.table.lock().active.keys().cloned().collect()
    }

    pub fn stop_reason(&self, label: &ServiceLabel) -> Option<StopReason> {
        self.table.lock().stop_reasons.get(label).copied()
    }

    pub fn get_reconciler(&self) -> &Arc<Reconciler<C>> {
        &self.reconciler
    }

    pub fn set_reporter(&self, reporter: Arc<dyn Reporter>) {
        *self.reporter.write() = reporter;
    }

    /// Make a label and its config known to the supervisor without starting
    /// it (e.g. a config discovered by `StartAll` for a label whose turn in
    /// the ordered start hasn't come yet, or a label a caller wants
    /// `Restart`-eligible before ever starting it).
    pub fn register_config(&self, config: ServiceConfig) {
        let mut table = self.table.lock();
        table.stop_reasons.entry(config.label.clone()).or_insert(StopReason::NeverStarted);
        table.configs.insert(config.label.clone(), config);
    }

    // -- start path --

    /// Builds the dependency graph from `configs` and dispatches via
    /// Ordered-start.
    pub async fn start_all(self: &Arc<Self>, configs: Vec<ServiceConfig>) -> Result<Vec<(ServiceLabel, Result<(), SupervisorError>)>, SupervisorError> {
        let graph = DependencyGraph::build(&configs)?;
        Ok(self.start_with_order(configs, &graph).await)
    }

    /// Ordered-start (spec §4.5): level by level, concurrent dispatch within
    /// a level, bounded wait for `Running` before advancing.
    pub async fn start_with_order(self: &Arc<Self>, configs: Vec<ServiceConfig>, graph: &DependencyGraph) -> Vec<(ServiceLabel, Result<(), SupervisorError>)> {
        if configs.is_empty() {
            return Vec::new();
        }
        let correlation_id = CorrelationId::new();
        let config_by_label: HashMap<ServiceLabel, ServiceConfig> =
            configs.into_iter().map(|c| (c.label.clone(), c)).collect();
        let requested: Vec<NodeId> = config_by_label.values().map(|c| c.node_id()).collect();
        let levels = graph.level_sort(&requested);

        let mut results = Vec::new();
        for level in levels {
            let mut handles: Vec<(ServiceLabel, JoinHandle<Result<(), SupervisorError>>)> = Vec::new();
            for node in &level {
                let Some(config) = config_by_label.get(&node.label).cloned() else { continue };
                let label = config.label.clone();
                let this = Arc::clone(self);
                handles.push((label, tokio::spawn(async move { this.start_one(config, correlation_id, None).await })));
            }

            let mut dispatched = Vec::new();
            for (label, handle) in handles {
                let result = match handle.await {
                    Ok(r) => r,
                    Err(join_err) => Err(SupervisorError::DriverStart(label.clone(), join_err.to_string())),
                };
                if result.is_ok() {
                    dispatched.push(label.clone());
                }
                results.push((label, result));
            }

            self.wait_for_level_running(dispatched).await;
        }
        results
    }

    /// For each restart-eligible dependent of `node` (spec §4.5), dispatch a
    /// start, respecting ordered-start over just that subset.
    pub async fn start_dependents_of(self: &Arc<Self>, node: &NodeId, graph: &DependencyGraph) -> Vec<(ServiceLabel, Result<(), SupervisorError>)> {
        let eligible = {
            let table = self.table.lock();
            graph.restart_candidates(node, |label| table.stop_reasons.get(label).copied())
        };
        let configs: Vec<ServiceConfig> = {
            let table = self.table.lock();
            eligible.iter().filter_map(|label| table.configs.get(label).cloned()).collect()
        };
        if configs.is_empty() {
            return Vec::new();
        }
        self.start_with_order(configs, graph).await
    }

    async fn start_one(self: &Arc<Self>, config: ServiceConfig, correlation_id: CorrelationId, parent_correlation_id: Option<CorrelationId>) -> Result<(), SupervisorError> {
        config.validate_kind()?;

        let driver = match self.drivers.get(&config.kind).cloned() {
            Some(driver) => driver,
            None => {
                return Err(SupervisorError::DriverStart(config.label.clone(), DriverStartError::NoDriverForKind(config.kind).to_string()));
            }
        };

        let label = config.label.clone();
        let kind = config.kind;
        let node_id = config.node_id();
        let health_interval = config.health_check_interval;

        {
            let mut table = self.table.lock();
            if table.is_busy(&label) {
                return Err(SupervisorError::AlreadyActive(label));
            }
            table.starting.insert(label.clone());
            table.configs.insert(label.clone(), config.clone());
        }

        self.reporter.read().report_status(RawStatusUpdate {
            label: label.clone(),
            kind,
            state: LifecycleState::Starting,
            ready: false,
            error: None,
            data: ServiceData::None,
            correlation_id: Some(correlation_id),
            cause: "start requested".to_string(),
            parent_correlation_id,
        });

        let update = self.make_update_callback(label.clone(), kind, correlation_id, parent_correlation_id);

        match driver.start(config, update).await {
            Ok(stop_channel) => {
                {
                    let mut table = self.table.lock();
                    table.starting.remove(&label);
                    table.active.insert(label.clone(), ActiveEntry { stop_channel, node_id });
                }
                self.reconciler.register(label, kind, health_interval);
                Ok(())
            }
            Err(err) => {
                self.table.lock().starting.remove(&label);
                warn!(service = %label, error = %err, "driver failed to start");
                self.reporter.read().report_status(RawStatusUpdate {
                    label: label.clone(),
                    kind,
                    state: LifecycleState::Failed,
                    ready: false,
                    error: Some(err.to_string()),
                    data: ServiceData::None,
                    correlation_id: Some(correlation_id),
                    cause: "driver start failed".to_string(),
                    parent_correlation_id,
                });
                Err(SupervisorError::DriverStart(label, err.to_string()))
            }
        }
    }

    /// The narrow capability lent to a driver (spec §9, "Driver-to-supervisor
    /// callback"). Synchronous: debounces against the store and, if the
    /// callback carries real change, writes through the reporter, all under
    /// the table mutex as the short critical section spec §9 calls for.
    fn make_update_callback(self: &Arc<Self>, label: ServiceLabel, kind: ServiceKind, correlation_id: CorrelationId, parent_correlation_id: Option<CorrelationId>) -> UpdateCallback {
        let this = Arc::clone(self);
        Arc::new(move |callback: DriverCallback| {
            this.handle_driver_callback(&label, kind, correlation_id, parent_correlation_id, callback);
        })
    }

    fn handle_driver_callback(&self, label: &ServiceLabel, kind: ServiceKind, correlation_id: CorrelationId, parent_correlation_id: Option<CorrelationId>, callback: DriverCallback) {
        let mut table = self.table.lock();

        let existing = self.store.read_snapshot(label);
        let previous_data = existing.as_ref().map(|s| s.data.clone()).unwrap_or(ServiceData::None);
        let (state, ready, error, data) = map_callback(&previous_data, &callback);

        if let Some(existing) = &existing {
            if existing.debounce_key() == (state, ready, error.as_deref(), &data) {
                return;
            }
        }

        self.reporter.read().report_status(RawStatusUpdate {
            label: label.clone(),
            kind,
            state,
            ready,
            error,
            data,
            correlation_id: Some(correlation_id),
            cause: callback_cause(&callback),
            parent_correlation_id,
        });

        if matches!(state, LifecycleState::Stopped | LifecycleState::Failed) {
            table.active.remove(label);
        }

        // Stop reasons are cleared the instant the label re-enters Running
        // (spec §4.5), not at dispatch time: a start that is dispatched but
        // then fails must leave a prior `Cascade`/`Manual` marking intact, or
        // a restart-eligible dependent that fails to come back up would
        // silently lose its cascade-restart eligibility forever.
        if matches!(state, LifecycleState::Running) {
            table.stop_reasons.remove(label);
        }
    }

    // -- stop path --

    /// `Stop(label)`: closes the stop channel and marks `reason`. The
    /// cascade engine is never invoked from here (spec §4.6).
    pub fn stop(&self, label: &ServiceLabel, reason: StopReason) -> Result<(), SupervisorError> {
        self.reconciler.deregister(label);

        let stop_channel = {
            let table = self.table.lock();
            table.active.get(label).map(|e| e.stop_channel.clone())
        };
        let Some(channel) = stop_channel else {
            return Err(SupervisorError::NotActive(label.clone()));
        };

        match channel.close() {
            Ok(()) => {
                self.table.lock().stop_reasons.insert(label.clone(), reason);
                Ok(())
            }
            Err(crate::driver::AlreadyClosed) => Err(SupervisorError::AlreadyClosed(label.clone())),
        }
    }

    /// `StopWithDependents(label)`: the stop cascade (spec §4.5). `label`
    /// gets stop reason `manual`; every transitive dependent gets `cascade`.
    pub fn stop_with_dependents(&self, label: &ServiceLabel, graph: &DependencyGraph) -> Vec<(ServiceLabel, Result<(), SupervisorError>)> {
        let Some(kind) = self.table.lock().configs.get(label).map(|c| c.kind) else {
            return vec![(label.clone(), Err(SupervisorError::NotFound(label.clone())))];
        };
        let node = NodeId::new(kind, label.clone());
        let order = graph.stop_cascade_order(&node);
        let correlation_id = CorrelationId::new();

        self.emit_cascade(CascadeKind::Stop, order.clone(), correlation_id, true);

        let results: Vec<(ServiceLabel, Result<(), SupervisorError>)> = order
            .iter()
            .map(|dep_label| {
                let reason = if dep_label == label { StopReason::Manual } else { StopReason::Cascade };
                (dep_label.clone(), self.stop(dep_label, reason))
            })
            .collect();

        self.emit_cascade(CascadeKind::Stop, order, correlation_id, false);
        results
    }

    /// `StopAll`: close every active stop channel idempotently.
    pub fn stop_all(&self) {
        let labels: Vec<ServiceLabel> = self.table.lock().active.keys().cloned().collect();
        for label in labels {
            let _ = self.stop(&label, StopReason::Manual);
        }
    }

    // -- restart path --

    /// `Restart(label)` (spec §4.6): mark pending-restart, stop, and on the
    /// resulting terminal transition dispatch a single-service start from
    /// the stored config. If not currently active, synthesize the `Stopped`
    /// observation so the same path runs (spec §8, scenario 6).
    pub async fn restart(self: &Arc<Self>, label: &ServiceLabel) -> Result<(), SupervisorError> {
        let config = self.get_config(label).ok_or_else(|| SupervisorError::NotFound(label.clone()))?;
        self.table.lock().pending_restart.insert(label.clone());

        let is_active = self.table.lock().active.contains_key(label);
        if is_active {
            match self.stop(label, StopReason::Manual) {
                Ok(()) | Err(SupervisorError::AlreadyClosed(_)) => {}
                Err(err) => return Err(err),
            }
            self.wait_for_terminal(label).await;
        } else {
            self.reporter.read().report_status(RawStatusUpdate {
                label: label.clone(),
                kind: config.kind,
                state: LifecycleState::Stopped,
                ready: false,
                error: None,
                data: ServiceData::None,
                correlation_id: Some(CorrelationId::new()),
                cause: "restart requested on inactive service".to_string(),
                parent_correlation_id: None,
            });
        }

        self.dispatch_pending_restart(label).await
    }

    async fn dispatch_pending_restart(self: &Arc<Self>, label: &ServiceLabel) -> Result<(), SupervisorError> {
        let config = {
            let mut table = self.table.lock();
            if !table.pending_restart.remove(label) {
                return Ok(());
            }
            table.configs.get(label).cloned()
        };
        let Some(config) = config else { return Err(SupervisorError::NotFound(label.clone())) };
        self.start_one(config, CorrelationId::new(), None).await
    }

    // -- waits --

    async fn wait_for_level_running(self: &Arc<Self>, labels: Vec<ServiceLabel>) {
        let mut handles = Vec::new();
        for label in labels {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let ready = this.wait_for_running(&label).await;
                (label, ready)
            }));
        }
        for handle in handles {
            if let Ok((label, ready)) = handle.await {
                if !ready {
                    warn!(service = %label, timeout_secs = LEVEL_WAIT_TIMEOUT.as_secs(), "level wait timed out, proceeding to next level");
                }
            }
        }
    }

    async fn wait_for_running(&self, label: &ServiceLabel) -> bool {
        if matches!(self.store.read_snapshot(label), Some(s) if s.state == LifecycleState::Running) {
            return true;
        }
        self.wait_for_state(label, |state| state == LifecycleState::Running).await
    }

    async fn wait_for_terminal(&self, label: &ServiceLabel) -> bool {
        if matches!(self.store.read_snapshot(label), Some(s) if matches!(s.state, LifecycleState::Stopped | LifecycleState::Failed)) {
            return true;
        }
        self.wait_for_state(label, |state| matches!(state, LifecycleState::Stopped | LifecycleState::Failed)).await
    }

    async fn wait_for_state(&self, label: &ServiceLabel, matches_target: impl Fn(LifecycleState) -> bool) -> bool {
        let (sub_id, channel) = self.store.subscribe(SubscriptionTarget::Label(label.clone()));
        let result = tokio::time::timeout(LEVEL_WAIT_TIMEOUT, async {
            loop {
                match channel.recv().await {
                    Some(notification) if matches_target(notification.snapshot.state) => return true,
                    Some(_) => continue,
                    None => return false,
                }
            }
        })
        .await
        .unwrap_or(false);
        self.store.unsubscribe(sub_id);
        result
    }

    fn emit_cascade(&self, kind: CascadeKind, affected: Vec<ServiceLabel>, correlation_id: CorrelationId, starting: bool) {
        self.store.record_cascade_operation(correlation_id, kind, affected.clone());
        let event = Event {
            kind: if starting {
                EventKind::CascadeStart { cascade_kind: kind, affected: affected.clone() }
            } else {
                EventKind::CascadeStop { cascade_kind: kind, affected: affected.clone() }
            },
            source: affected.first().cloned().unwrap_or_else(|| ServiceLabel::new("cascade")),
            severity: Severity::Info,
            timestamp_epoch_ms: self.clock.epoch_ms(),
            correlation_id,
            cause: "cascade".to_string(),
            parent_id: None,
            metadata: Default::default(),
        };
        self.bus.publish(event);
    }
}

fn callback_cause(callback: &DriverCallback) -> String {
    match callback {
        DriverCallback::PortForward { .. } => "port-forward status".to_string(),
        DriverCallback::Subprocess { .. } => "subprocess status".to_string(),
        DriverCallback::Kubernetes { .. } => "kubernetes probe".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::test_support::MockDriver;
    use crate::driver::{KubernetesProbeResult, PortForwardStatus};
    use envctl_core::FakeClock;
    use envctl_reconciler::probe::test_support::{AlwaysFactory, ScriptedProbe};
    use envctl_reconciler::Reconciler;
    use envctl_reporter::ConsoleReporter;
    use std::collections::HashSet;

    fn harness() -> (Arc<Supervisor<FakeClock>>, Arc<StateStore<FakeClock>>, Arc<MockDriver>) {
        let clock = FakeClock::new();
        let store = Arc::new(StateStore::new(clock.clone()));
        let bus = Arc::new(EventBus::new());
        let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter::new(clock.clone(), store.clone(), bus.clone()));
        let probe_factory = Arc::new(AlwaysFactory(ScriptedProbe::new(true)));
        let reconciler = Arc::new(Reconciler::new(clock.clone(), store.clone(), reporter.clone(), bus.clone(), probe_factory));
        let mock = MockDriver::new();
        let mut drivers: HashMap<ServiceKind, Arc<dyn ServiceDriver>> = HashMap::new();
        drivers.insert(ServiceKind::KubernetesConnection, mock.clone());
        drivers.insert(ServiceKind::PortForward, mock.clone());
        drivers.insert(ServiceKind::SubprocessServer, mock.clone());
        let supervisor = Arc::new(Supervisor::new(clock, store.clone(), reporter, reconciler, bus, drivers));
        (supervisor, store, mock)
    }

    fn kind_of(label: &str) -> ServiceKind {
        if label == "main-cluster" {
            ServiceKind::KubernetesConnection
        } else if label.starts_with("mc-prom") {
            ServiceKind::PortForward
        } else {
            ServiceKind::SubprocessServer
        }
    }

    fn send_running(mock: &MockDriver, label: &str) {
        match kind_of(label) {
            ServiceKind::KubernetesConnection => {
                mock.send(label, DriverCallback::Kubernetes { result: KubernetesProbeResult::Ok { ready_nodes: 3, total_nodes: 3 } })
            }
            ServiceKind::PortForward => mock.send(
                label,
                DriverCallback::PortForward { status: PortForwardStatus::ForwardingActive, operationally_ready: true, error: None },
            ),
            ServiceKind::SubprocessServer => mock.send(
                label,
                DriverCallback::Subprocess {
                    status: "subprocess-running".to_string(),
                    error: None,
                    listening_port: Some(9000),
                    pid: Some(123),
                },
            ),
        }
    }

    /// Watches `mock`'s start order and immediately reports each newly
    /// started label as `Running`, until `expected` distinct labels have
    /// been driven. This is what lets `start_with_order`'s per-level wait
    /// resolve without a real 30s timeout.
    fn spawn_auto_driver(mock: Arc<MockDriver>, expected: usize) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut driven = HashSet::new();
            while driven.len() < expected {
                for label in mock.start_order() {
                    if driven.insert(label.clone()) {
                        send_running(&mock, &label);
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    fn chain() -> Vec<ServiceConfig> {
        let k8s = ServiceConfig::test_fixture(ServiceKind::KubernetesConnection, "main-cluster");
        let pf = ServiceConfig::test_fixture(ServiceKind::PortForward, "mc-prom")
            .depends_on(vec![NodeId::new(ServiceKind::KubernetesConnection, "main-cluster")]);
        let prom = ServiceConfig::test_fixture(ServiceKind::SubprocessServer, "prom")
            .depends_on(vec![NodeId::new(ServiceKind::PortForward, "mc-prom")]);
        let grafana = ServiceConfig::test_fixture(ServiceKind::SubprocessServer, "grafana")
            .depends_on(vec![NodeId::new(ServiceKind::PortForward, "mc-prom")]);
        // Intentionally out of dependency order, to exercise the level sort.
        vec![grafana, prom, pf, k8s]
    }

    #[tokio::test]
    async fn ordered_start_dispatches_in_dependency_order_and_converges() {
        let (supervisor, store, mock) = harness();
        let driver = spawn_auto_driver(Arc::clone(&mock), 4);

        let results = supervisor.start_all(chain()).await.unwrap();
        driver.await.unwrap();

        assert!(results.iter().all(|(_, r)| r.is_ok()));

        let order = mock.start_order();
        let pos = |label: &str| order.iter().position(|l| l == label).unwrap();
        assert!(pos("main-cluster") < pos("mc-prom"));
        assert!(pos("mc-prom") < pos("prom"));
        assert!(pos("mc-prom") < pos("grafana"));

        assert_eq!(store.read_snapshot(&ServiceLabel::new("prom")).unwrap().state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn start_with_order_on_empty_configs_is_a_no_op() {
        let (supervisor, _store, _mock) = harness();
        let results = supervisor.start_all(Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn stop_with_dependents_marks_target_manual_and_descendants_cascade() {
        let (supervisor, _store, mock) = harness();
        let configs = chain();
        let graph = DependencyGraph::build(&configs).unwrap();

        let driver = spawn_auto_driver(Arc::clone(&mock), 4);
        supervisor.start_all(configs).await.unwrap();
        driver.await.unwrap();

        let k8s_label = ServiceLabel::new("main-cluster");
        let results = supervisor.stop_with_dependents(&k8s_label, &graph);
        assert!(results.iter().all(|(_, r)| r.is_ok()), "{results:?}");

        assert_eq!(supervisor.stop_reason(&k8s_label), Some(StopReason::Manual));
        assert_eq!(supervisor.stop_reason(&ServiceLabel::new("mc-prom")), Some(StopReason::Cascade));
        assert_eq!(supervisor.stop_reason(&ServiceLabel::new("prom")), Some(StopReason::Cascade));
        assert_eq!(supervisor.stop_reason(&ServiceLabel::new("grafana")), Some(StopReason::Cascade));
    }

    #[tokio::test]
    async fn failed_restart_dispatch_preserves_cascade_stop_reason() {
        let (supervisor, _store, mock) = harness();
        let configs = chain();
        let graph = DependencyGraph::build(&configs).unwrap();

        let driver = spawn_auto_driver(Arc::clone(&mock), 4);
        supervisor.start_all(configs).await.unwrap();
        driver.await.unwrap();

        let k8s_label = ServiceLabel::new("main-cluster");
        supervisor.stop_with_dependents(&k8s_label, &graph);

        let prom = ServiceLabel::new("prom");
        assert_eq!(supervisor.stop_reason(&prom), Some(StopReason::Cascade));

        mock.send(
            "prom",
            DriverCallback::Subprocess {
                status: "exited-gracefully".to_string(),
                error: None,
                listening_port: None,
                pid: None,
            },
        );
        assert!(!supervisor.is_active(&prom));

        mock.fail_next("prom");
        assert!(supervisor.restart(&prom).await.is_err());

        // The dispatch failed before reaching Running, so the Cascade
        // marking that made this label selective-restart-eligible must
        // survive rather than being lost at dispatch time.
        assert_eq!(supervisor.stop_reason(&prom), Some(StopReason::Cascade));
    }

    #[tokio::test]
    async fn stop_with_dependents_on_a_leaf_behaves_like_stop() {
        let (supervisor, _store, mock) = harness();
        let configs = chain();
        let graph = DependencyGraph::build(&configs).unwrap();

        let driver = spawn_auto_driver(Arc::clone(&mock), 4);
        supervisor.start_all(configs).await.unwrap();
        driver.await.unwrap();

        let leaf = ServiceLabel::new("grafana");
        let results = supervisor.stop_with_dependents(&leaf, &graph);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, leaf);
        assert!(results[0].1.is_ok());
        assert_eq!(supervisor.stop_reason(&leaf), Some(StopReason::Manual));
    }

    #[tokio::test]
    async fn selective_restart_skips_manually_stopped_dependents() {
        let k8s = ServiceConfig::test_fixture(ServiceKind::KubernetesConnection, "main-cluster");
        let pf_manual = ServiceConfig::test_fixture(ServiceKind::PortForward, "mc-prom-manual")
            .depends_on(vec![NodeId::new(ServiceKind::KubernetesConnection, "main-cluster")]);
        let pf_cascade = ServiceConfig::test_fixture(ServiceKind::PortForward, "mc-prom-cascade")
            .depends_on(vec![NodeId::new(ServiceKind::KubernetesConnection, "main-cluster")]);
        let configs = vec![k8s.clone(), pf_manual.clone(), pf_cascade.clone()];
        let graph = DependencyGraph::build(&configs).unwrap();

        let (supervisor, _store, mock) = harness();
        let driver = spawn_auto_driver(Arc::clone(&mock), 3);
        supervisor.start_all(configs).await.unwrap();
        driver.await.unwrap();

        supervisor.stop(&pf_manual.label, StopReason::Manual).unwrap();
        supervisor.stop(&pf_cascade.label, StopReason::Cascade).unwrap();

        let k8s_node = NodeId::new(ServiceKind::KubernetesConnection, "main-cluster");
        let driver = spawn_auto_driver(Arc::clone(&mock), 4);
        let results = supervisor.start_dependents_of(&k8s_node, &graph).await;
        driver.await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, pf_cascade.label);
        assert!(results[0].1.is_ok());
        assert!(!supervisor.is_active(&pf_manual.label));
        assert!(supervisor.is_active(&pf_cascade.label));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_rejects_a_second_close() {
        let (supervisor, _store, mock) = harness();
        let config = ServiceConfig::test_fixture(ServiceKind::PortForward, "mc-prom");
        let driver = spawn_auto_driver(Arc::clone(&mock), 1);
        supervisor.start_all(vec![config.clone()]).await.unwrap();
        driver.await.unwrap();

        supervisor.stop(&config.label, StopReason::Manual).unwrap();
        let second = supervisor.stop(&config.label, StopReason::Manual);
        assert!(matches!(second, Err(SupervisorError::AlreadyClosed(_))));
    }

    #[tokio::test]
    async fn restart_of_never_started_service_starts_it_from_registered_config() {
        let (supervisor, store, mock) = harness();
        let config = ServiceConfig::test_fixture(ServiceKind::SubprocessServer, "prom");
        supervisor.register_config(config.clone());
        assert!(!supervisor.is_active(&config.label));

        let driver = spawn_auto_driver(Arc::clone(&mock), 1);
        supervisor.restart(&config.label).await.unwrap();
        driver.await.unwrap();

        assert!(supervisor.is_active(&config.label));
        assert_eq!(store.read_snapshot(&config.label).unwrap().state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn repeated_identical_driver_callback_is_debounced() {
        let (supervisor, store, mock) = harness();
        let config = ServiceConfig::test_fixture(ServiceKind::PortForward, "mc-prom");
        let driver = spawn_auto_driver(Arc::clone(&mock), 1);
        supervisor.start_all(vec![config.clone()]).await.unwrap();
        driver.await.unwrap();

        let before = store.get_state_transitions(Some(&config.label)).len();
        for _ in 0..5 {
            mock.send(
                config.label.as_str(),
                DriverCallback::PortForward { status: PortForwardStatus::ForwardingActive, operationally_ready: true, error: None },
            );
        }
        let after = store.get_state_transitions(Some(&config.label)).len();
        assert_eq!(before, after, "identical repeated callbacks must not record new transitions");
    }
}
