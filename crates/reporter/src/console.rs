// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The console reporter: writes to the store, publishes to the bus, and
//! logs every lifecycle/health change via `tracing` at the severity spec
//! §7 prescribes (`Failed`→error, `Unknown`→warn, starting/stopping/
//! retrying→debug, running/stopped→info).

use crate::reporter::{RawHealthUpdate, RawStatusUpdate, Reporter};
use envctl_bus::{CascadeKind, Event, EventBus, EventKind, Severity};
use envctl_core::{Clock, CorrelationId, LifecycleState, SnapshotUpdate, SystemClock};
use envctl_store::StateStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ConsoleReporter<C: Clock = SystemClock> {
    clock: C,
    store: Arc<StateStore<C>>,
    bus: Arc<EventBus>,
}

impl<C: Clock> ConsoleReporter<C> {
    pub fn new(clock: C, store: Arc<StateStore<C>>, bus: Arc<EventBus>) -> Self {
        Self { clock, store, bus }
    }

    fn log_lifecycle(&self, label: &str, old_state: LifecycleState, new_state: LifecycleState, error: &Option<String>) {
        match Event::severity_for_state(new_state) {
            Severity::Error => error!(service = label, %old_state, %new_state, error = error.as_deref(), "service failed"),
            Severity::Warn => warn!(service = label, %old_state, %new_state, "service entered unknown state"),
            Severity::Debug => debug!(service = label, %old_state, %new_state, "service transitioning"),
            _ => info!(service = label, %old_state, %new_state, "service transitioned"),
        }
    }

    /// Publish a cascade-start/stop event (used by the supervisor around
    /// cascade operations rather than per-label status updates).
    pub fn report_cascade(&self, kind: CascadeKind, affected: Vec<envctl_core::ServiceLabel>, correlation_id: CorrelationId, starting: bool) {
        let event = Event {
            kind: if starting {
                EventKind::CascadeStart { cascade_kind: kind, affected: affected.clone() }
            } else {
                EventKind::CascadeStop { cascade_kind: kind, affected: affected.clone() }
            },
            source: affected.first().cloned().unwrap_or_else(|| envctl_core::ServiceLabel::new("cascade")),
            severity: Severity::Info,
            timestamp_epoch_ms: self.clock.epoch_ms(),
            correlation_id,
            cause: "cascade".to_string(),
            parent_id: None,
            metadata: Default::default(),
        };
        info!(?kind, count = affected.len(), "cascade operation");
        self.bus.publish(event);
    }
}

impl<C: Clock> Reporter for ConsoleReporter<C> {
    fn report_status(&self, update: RawStatusUpdate) -> bool {
        let correlation_id = update.correlation_id.unwrap_or_else(CorrelationId::new);
        let old_state =
            self.store.read_snapshot(&update.label).map(|s| s.state).unwrap_or(LifecycleState::Unknown);

        let snapshot_update = SnapshotUpdate {
            label: update.label.clone(),
            kind: update.kind,
            state: update.state,
            ready: update.ready,
            error: update.error.clone(),
            data: update.data.clone(),
            correlation_id,
            cause: update.cause.clone(),
            parent_correlation_id: update.parent_correlation_id,
        };
        let changed = self.store.write_snapshot(snapshot_update);

        if changed {
            self.log_lifecycle(update.label.as_str(), old_state, update.state, &update.error);
            let event = Event {
                kind: EventKind::Lifecycle {
                    old_state,
                    new_state: update.state,
                    ready: update.ready,
                    error: update.error,
                    data: update.data,
                },
                source: update.label,
                severity: Event::severity_for_state(update.state),
                timestamp_epoch_ms: self.clock.epoch_ms(),
                correlation_id,
                cause: update.cause,
                parent_id: update.parent_correlation_id,
                metadata: Default::default(),
            };
            self.bus.publish(event);
        }

        changed
    }

    fn report_health(&self, update: RawHealthUpdate) {
        let correlation_id = update.correlation_id.unwrap_or_else(CorrelationId::new);

        let Some(existing) = self.store.read_snapshot(&update.label) else {
            warn!(service = %update.label, "health update for a label with no snapshot, ignoring");
            return;
        };

        if update.failed {
            self.report_status(RawStatusUpdate {
                label: update.label,
                kind: update.kind,
                state: LifecycleState::Failed,
                ready: false,
                error: update.error,
                data: existing.data,
                correlation_id: Some(correlation_id),
                cause: update.cause,
                parent_correlation_id: None,
            });
            return;
        }

        let snapshot_update = SnapshotUpdate {
            label: update.label.clone(),
            kind: update.kind,
            state: existing.state,
            ready: update.ready,
            error: update.error.clone(),
            data: existing.data,
            correlation_id,
            cause: update.cause,
            parent_correlation_id: None,
        };
        self.store.write_snapshot(snapshot_update);

        let severity = if update.ready { Severity::Info } else { Severity::Warn };
        match severity {
            Severity::Warn => warn!(service = %update.label, error = update.error.as_deref(), "health probe unhealthy"),
            _ => debug!(service = %update.label, "health probe ok"),
        }

        let event = Event {
            kind: EventKind::Health { ready: update.ready, error: update.error },
            source: update.label,
            severity,
            timestamp_epoch_ms: self.clock.epoch_ms(),
            correlation_id,
            cause: "health probe".to_string(),
            parent_id: None,
            metadata: Default::default(),
        };
        self.bus.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envctl_bus::Filter;
    use envctl_core::{FakeClock, ServiceData, ServiceKind, ServiceLabel};

    fn harness() -> (ConsoleReporter<FakeClock>, Arc<StateStore<FakeClock>>, Arc<EventBus>) {
        let clock = FakeClock::new();
        let store = Arc::new(StateStore::new(clock.clone()));
        let bus = Arc::new(EventBus::new());
        (ConsoleReporter::new(clock, store.clone(), bus.clone()), store, bus)
    }

    fn status(label: &str, state: LifecycleState, ready: bool) -> RawStatusUpdate {
        RawStatusUpdate {
            label: ServiceLabel::new(label),
            kind: ServiceKind::PortForward,
            state,
            ready,
            error: None,
            data: ServiceData::None,
            correlation_id: None,
            cause: "driver callback".to_string(),
            parent_correlation_id: None,
        }
    }

    #[tokio::test]
    async fn status_change_publishes_a_lifecycle_event() {
        let (reporter, store, bus) = harness();
        let (_id, channel) = bus.subscribe_channel(Filter::all(), 8, envctl_bus::OverflowStrategy::Drop);
        assert!(reporter.report_status(status("pf-a", LifecycleState::Starting, false)));
        let event = channel.recv().await.unwrap();
        assert_eq!(event.kind.name(), "lifecycle");
        assert!(store.read_snapshot(&ServiceLabel::new("pf-a")).is_some());
    }

    #[tokio::test]
    async fn repeated_identical_status_is_not_debounced_by_the_reporter_itself() {
        // The reporter trusts its caller to debounce; a second identical
        // status with the same state still returns false (no transition)
        // but is not rejected outright.
        let (reporter, _store, _bus) = harness();
        assert!(reporter.report_status(status("pf-a", LifecycleState::Starting, false)));
        assert!(!reporter.report_status(status("pf-a", LifecycleState::Starting, true)));
    }

    #[tokio::test]
    async fn health_update_does_not_flip_lifecycle_state() {
        let (reporter, store, bus) = harness();
        reporter.report_status(status("pf-a", LifecycleState::Running, false));
        let (_id, channel) = bus.subscribe_channel(Filter::all(), 8, envctl_bus::OverflowStrategy::Drop);
        reporter.report_health(RawHealthUpdate {
            label: ServiceLabel::new("pf-a"),
            kind: ServiceKind::PortForward,
            ready: true,
            error: None,
            failed: false,
            correlation_id: None,
            cause: "probe".to_string(),
        });
        let event = channel.recv().await.unwrap();
        assert_eq!(event.kind.name(), "health");
        let snapshot = store.read_snapshot(&ServiceLabel::new("pf-a")).unwrap();
        assert_eq!(snapshot.state, LifecycleState::Running);
        assert!(snapshot.ready);
    }

    #[tokio::test]
    async fn failed_health_update_produces_a_lifecycle_transition() {
        let (reporter, store, _bus) = harness();
        reporter.report_status(status("pf-a", LifecycleState::Running, true));
        reporter.report_health(RawHealthUpdate {
            label: ServiceLabel::new("pf-a"),
            kind: ServiceKind::PortForward,
            ready: false,
            error: Some("connection refused".to_string()),
            failed: true,
            correlation_id: None,
            cause: "probe".to_string(),
        });
        let snapshot = store.read_snapshot(&ServiceLabel::new("pf-a")).unwrap();
        assert_eq!(snapshot.state, LifecycleState::Failed);
    }
}
