// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composable event filters (spec §4.2).

use crate::event::{Event, Severity};
use envctl_core::CorrelationId;
use std::sync::Arc;

/// A predicate over events, composable via [`Filter::and`]/[`Filter::or`].
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(&Event) -> bool + Send + Sync>);

impl Filter {
    pub fn new(f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Matches every event.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn by_kind_names(names: Vec<&'static str>) -> Self {
        Self::new(move |e| names.contains(&e.kind.name()))
    }

    pub fn by_source(label: impl Into<String>) -> Self {
        let label = label.into();
        Self::new(move |e| e.source.as_str() == label)
    }

    pub fn min_severity(min: Severity) -> Self {
        Self::new(move |e| e.severity >= min)
    }

    pub fn by_correlation(id: CorrelationId) -> Self {
        Self::new(move |e| e.correlation_id == id)
    }

    pub fn matches(&self, event: &Event) -> bool {
        (self.0)(event)
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::new(move |e| self.matches(e) && other.matches(e))
    }

    pub fn or(self, other: Filter) -> Filter {
        Filter::new(move |e| self.matches(e) || other.matches(e))
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CascadeKind, EventKind};
    use envctl_core::ServiceLabel;

    fn sample(severity: Severity, source: &str) -> Event {
        Event {
            kind: EventKind::CascadeStart { cascade_kind: CascadeKind::Stop, affected: vec![] },
            source: ServiceLabel::new(source),
            severity,
            timestamp_epoch_ms: 0,
            correlation_id: CorrelationId::new(),
            cause: "test".to_string(),
            parent_id: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn min_severity_filters_below_threshold() {
        let filter = Filter::min_severity(Severity::Warn);
        assert!(!filter.matches(&sample(Severity::Info, "a")));
        assert!(filter.matches(&sample(Severity::Error, "a")));
    }

    #[test]
    fn and_requires_both_predicates() {
        let filter = Filter::min_severity(Severity::Warn).and(Filter::by_source("a"));
        assert!(filter.matches(&sample(Severity::Error, "a")));
        assert!(!filter.matches(&sample(Severity::Error, "b")));
    }

    #[test]
    fn or_requires_either_predicate() {
        let filter = Filter::by_source("a").or(Filter::by_source("b"));
        assert!(filter.matches(&sample(Severity::Info, "a")));
        assert!(filter.matches(&sample(Severity::Info, "b")));
        assert!(!filter.matches(&sample(Severity::Info, "c")));
    }
}
