// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Correlation ids and the process-global monotonic sequence counter.

use std::sync::atomic::{AtomicU64, Ordering};

crate::define_id! {
    /// Opaque tag that propagates to every event/transition derived from the
    /// same originating cause (a user command, a cascade, a reconciler tick).
    pub struct CorrelationId("corr");
}

/// Process-global, strictly monotonically increasing sequence number.
///
/// One counter for the whole process (not per-label) so that sequence
/// numbers observed on the bus form a single total order, satisfying the
/// "strictly monotonic" universal invariant regardless of which label or
/// component produced the transition.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Allocate the next sequence number. Never returns the same value twice.
pub fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}
