// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! envctl-depgraph: the dependency engine (spec §4.5) — the DAG of service
//! dependencies and the traversal operations the supervisor needs for
//! ordered starts, cascading stops, and selective restarts.

pub mod graph;

pub use graph::{DependencyGraph, GraphError};
