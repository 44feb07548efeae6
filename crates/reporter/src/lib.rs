// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! envctl-reporter: the reporter contract (spec §4.3) and its console
//! implementation — the adapter between driver/reconciler callbacks and
//! the state store + event bus.

pub mod console;
pub mod reporter;

pub use console::ConsoleReporter;
pub use reporter::{RawHealthUpdate, RawStatusUpdate, Reporter};
