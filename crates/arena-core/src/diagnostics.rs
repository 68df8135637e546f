//! Check reporting.
//!
//! Components that verify engine behaviour (the pool's startup check, for
//! one) report outcomes through a [`DiagnosticSink`]. [`CheckRecorder`] is
//! the in-memory sink.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};

use crate::lock;

/// Receives the outcome of named checks.
pub trait DiagnosticSink: Send + Sync + fmt::Debug {
    fn record(&self, check: &str, passed: bool, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRecord {
    pub check: String,
    pub passed: bool,
    pub message: String,
}

/// Collects check records in arrival order.
#[derive(Debug, Default)]
pub struct CheckRecorder {
    records: Mutex<Vec<CheckRecord>>,
}

impl CheckRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CheckRecord> {
        lock(&self.records).clone()
    }

    pub fn failures(&self) -> Vec<CheckRecord> {
        lock(&self.records)
            .iter()
            .filter(|r| !r.passed)
            .cloned()
            .collect()
    }
}

impl DiagnosticSink for CheckRecorder {
    fn record(&self, check: &str, passed: bool, message: &str) {
        if passed {
            debug!(check, message, "check passed");
        } else {
            warn!(check, message, "check failed");
        }
        lock(&self.records).push(CheckRecord {
            check: check.to_owned(),
            passed,
            message: message.to_owned(),
        });
    }
}
