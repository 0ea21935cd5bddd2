//! Reporting for errors that are absorbed where they happen.
//!
//! Decode and delivery failures never change session state; they are handed to
//! an `ErrorReporter` and the component carries on.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// An error a component recovered from locally.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveredError {
    /// Inbound audio payload could not be decoded; the packet was dropped.
    Decode(String),
    /// A capture packet could not be sent; the frame was dropped.
    Delivery(String),
    /// An input read or device call failed transiently.
    Device(String),
}

impl fmt::Display for RecoveredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveredError::Decode(msg) => write!(f, "dropped undecodable packet: {}", msg),
            RecoveredError::Delivery(msg) => write!(f, "dropped capture frame: {}", msg),
            RecoveredError::Device(msg) => write!(f, "device error: {}", msg),
        }
    }
}

impl std::error::Error for RecoveredError {}

/// Trait for reporting recovered errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a component.
    fn report(&self, component: &str, error: &RecoveredError);
}

/// Reporter that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, component: &str, error: &RecoveredError) {
        tracing::warn!(component, "{}", error);
    }
}

/// Reporter that keeps every report, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<(String, RecoveredError)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, RecoveredError)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, component: &str, error: &RecoveredError) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((component.to_string(), error.clone()));
    }
}
