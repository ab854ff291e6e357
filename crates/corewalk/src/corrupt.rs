//! Corrupt-data reporting.
//!
//! Traversals over a damaged target do not stop at the first bad read. Each
//! anomaly is handed to a [`CorruptDataReporter`] together with a severity the
//! reader decided on; the reader then skips the element (recoverable) or
//! abandons the current operation (fatal). The sink only observes.

use crate::error::WalkError;
use parking_lot::Mutex;
use tracing::{error, warn};

/// How the reader reacts after reporting an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The element is skipped and the traversal continues.
    Recoverable,
    /// The current find/search/iterate call is abandoned.
    Fatal,
}

impl Severity {
    pub fn is_fatal(self) -> bool {
        self == Severity::Fatal
    }
}

/// One anomaly discovered while reading the target.
#[derive(Debug)]
pub struct Anomaly {
    pub message: String,
    pub error: WalkError,
    pub severity: Severity,
}

/// Sink for anomalies found mid-traversal.
pub trait CorruptDataReporter: Send + Sync {
    fn report(&self, anomaly: Anomaly);
}

/// Logs every anomaly through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl CorruptDataReporter for TracingReporter {
    fn report(&self, anomaly: Anomaly) {
        match anomaly.severity {
            Severity::Recoverable => warn!("{}: {}", anomaly.message, anomaly.error),
            Severity::Fatal => error!("{}: {}", anomaly.message, anomaly.error),
        }
    }
}

/// Keeps every anomaly so an operator can see how much was skipped.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    anomalies: Mutex<Vec<Anomaly>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.anomalies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fatal_count(&self) -> usize {
        self.anomalies
            .lock()
            .iter()
            .filter(|a| a.severity.is_fatal())
            .count()
    }

    /// Take the collected anomalies, leaving the reporter empty.
    pub fn drain(&self) -> Vec<Anomaly> {
        std::mem::take(&mut *self.anomalies.lock())
    }
}

impl CorruptDataReporter for CollectingReporter {
    fn report(&self, anomaly: Anomaly) {
        warn!("{}: {}", anomaly.message, anomaly.error);
        self.anomalies.lock().push(anomaly);
    }
}

/// Report `error` and hand back the severity so callers can branch on it.
pub(crate) fn raise(
    reporter: &dyn CorruptDataReporter,
    message: impl Into<String>,
    error: WalkError,
    severity: Severity,
) -> Severity {
    reporter.report(Anomaly {
        message: message.into(),
        error,
        severity,
    });
    severity
}
