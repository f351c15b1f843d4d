use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::QueryError;

// ============================================================================
// Query Job Models
// ============================================================================

/// A resolved, validated query job: one SQL statement polled on a fixed interval
/// and republished as one gauge.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryJob {
    /// Metric name, unique across the process
    pub name: String,
    pub help: String,
    /// Name of the database this statement runs against
    pub database: String,
    pub statement: String,
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub labels: BTreeMap<String, String>,
}

impl QueryJob {
    pub fn new(
        name: impl Into<String>,
        database: impl Into<String>,
        statement: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            database: database.into(),
            statement: statement.into(),
            interval,
            timeout: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The identity registered with the value sink before the job starts
    pub fn descriptor(&self) -> MetricDescriptor {
        MetricDescriptor {
            name: self.name.clone(),
            help: if self.help.is_empty() {
                self.name.clone()
            } else {
                self.help.clone()
            },
            labels: self.labels.clone(),
        }
    }
}

/// Metric identity: name, help text and constant labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub labels: BTreeMap<String, String>,
}

/// Result of one tick, produced and consumed immediately
#[derive(Debug)]
pub struct MetricValue {
    pub job: String,
    pub observed_at: DateTime<Utc>,
    pub result: Result<f64, QueryError>,
}

impl MetricValue {
    pub fn now(job: impl Into<String>, result: Result<f64, QueryError>) -> Self {
        Self {
            job: job.into(),
            observed_at: Utc::now(),
            result,
        }
    }
}

/// What happens to a query that is still executing when shutdown is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightPolicy {
    /// Let the query complete and emit its value
    #[default]
    Finish,
    /// Drop the query future as soon as cancellation is observed
    Abort,
}

/// Why a job runner left its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cancellation observed at the wait point
    Cancelled,
    /// An in-flight query was dropped on cancellation
    Aborted,
    /// A tick failed; the error was logged by the runner
    Failed,
}
