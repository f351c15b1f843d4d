// Value sink: the boundary job runners publish their results to

pub mod prometheus;

pub use prometheus::PrometheusSink;

use crate::errors::SinkError;
use crate::models::MetricDescriptor;

/// Accepts metric registrations and observations from many job runners at once
pub trait ValueSink: Send + Sync {
    /// Register a metric identity.
    ///
    /// Fails with `SinkError::AlreadyRegistered` if the name is already known;
    /// the existing registration is left untouched.
    fn register(&self, descriptor: &MetricDescriptor) -> Result<(), SinkError>;

    /// Publish the latest value for a registered metric
    fn observe(&self, name: &str, value: f64);
}
