// Prometheus-backed value sink

use crate::errors::SinkError;
use crate::models::MetricDescriptor;
use crate::sink::ValueSink;
use metrics::{Gauge, Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Gauge registry backed by a dedicated Prometheus recorder.
///
/// The recorder is owned by the sink rather than installed as the global
/// `metrics` recorder, so every runner writes through an explicit instance.
pub struct PrometheusSink {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    gauges: RwLock<HashMap<String, Gauge>>,
}

impl PrometheusSink {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            recorder,
            handle,
            gauges: RwLock::new(HashMap::new()),
        }
    }

    /// Handle used by the exposition server to render the registry
    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Render every registered gauge in the Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueSink for PrometheusSink {
    fn register(&self, descriptor: &MetricDescriptor) -> Result<(), SinkError> {
        let mut gauges = self.gauges.write().unwrap_or_else(|e| e.into_inner());
        if gauges.contains_key(&descriptor.name) {
            return Err(SinkError::AlreadyRegistered(descriptor.name.clone()));
        }

        self.recorder.describe_gauge(
            KeyName::from(descriptor.name.clone()),
            None,
            SharedString::from(descriptor.help.clone()),
        );

        let labels: Vec<Label> = descriptor
            .labels
            .iter()
            .map(|(name, value)| Label::new(name.clone(), value.clone()))
            .collect();
        let key = Key::from_parts(descriptor.name.clone(), labels);
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        let gauge = self.recorder.register_gauge(&key, &metadata);

        gauges.insert(descriptor.name.clone(), gauge);
        debug!(metric = %descriptor.name, "Registered gauge");
        Ok(())
    }

    fn observe(&self, name: &str, value: f64) {
        let gauges = self.gauges.read().unwrap_or_else(|e| e.into_inner());
        match gauges.get(name) {
            Some(gauge) => gauge.set(value),
            None => warn!(metric = %name, "Observation for unregistered metric dropped"),
        }
    }
}
