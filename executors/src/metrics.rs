use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
};
use std::sync::Arc;
use txtrack_core::transaction::NetworkId;

use crate::eoa::events::TrackerStage;

/// Metrics for nonce allocation and pending transaction tracking
pub struct TrackerMetrics {
    pub nonce_allocation_duration: HistogramVec,
    pub tracker_events: IntCounterVec,
}

impl TrackerMetrics {
    /// Create new tracker metrics with the provided registry
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let nonce_allocation_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "txtrack_nonce_allocation_duration_seconds",
                "Time spent computing a nonce once the sender lock is held"
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["network_id"],
            registry
        )?;

        let tracker_events = register_int_counter_vec_with_registry!(
            Opts::new(
                "txtrack_pending_tracker_events_total",
                "Events emitted by the pending transaction tracker"
            ),
            &["stage"],
            registry
        )?;

        Ok(TrackerMetrics {
            nonce_allocation_duration,
            tracker_events,
        })
    }
}

lazy_static! {
    /// Default metrics registry (fallback if no external registry provided)
    static ref DEFAULT_TRACKER_METRICS_REGISTRY: Registry = Registry::new();

    static ref DEFAULT_TRACKER_METRICS: Option<Arc<TrackerMetrics>> =
        TrackerMetrics::new(&DEFAULT_TRACKER_METRICS_REGISTRY)
            .inspect_err(|e| tracing::error!(error = %e, "Failed to register default tracker metrics"))
            .ok()
            .map(Arc::new);

    /// Global metrics instance - can be set by the embedding application or uses default
    static ref TRACKER_METRICS_INSTANCE: std::sync::RwLock<Option<Arc<TrackerMetrics>>> =
        std::sync::RwLock::new(None);
}

/// Initialize tracker metrics with a custom registry.
/// Call once at startup, before any tracker is built.
pub fn initialize_metrics(metrics: TrackerMetrics) {
    let mut instance = TRACKER_METRICS_INSTANCE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *instance = Some(Arc::new(metrics));
}

fn get_metrics() -> Option<Arc<TrackerMetrics>> {
    let instance = TRACKER_METRICS_INSTANCE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match instance.as_ref() {
        Some(metrics) => Some(metrics.clone()),
        None => DEFAULT_TRACKER_METRICS.clone(),
    }
}

/// Export metrics in Prometheus format from the default registry.
/// Custom registries are exported by whoever owns them.
pub fn export_default_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = DEFAULT_TRACKER_METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_nonce_allocation_time(network_id: &NetworkId, duration_seconds: f64) {
    if let Some(metrics) = get_metrics() {
        metrics
            .nonce_allocation_duration
            .with_label_values(&[network_id.0.as_str()])
            .observe(duration_seconds);
    }
}

pub fn record_tracker_event(stage: TrackerStage) {
    if let Some(metrics) = get_metrics() {
        metrics
            .tracker_events
            .with_label_values(&[stage.to_string().as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_registry_metrics() {
        let registry = Registry::new();
        let metrics = TrackerMetrics::new(&registry).unwrap();

        metrics
            .tracker_events
            .with_label_values(&[TrackerStage::Retry.to_string().as_str()])
            .inc();
        metrics
            .nonce_allocation_duration
            .with_label_values(&["1"])
            .observe(0.2);

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|family| family.get_name()).collect();
        assert!(names.contains(&"txtrack_pending_tracker_events_total"));
        assert!(names.contains(&"txtrack_nonce_allocation_duration_seconds"));
    }

    #[test]
    fn test_default_export_contains_recorded_events() {
        record_tracker_event(TrackerStage::Confirmed);
        let exported = export_default_metrics().unwrap();
        assert!(exported.contains("txtrack_pending_tracker_events_total"));
    }
}
