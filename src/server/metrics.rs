//! Prometheus metrics for engine operations

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Engine metrics registered in a private registry
pub struct EngineMetrics {
    registry: Registry,
    operations_total: IntCounterVec,
    operation_duration_seconds: HistogramVec,
    fatigue_verdicts_total: IntCounterVec,
    experiment_transitions_total: IntCounterVec,
    selection_decisions_total: IntCounterVec,
}

/// Shared handle passed to the engine and the HTTP server
pub type SharedMetrics = Arc<EngineMetrics>;

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("luova".to_string()), None)?;

        let operations_total = IntCounterVec::new(
            Opts::new("operations_total", "Engine operations by outcome"),
            &["operation", "outcome"],
        )?;
        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_duration_seconds",
                "Engine operation duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        let fatigue_verdicts_total = IntCounterVec::new(
            Opts::new("fatigue_verdicts_total", "Fatigue verdicts by severity"),
            &["severity"],
        )?;
        let experiment_transitions_total = IntCounterVec::new(
            Opts::new(
                "experiment_transitions_total",
                "Experiment status transitions by target status",
            ),
            &["status"],
        )?;
        let selection_decisions_total = IntCounterVec::new(
            Opts::new("selection_decisions_total", "Winner selection decisions"),
            &["decision"],
        )?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;
        registry.register(Box::new(fatigue_verdicts_total.clone()))?;
        registry.register(Box::new(experiment_transitions_total.clone()))?;
        registry.register(Box::new(selection_decisions_total.clone()))?;

        Ok(EngineMetrics {
            registry,
            operations_total,
            operation_duration_seconds,
            fatigue_verdicts_total,
            experiment_transitions_total,
            selection_decisions_total,
        })
    }

    pub fn record_operation(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn record_fatigue_verdict(&self, severity: &str) {
        self.fatigue_verdicts_total
            .with_label_values(&[severity])
            .inc();
    }

    pub fn record_experiment_transition(&self, status: &str) {
        self.experiment_transitions_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn record_selection_decision(&self, decision: &str) {
        self.selection_decisions_total
            .with_label_values(&[decision])
            .inc();
    }

    /// Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the shared metrics handle
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(EngineMetrics::new()?))
}
