//! Creative experimentation engine
//!
//! Five components share one [`Context`]:
//! performance analysis, fatigue detection, rotation optimization,
//! A/B experiments and winner selection. The store is the only durable state;
//! everything else is recomputed per call.

pub mod clock;
pub mod error;
pub mod events;
pub mod experiment;
pub mod fatigue;
pub mod performance;
pub mod rotation;
pub mod selection;
pub mod statistics;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::EngineError;

use crate::config::Thresholds;
use crate::model::intent::{IntentAction, PlatformIntent};
use crate::server::SharedMetrics;
use crate::store::MetricsStore;
use clock::Clock;
use events::{EventSink, EventType, Severity};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Collaborators shared by every component
pub struct Context {
    pub store: Arc<dyn MetricsStore>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub thresholds: Thresholds,
    /// Optional engine metrics for Prometheus
    /// When Some, records operation counts and durations
    pub metrics: Option<SharedMetrics>,
}

impl Context {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        thresholds: Thresholds,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        Context {
            store,
            events,
            clock,
            thresholds,
            metrics,
        }
    }

    /// Emit a notification; delivery failures are logged, never returned
    pub async fn notify(
        &self,
        event_type: EventType,
        severity: Severity,
        subject: &str,
        record: &impl Serialize,
    ) {
        events::publish(
            self.events.as_ref(),
            self.clock.as_ref(),
            event_type,
            severity,
            subject,
            record,
        )
        .await;
    }

    /// Append an ad-platform intent for the external executor
    pub async fn record_intent(
        &self,
        origin: &str,
        action: IntentAction,
    ) -> Result<PlatformIntent, EngineError> {
        let intent = PlatformIntent {
            id: ulid::Ulid::new().to_string(),
            recorded_at: self.clock.now(),
            origin: origin.to_string(),
            action,
        };
        self.store.append_intent(&intent).await?;
        info!(
            intent = %intent.id,
            kind = intent.action.kind(),
            origin = %origin,
            "Platform intent recorded"
        );
        Ok(intent)
    }

    /// Record outcome and duration of one engine operation
    pub fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T, EngineError>) {
        if let Some(ref metrics) = self.metrics {
            let outcome = match result {
                Ok(_) => "success",
                Err(e) => e.class(),
            };
            metrics.record_operation(operation, outcome, started.elapsed().as_secs_f64());
        }
    }
}

/// All components wired to one context
#[derive(Clone)]
pub struct Engine {
    pub performance: performance::PerformanceAnalyzer,
    pub fatigue: fatigue::FatigueDetector,
    pub rotation: rotation::RotationOptimizer,
    pub experiments: experiment::ExperimentFramework,
    pub selection: selection::WinnerSelector,
}

impl Engine {
    /// Wire components with the standard detector and analyzer registries
    pub fn new(ctx: Arc<Context>) -> Self {
        let performance = performance::PerformanceAnalyzer::new(ctx.clone());
        let fatigue =
            fatigue::FatigueDetector::new(ctx.clone(), fatigue::DetectorRegistry::standard());
        let rotation = rotation::RotationOptimizer::new(ctx.clone(), performance.clone());
        let experiments = experiment::ExperimentFramework::new(
            ctx.clone(),
            experiment::AnalyzerRegistry::standard(),
        );
        let selection = selection::WinnerSelector::new(ctx, experiments.clone());

        Engine {
            performance,
            fatigue,
            rotation,
            experiments,
            selection,
        }
    }
}
