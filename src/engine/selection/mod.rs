//! Winner Selection
//!
//! Turns an experiment analysis into an implementation decision, then
//! follows the rollout by comparing live metrics to the projection.
//! Selection results are insert-only; only `implementation_status` moves.

pub mod policy;

pub use policy::QualityGate;

use crate::engine::events::{EventType, Severity};
use crate::engine::experiment::analyzers::{metric_value, sample_size};
use crate::engine::experiment::ExperimentFramework;
use crate::engine::{Context, EngineError};
use crate::model::creative::MetricTotals;
use crate::model::experiment::{ArmSummary, ExperimentMetric, MetricDirection, VariantRole};
use crate::model::fatigue::BatchFailure;
use crate::model::intent::IntentAction;
use crate::model::selection::{
    AlertLevel, BatchSelectionReport, ImplementationStatus, MarketContext, MonitoringAlert,
    MonitoringRecommendation, MonitoringReport, SelectionCriteria, SelectionDecision,
    SelectionResult, Winner,
};
use chrono::Duration;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Experiments evaluated concurrently in batch mode
const BATCH_CONCURRENCY: usize = 4;

/// Days of snapshots searched for the latest quality score
const QUALITY_LOOKBACK_DAYS: i64 = 7;

#[derive(Clone)]
pub struct WinnerSelector {
    ctx: Arc<Context>,
    experiments: ExperimentFramework,
}

impl WinnerSelector {
    pub fn new(ctx: Arc<Context>, experiments: ExperimentFramework) -> Self {
        WinnerSelector { ctx, experiments }
    }

    /// Re-analyze an experiment and persist one selection decision
    pub async fn evaluate(
        &self,
        experiment_id: Uuid,
        criteria: &SelectionCriteria,
        market: &MarketContext,
    ) -> Result<SelectionResult, EngineError> {
        let started = Instant::now();
        let result = self.evaluate_inner(experiment_id, criteria, market).await;
        self.ctx.observe("evaluate_winner", started, &result);
        result
    }

    async fn evaluate_inner(
        &self,
        experiment_id: Uuid,
        criteria: &SelectionCriteria,
        market: &MarketContext,
    ) -> Result<SelectionResult, EngineError> {
        validate_criteria(criteria)?;
        let experiment = self.experiments.get(experiment_id).await?;
        if !experiment.status.has_started() {
            return Err(EngineError::InvalidTransition {
                id: experiment.id.to_string(),
                from: experiment.status.as_str(),
                to: "SELECTION",
            });
        }

        let analysis = self.experiments.analyze(experiment_id).await?;
        let leader = policy::leading_arm(&analysis);
        let gate = self
            .quality_gate(&experiment.variant(leader).creative_id)
            .await?;

        let t = &self.ctx.thresholds.selection;
        let config = &experiment.config;
        let statistical = policy::statistical_validation(
            &analysis,
            criteria,
            self.ctx.thresholds.experiment.min_arm_sample,
        );
        let business = policy::business_validation(&analysis, criteria, &gate);
        let risk = policy::assess_risk(&analysis, config, criteria, market, t);
        let projection = policy::project(&analysis);
        let (decision, winner) =
            policy::decide(&analysis, config, criteria, &statistical, &business, &risk);
        let confidence = policy::confidence(&analysis, config, &statistical, &business, &risk);
        let implementation =
            policy::implementation_plan(decision, confidence, risk.level, config, criteria, t);

        let implementation_status = if decision == SelectionDecision::SelectWinner {
            ImplementationStatus::Pending
        } else {
            ImplementationStatus::NotApplicable
        };

        let result = SelectionResult {
            id: Uuid::new_v4(),
            experiment_id,
            created_at: self.ctx.clock.now(),
            analysis,
            criteria: criteria.clone(),
            decision,
            winner,
            confidence,
            statistical,
            business,
            risk,
            projection,
            implementation,
            implementation_status,
        };
        self.ctx.store.insert_selection(&result).await?;

        if let Some(ref metrics) = self.ctx.metrics {
            metrics.record_selection_decision(decision.as_str());
        }
        info!(
            selection = %result.id,
            experiment = %experiment_id,
            decision = decision.as_str(),
            winner = ?winner,
            confidence = confidence,
            risk = ?result.risk.level,
            "Winner selection recorded"
        );

        if decision == SelectionDecision::SelectWinner {
            self.ctx
                .notify(
                    EventType::WinnerSelected,
                    Severity::Info,
                    &result.id.to_string(),
                    &result,
                )
                .await;
        }
        Ok(result)
    }

    async fn quality_gate(&self, creative_id: &str) -> Result<QualityGate, EngineError> {
        let today = self.ctx.clock.today();
        let since = today - Duration::days(i64::from(self.ctx.thresholds.fatigue.history_days));
        let fatigue = self
            .ctx
            .store
            .fatigue_verdicts(creative_id, since)
            .await?
            .into_iter()
            .max_by_key(|v| v.analysis_date)
            .map(|v| v.severity);

        let quality_score = self
            .ctx
            .store
            .snapshots(creative_id, today - Duration::days(QUALITY_LOOKBACK_DAYS), today)
            .await?
            .into_iter()
            .rev()
            .find_map(|s| s.quality_score);

        Ok(QualityGate {
            fatigue,
            quality_score,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<SelectionResult, EngineError> {
        self.ctx
            .store
            .get_selection(id)
            .await?
            .ok_or_else(|| EngineError::not_found("selection", id))
    }

    pub async fn list_for_experiment(
        &self,
        experiment_id: Uuid,
    ) -> Result<Vec<SelectionResult>, EngineError> {
        Ok(self.ctx.store.selections_for_experiment(experiment_id).await?)
    }

    /// PENDING -> IN_PROGRESS; records the first rollout phase as a traffic shift
    pub async fn begin_implementation(&self, id: Uuid) -> Result<SelectionResult, EngineError> {
        let started = Instant::now();
        let result = self.begin_implementation_inner(id).await;
        self.ctx.observe("begin_implementation", started, &result);
        result
    }

    async fn begin_implementation_inner(&self, id: Uuid) -> Result<SelectionResult, EngineError> {
        let mut selection = self.get(id).await?;
        if selection.implementation_status != ImplementationStatus::Pending {
            return Err(EngineError::InvalidTransition {
                id: selection.id.to_string(),
                from: selection.implementation_status.as_str(),
                to: ImplementationStatus::InProgress.as_str(),
            });
        }
        let (winner_id, other_id) = arm_creatives(&selection).ok_or_else(|| {
            EngineError::InvalidConfiguration(format!("selection {} has no winner", selection.id))
        })?;

        let first_phase = selection
            .implementation
            .phases
            .first()
            .map(|p| p.traffic_percent)
            .unwrap_or(100);
        let share = f64::from(first_phase) / 100.0;
        let weights: BTreeMap<String, f64> = [(winner_id, share), (other_id, 1.0 - share)]
            .into_iter()
            .collect();

        self.ctx
            .store
            .set_implementation_status(selection.id, ImplementationStatus::InProgress)
            .await?;
        selection.implementation_status = ImplementationStatus::InProgress;

        let experiment = self.experiments.get(selection.experiment_id).await?;
        self.ctx
            .record_intent(
                "selection",
                IntentAction::ShiftTraffic {
                    ad_group_id: experiment.ad_group_id,
                    weights,
                },
            )
            .await?;

        info!(
            selection = %selection.id,
            traffic_percent = first_phase,
            "Winner rollout started"
        );
        Ok(selection)
    }

    /// Compare the winner's live metrics with the projection
    pub async fn monitor(&self, id: Uuid) -> Result<MonitoringReport, EngineError> {
        let started = Instant::now();
        let result = self.monitor_inner(id).await;
        self.ctx.observe("monitor_implementation", started, &result);
        result
    }

    async fn monitor_inner(&self, id: Uuid) -> Result<MonitoringReport, EngineError> {
        let selection = self.get(id).await?;
        if !matches!(
            selection.implementation_status,
            ImplementationStatus::InProgress | ImplementationStatus::Adjusting
        ) {
            return Err(EngineError::InvalidTransition {
                id: selection.id.to_string(),
                from: selection.implementation_status.as_str(),
                to: "MONITORING",
            });
        }
        let (winner_id, other_id) = arm_creatives(&selection).ok_or_else(|| {
            EngineError::InvalidConfiguration(format!("selection {} has no winner", selection.id))
        })?;

        let t = &self.ctx.thresholds.selection;
        let now = self.ctx.clock.now();
        let days_since_implementation = now
            .signed_duration_since(selection.created_at)
            .num_days()
            .max(0) as u32;

        let snapshots = self
            .ctx
            .store
            .snapshots(&winner_id, selection.created_at.date_naive(), now.date_naive())
            .await?;
        let totals = MetricTotals::from_snapshots(&snapshots);
        let live = ArmSummary {
            creative_id: winner_id.clone(),
            impressions: totals.impressions,
            clicks: totals.clicks,
            conversions: totals.conversions,
            revenue: totals.revenue,
            spend: totals.cost,
        };
        let projected_arm = match selection.winner {
            Some(Winner::Control) => &selection.analysis.control,
            _ => &selection.analysis.test,
        };
        let metrics = selection
            .implementation
            .monitoring
            .as_ref()
            .map(|m| m.metrics.clone())
            .unwrap_or_else(|| vec![selection.analysis.primary.metric]);

        let mut notes = Vec::new();
        let mut alerts = Vec::new();
        for metric in metrics {
            if sample_size(metric, &live) == 0 {
                notes.push(format!("no live {} data yet", metric.as_str()));
                continue;
            }
            let projected_value = metric_value(metric, projected_arm);
            let live_value = metric_value(metric, &live);
            if let Some(alert) = check_variance(metric, projected_value, live_value, t.variance_threshold) {
                alerts.push(alert);
            }
        }

        let warnings = alerts
            .iter()
            .filter(|a| a.level == AlertLevel::Warning)
            .count();
        let recommendation = if alerts.iter().any(|a| a.level == AlertLevel::Critical) {
            MonitoringRecommendation::Rollback
        } else if warnings > 1 {
            MonitoringRecommendation::Adjust
        } else {
            MonitoringRecommendation::Continue
        };

        let implementation_status = match recommendation {
            MonitoringRecommendation::Rollback => ImplementationStatus::RollbackRecommended,
            MonitoringRecommendation::Adjust => ImplementationStatus::Adjusting,
            MonitoringRecommendation::Continue if days_since_implementation >= t.monitoring_days => {
                ImplementationStatus::Completed
            }
            MonitoringRecommendation::Continue => ImplementationStatus::InProgress,
        };
        if implementation_status != selection.implementation_status {
            self.ctx
                .store
                .set_implementation_status(selection.id, implementation_status)
                .await?;
        }

        let report = MonitoringReport {
            selection_id: selection.id,
            checked_at: now,
            days_since_implementation,
            alerts,
            recommendation,
            implementation_status,
            notes,
        };

        if recommendation == MonitoringRecommendation::Rollback {
            self.ctx
                .record_intent(
                    "selection",
                    IntentAction::RollbackTraffic {
                        selection_id: selection.id,
                        restore_creative_id: other_id,
                    },
                )
                .await?;
            warn!(
                selection = %selection.id,
                alerts = report.alerts.len(),
                "Rollback recommended"
            );
            self.ctx
                .notify(
                    EventType::RollbackRequired,
                    Severity::Critical,
                    &selection.id.to_string(),
                    &report,
                )
                .await;
        } else {
            info!(
                selection = %selection.id,
                recommendation = ?recommendation,
                status = implementation_status.as_str(),
                "Implementation checked"
            );
        }
        Ok(report)
    }

    /// Evaluate many experiments; failures are recorded, not raised
    pub async fn batch_evaluate(
        &self,
        experiment_ids: &[Uuid],
        criteria: &SelectionCriteria,
        market: &MarketContext,
    ) -> BatchSelectionReport {
        let outcomes: Vec<(Uuid, Result<SelectionResult, EngineError>)> =
            stream::iter(experiment_ids.iter().copied())
                .map(|id| async move { (id, self.evaluate(id, criteria, market).await) })
                .buffered(BATCH_CONCURRENCY)
                .collect()
                .await;

        let mut report = BatchSelectionReport {
            requested: experiment_ids.len(),
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    *report
                        .decision_counts
                        .entry(result.decision.as_str().to_string())
                        .or_insert(0) += 1;
                    report.results.push(result);
                }
                Err(e) => {
                    warn!(experiment = %id, error = %e, "Winner evaluation failed for batch item");
                    report.failures.push(BatchFailure {
                        id: id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report.evaluated = report.results.len();

        info!(
            requested = report.requested,
            evaluated = report.evaluated,
            failures = report.failures.len(),
            "Winner batch complete"
        );
        report
    }
}

fn validate_criteria(criteria: &SelectionCriteria) -> Result<(), EngineError> {
    if !(criteria.min_confidence > 0.0 && criteria.min_confidence < 1.0) {
        return Err(EngineError::InvalidConfiguration(format!(
            "minConfidence must be in (0, 1), got {}",
            criteria.min_confidence
        )));
    }
    if criteria.min_practical_significance < 0.0
        || criteria.max_secondary_decline < 0.0
        || criteria.max_budget_increase < 0.0
        || criteria.min_roas < 0.0
    {
        return Err(EngineError::InvalidConfiguration(
            "selection thresholds must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Winning and losing creative ids, when a concrete arm won
fn arm_creatives(selection: &SelectionResult) -> Option<(String, String)> {
    let role = match selection.winner? {
        Winner::Control => VariantRole::Control,
        Winner::Test => VariantRole::Test,
        Winner::Neither => return None,
    };
    let (winner, other) = match role {
        VariantRole::Control => (&selection.analysis.control, &selection.analysis.test),
        VariantRole::Test => (&selection.analysis.test, &selection.analysis.control),
    };
    Some((winner.creative_id.clone(), other.creative_id.clone()))
}

/// Alert when the live value falls short of the projection
pub fn check_variance(
    metric: ExperimentMetric,
    projected: f64,
    live: f64,
    threshold: f64,
) -> Option<MonitoringAlert> {
    if projected <= 0.0 {
        return None;
    }
    let variance = match metric.direction() {
        MetricDirection::Higher => (projected - live) / projected,
        MetricDirection::Lower => (live - projected) / projected,
    };

    let level = if variance > 2.0 * threshold {
        AlertLevel::Critical
    } else if variance > threshold {
        AlertLevel::Warning
    } else {
        return None;
    };

    Some(MonitoringAlert {
        metric,
        level,
        projected_value: projected,
        live_value: live,
        variance,
        message: format!(
            "{} is {:.1}% worse than projected ({:.4} vs {:.4})",
            metric.as_str(),
            variance * 100.0,
            live,
            projected
        ),
    })
}

#[cfg(test)]
#[path = "selection_test.rs"]
mod tests;
