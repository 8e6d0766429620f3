//! A/B Testing Framework
//!
//! Owns the experiment lifecycle:
//! PLANNING -> READY -> RUNNING -> {PAUSED, COMPLETED, CANCELLED}.
//! Every transition is validated against the state machine, recorded in the
//! experiment's status history and persisted before anything is announced.
//! Traffic intents are appended before the status they lead to is saved.

pub mod analyzers;

pub use analyzers::{AnalyzerRegistry, Comparison, StatisticalAnalyzer};

use crate::config::ExperimentThresholds;
use crate::engine::events::{EventType, Severity};
use crate::engine::statistics::{achieved_power, jaccard, required_sample_size};
use crate::engine::{Context, EngineError};
use crate::model::creative::{CreativeStatus, MetricTotals};
use crate::model::experiment::{
    ArmSummary, CreateExperimentRequest, EarlyStopTrigger, EarlyStoppingDecision, Experiment,
    ExperimentAnalysis, ExperimentConfig, ExperimentStatus, MetricResult, PowerProjection,
    StatusChange, StopReason, TestDecision, TestRecommendation, Variant, VariantRole,
    VariantSpec,
};
use crate::model::intent::IntentAction;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ExperimentFramework {
    ctx: Arc<Context>,
    analyzers: Arc<AnalyzerRegistry>,
}

impl ExperimentFramework {
    pub fn new(ctx: Arc<Context>, analyzers: AnalyzerRegistry) -> Self {
        ExperimentFramework {
            ctx,
            analyzers: Arc::new(analyzers),
        }
    }

    /// Validate and persist a new experiment in READY
    pub async fn create(&self, request: CreateExperimentRequest) -> Result<Experiment, EngineError> {
        let started = Instant::now();
        let result = self.create_inner(request).await;
        self.ctx.observe("create_experiment", started, &result);
        result
    }

    async fn create_inner(&self, request: CreateExperimentRequest) -> Result<Experiment, EngineError> {
        validate_config(&request.config)?;
        if !self.analyzers.supports(request.config.method) {
            return Err(EngineError::InvalidConfiguration(format!(
                "statistical method {:?} is not available",
                request.config.method
            )));
        }
        if request.name.trim().is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "experiment name must not be empty".to_string(),
            ));
        }
        if request.control.creative_id == request.test.creative_id {
            return Err(EngineError::InvalidConfiguration(
                "control and test must be different creatives".to_string(),
            ));
        }

        let control = self
            .variant(&request.ad_group_id, VariantRole::Control, &request.control)
            .await?;
        let test = self
            .variant(&request.ad_group_id, VariantRole::Test, &request.test)
            .await?;

        let similarity = jaccard(&control.content.tokens(), &test.content.tokens());
        let max_similarity = self.ctx.thresholds.experiment.max_variant_similarity;
        if similarity >= max_similarity {
            return Err(EngineError::InvalidConfiguration(format!(
                "variants are near-duplicates (similarity {:.2} >= {:.2})",
                similarity, max_similarity
            )));
        }

        let config = request.config;
        let required_sample_size = required_sample_size(
            config.baseline_rate,
            config.min_detectable_effect,
            config.significance_level,
            config.target_power,
        )
        .max(config.min_sample_size);

        let now = self.ctx.clock.now();
        let mut experiment = Experiment {
            id: Uuid::new_v4(),
            name: request.name,
            ad_group_id: request.ad_group_id,
            config,
            control,
            test,
            status: ExperimentStatus::Planning,
            required_sample_size,
            created_at: now,
            started_at: None,
            completed_at: None,
            stop_reason: None,
            winner: None,
            status_history: Vec::new(),
            latest_analysis: None,
        };
        self.transition(
            &mut experiment,
            ExperimentStatus::Ready,
            Some("configuration validated".to_string()),
        )?;

        self.ctx.store.insert_experiment(&experiment).await?;
        self.record_transition(&experiment);
        info!(
            experiment = %experiment.id,
            ad_group = %experiment.ad_group_id,
            required_sample_size = experiment.required_sample_size,
            similarity = similarity,
            "Experiment created"
        );
        Ok(experiment)
    }

    async fn variant(
        &self,
        ad_group_id: &str,
        role: VariantRole,
        spec: &VariantSpec,
    ) -> Result<Variant, EngineError> {
        let creative = self
            .ctx
            .store
            .get_creative(&spec.creative_id)
            .await?
            .ok_or_else(|| EngineError::not_found("creative", &spec.creative_id))?;
        if creative.ad_group_id != ad_group_id {
            return Err(EngineError::InvalidConfiguration(format!(
                "creative {} belongs to ad group {}, not {}",
                creative.id, creative.ad_group_id, ad_group_id
            )));
        }
        if creative.status == CreativeStatus::Removed {
            return Err(EngineError::InvalidConfiguration(format!(
                "creative {} is removed",
                creative.id
            )));
        }

        Ok(Variant {
            id: Uuid::new_v4(),
            role,
            creative_id: creative.id,
            content: spec.content.clone().unwrap_or(creative.content),
            active: false,
        })
    }

    /// READY -> RUNNING; activates both variants
    pub async fn start(&self, id: Uuid) -> Result<Experiment, EngineError> {
        let started = Instant::now();
        let result = self.start_inner(id).await;
        self.ctx.observe("start_experiment", started, &result);
        result
    }

    async fn start_inner(&self, id: Uuid) -> Result<Experiment, EngineError> {
        let mut experiment = self.get(id).await?;
        self.transition(&mut experiment, ExperimentStatus::Running, None)?;
        experiment.started_at = Some(self.ctx.clock.now());
        experiment.control.active = true;
        experiment.test.active = true;

        let split: BTreeMap<String, u32> = [
            (
                experiment.control.creative_id.clone(),
                experiment.config.control_traffic_percent,
            ),
            (
                experiment.test.creative_id.clone(),
                experiment.config.test_traffic_percent,
            ),
        ]
        .into_iter()
        .collect();
        self.ctx
            .record_intent(
                "experiment",
                IntentAction::ActivateVariants {
                    experiment_id: experiment.id,
                    split,
                },
            )
            .await?;
        self.ctx.store.update_experiment(&experiment).await?;
        self.record_transition(&experiment);

        info!(experiment = %experiment.id, "Experiment started");
        self.ctx
            .notify(
                EventType::ExperimentStarted,
                Severity::Info,
                &experiment.id.to_string(),
                &experiment,
            )
            .await;
        Ok(experiment)
    }

    /// RUNNING -> PAUSED
    pub async fn pause(&self, id: Uuid, reason: Option<String>) -> Result<Experiment, EngineError> {
        let started = Instant::now();
        let result = self
            .simple_transition(id, ExperimentStatus::Paused, reason)
            .await;
        self.ctx.observe("pause_experiment", started, &result);
        result
    }

    /// PAUSED -> RUNNING
    pub async fn resume(&self, id: Uuid) -> Result<Experiment, EngineError> {
        let started = Instant::now();
        let result = self
            .simple_transition(id, ExperimentStatus::Running, None)
            .await;
        self.ctx.observe("resume_experiment", started, &result);
        result
    }

    async fn simple_transition(
        &self,
        id: Uuid,
        to: ExperimentStatus,
        reason: Option<String>,
    ) -> Result<Experiment, EngineError> {
        let mut experiment = self.get(id).await?;
        self.transition(&mut experiment, to, reason)?;
        self.ctx.store.update_experiment(&experiment).await?;
        self.record_transition(&experiment);
        info!(experiment = %experiment.id, status = to.as_str(), "Experiment status changed");
        Ok(experiment)
    }

    /// Any non-terminal state -> CANCELLED; traffic returns to control
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<Experiment, EngineError> {
        let started = Instant::now();
        let result = self.cancel_inner(id, reason).await;
        self.ctx.observe("cancel_experiment", started, &result);
        result
    }

    async fn cancel_inner(&self, id: Uuid, reason: Option<String>) -> Result<Experiment, EngineError> {
        let mut experiment = self.get(id).await?;
        let was_started = experiment.status.has_started();
        self.transition(&mut experiment, ExperimentStatus::Cancelled, reason)?;
        experiment.completed_at = Some(self.ctx.clock.now());
        experiment.control.active = false;
        experiment.test.active = false;

        // Intent first so a failed append leaves the experiment retryable
        if was_started {
            self.shift_traffic(&experiment, VariantRole::Control).await?;
        }
        self.ctx.store.update_experiment(&experiment).await?;
        self.record_transition(&experiment);

        info!(experiment = %experiment.id, "Experiment cancelled");
        Ok(experiment)
    }

    /// Re-analyze with current metrics and cache the result on the experiment
    pub async fn analyze(&self, id: Uuid) -> Result<ExperimentAnalysis, EngineError> {
        let started = Instant::now();
        let result = self.analyze_inner(id).await;
        self.ctx.observe("analyze_experiment", started, &result);
        result
    }

    async fn analyze_inner(&self, id: Uuid) -> Result<ExperimentAnalysis, EngineError> {
        let mut experiment = self.get(id).await?;
        if !experiment.status.has_started() {
            return Err(EngineError::InvalidTransition {
                id: experiment.id.to_string(),
                from: experiment.status.as_str(),
                to: "ANALYSIS",
            });
        }

        let analysis = self.compute_analysis(&experiment).await?;
        experiment.latest_analysis = Some(analysis.clone());
        self.ctx.store.update_experiment(&experiment).await?;

        info!(
            experiment = %experiment.id,
            metric = analysis.primary.metric.as_str(),
            relative_change = analysis.primary.relative_change,
            p_value = analysis.primary.p_value,
            decision = ?analysis.recommendation.decision,
            "Experiment analyzed"
        );
        Ok(analysis)
    }

    /// RUNNING -> COMPLETED with a reason; SUCCESS implements the winner
    pub async fn stop(&self, id: Uuid, reason: StopReason) -> Result<Experiment, EngineError> {
        let started = Instant::now();
        let result = self.stop_inner(id, reason).await;
        self.ctx.observe("stop_experiment", started, &result);
        result
    }

    async fn stop_inner(&self, id: Uuid, reason: StopReason) -> Result<Experiment, EngineError> {
        let mut experiment = self.get(id).await?;
        self.transition(
            &mut experiment,
            ExperimentStatus::Completed,
            Some(reason.as_str().to_string()),
        )?;
        experiment.completed_at = Some(self.ctx.clock.now());
        experiment.stop_reason = Some(reason);

        let analysis = self.compute_analysis(&experiment).await?;
        let min_days = experiment.config.min_duration_days;
        if reason == StopReason::Success && analysis.days_running < min_days {
            return Err(EngineError::InvalidConfiguration(format!(
                "experiment {} has run {} of its minimum {} days; it cannot stop for success yet",
                experiment.id, analysis.days_running, min_days
            )));
        }
        let winner = match reason {
            StopReason::Success => analysis.primary.better_arm(),
            StopReason::Failure | StopReason::Inconclusive | StopReason::Manual => None,
        };
        experiment.winner = winner;
        experiment.latest_analysis = Some(analysis);

        let keep = winner.unwrap_or(VariantRole::Control);
        experiment.control.active = keep == VariantRole::Control;
        experiment.test.active = keep == VariantRole::Test;

        match winner {
            Some(role) => self.implement_winner(&experiment, role).await?,
            None => self.shift_traffic(&experiment, VariantRole::Control).await?,
        }
        self.ctx.store.update_experiment(&experiment).await?;
        self.record_transition(&experiment);

        info!(
            experiment = %experiment.id,
            reason = ?reason,
            winner = ?winner,
            "Experiment completed"
        );
        self.ctx
            .notify(
                EventType::ExperimentCompleted,
                Severity::Info,
                &experiment.id.to_string(),
                &experiment,
            )
            .await;
        Ok(experiment)
    }

    /// Whether a running experiment should stop now, and why
    ///
    /// Guardrails are checked even when early stopping is disabled.
    pub async fn check_early_stopping(&self, id: Uuid) -> Result<EarlyStoppingDecision, EngineError> {
        let started = Instant::now();
        let result = self.check_early_stopping_inner(id).await;
        self.ctx.observe("check_early_stopping", started, &result);
        result
    }

    async fn check_early_stopping_inner(&self, id: Uuid) -> Result<EarlyStoppingDecision, EngineError> {
        let experiment = self.get(id).await?;
        if experiment.status != ExperimentStatus::Running {
            return Err(EngineError::InvalidTransition {
                id: experiment.id.to_string(),
                from: experiment.status.as_str(),
                to: "EARLY_STOP_CHECK",
            });
        }

        let analysis = self.analyze_inner(id).await?;
        let decision = early_stopping(&experiment.config, &analysis, &self.ctx.thresholds.experiment);

        if decision.should_stop {
            warn!(
                experiment = %experiment.id,
                trigger = ?decision.trigger,
                "Experiment should stop"
            );
        }
        Ok(decision)
    }

    pub async fn get(&self, id: Uuid) -> Result<Experiment, EngineError> {
        self.ctx
            .store
            .get_experiment(id)
            .await?
            .ok_or_else(|| EngineError::not_found("experiment", id))
    }

    pub async fn list(&self, ad_group_id: Option<&str>) -> Result<Vec<Experiment>, EngineError> {
        Ok(self.ctx.store.list_experiments(ad_group_id).await?)
    }

    fn transition(
        &self,
        experiment: &mut Experiment,
        to: ExperimentStatus,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let from = experiment.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id: experiment.id.to_string(),
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        experiment.status_history.push(StatusChange {
            from,
            to,
            at: self.ctx.clock.now(),
            reason,
        });
        experiment.status = to;
        Ok(())
    }

    fn record_transition(&self, experiment: &Experiment) {
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.record_experiment_transition(experiment.status.as_str());
        }
    }

    /// All traffic to one arm, the other arm paused
    async fn implement_winner(&self, experiment: &Experiment, winner: VariantRole) -> Result<(), EngineError> {
        let loser = match winner {
            VariantRole::Control => VariantRole::Test,
            VariantRole::Test => VariantRole::Control,
        };
        let loser_id = experiment.variant(loser).creative_id.clone();

        self.shift_traffic(experiment, winner).await?;
        self.ctx
            .store
            .set_creative_status(&loser_id, CreativeStatus::Paused)
            .await?;
        self.ctx
            .record_intent(
                "experiment",
                IntentAction::PauseCreative {
                    creative_id: loser_id,
                },
            )
            .await?;

        info!(
            experiment = %experiment.id,
            winner = %experiment.variant(winner).creative_id,
            "Winner implemented"
        );
        self.ctx
            .notify(
                EventType::WinnerImplemented,
                Severity::Info,
                &experiment.id.to_string(),
                experiment,
            )
            .await;
        Ok(())
    }

    async fn shift_traffic(&self, experiment: &Experiment, to: VariantRole) -> Result<(), EngineError> {
        let weights: BTreeMap<String, f64> = [VariantRole::Control, VariantRole::Test]
            .into_iter()
            .map(|role| {
                let weight = if role == to { 1.0 } else { 0.0 };
                (experiment.variant(role).creative_id.clone(), weight)
            })
            .collect();
        self.ctx
            .record_intent(
                "experiment",
                IntentAction::ShiftTraffic {
                    ad_group_id: experiment.ad_group_id.clone(),
                    weights,
                },
            )
            .await?;
        Ok(())
    }

    /// Per-arm totals from the start date to today (or completion)
    pub(crate) async fn compute_analysis(
        &self,
        experiment: &Experiment,
    ) -> Result<ExperimentAnalysis, EngineError> {
        let now = self.ctx.clock.now();
        let started_at = experiment.started_at.unwrap_or(experiment.created_at);
        let ended_at = experiment.completed_at.unwrap_or(now);

        let control = self
            .arm_summary(&experiment.control.creative_id, started_at, ended_at)
            .await?;
        let test = self
            .arm_summary(&experiment.test.creative_id, started_at, ended_at)
            .await?;
        let days_running = ended_at
            .signed_duration_since(started_at)
            .num_days()
            .max(0) as u32;

        let analyzer = self.analyzers.get(experiment.config.method)?;
        let config = &experiment.config;
        let primary_metric = config.primary_metric;

        let current_sample = analyzers::sample_size(primary_metric, &control)
            .min(analyzers::sample_size(primary_metric, &test));
        let information_fraction = if experiment.required_sample_size > 0 {
            (current_sample as f64 / experiment.required_sample_size as f64).min(1.0)
        } else {
            1.0
        };

        let input = Comparison {
            control: &control,
            test: &test,
            config,
            min_sample: self.ctx.thresholds.experiment.min_arm_sample,
            information_fraction,
        };
        let primary = analyzer.compare(primary_metric, &input);
        let secondary: Vec<MetricResult> = config
            .secondary_metrics
            .iter()
            .filter(|m| **m != primary_metric)
            .map(|m| analyzer.compare(*m, &input))
            .collect();
        let bayesian = analyzer.posterior(primary_metric, &input);

        let power = project_power(
            config,
            experiment.required_sample_size,
            current_sample,
            days_running,
        );
        let recommendation = recommend(
            &primary,
            &power,
            config.min_duration_days.saturating_sub(days_running),
        );

        Ok(ExperimentAnalysis {
            experiment_id: experiment.id,
            analyzed_at: now,
            method: config.method,
            days_running,
            control,
            test,
            primary,
            secondary,
            bayesian,
            power,
            recommendation,
        })
    }

    async fn arm_summary(
        &self,
        creative_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ArmSummary, EngineError> {
        let snapshots = self
            .ctx
            .store
            .snapshots(creative_id, from.date_naive(), to.date_naive())
            .await?;
        let totals = MetricTotals::from_snapshots(&snapshots);
        Ok(ArmSummary {
            creative_id: creative_id.to_string(),
            impressions: totals.impressions,
            clicks: totals.clicks,
            conversions: totals.conversions,
            revenue: totals.revenue,
            spend: totals.cost,
        })
    }
}

/// Reject configurations before anything is persisted
pub fn validate_config(config: &ExperimentConfig) -> Result<(), EngineError> {
    let invalid = |msg: String| Err(EngineError::InvalidConfiguration(msg));

    let control = config.control_traffic_percent;
    let test = config.test_traffic_percent;
    if control.checked_add(test) != Some(100) {
        return invalid(format!(
            "traffic split must sum to 100, got {} + {}",
            control, test
        ));
    }
    if control == 0 || test == 0 {
        return invalid("each arm needs a non-zero traffic share".to_string());
    }
    if config.max_duration_days <= config.min_duration_days {
        return invalid(format!(
            "maxDurationDays ({}) must exceed minDurationDays ({})",
            config.max_duration_days, config.min_duration_days
        ));
    }
    if !(config.significance_level > 0.0 && config.significance_level < 0.5) {
        return invalid(format!(
            "significanceLevel must be in (0, 0.5), got {}",
            config.significance_level
        ));
    }
    if !(config.target_power > 0.0 && config.target_power < 1.0) {
        return invalid(format!(
            "targetPower must be in (0, 1), got {}",
            config.target_power
        ));
    }
    if config.min_detectable_effect.is_nan() || config.min_detectable_effect <= 0.0 {
        return invalid("minDetectableEffect must be positive".to_string());
    }
    if !(config.baseline_rate > 0.0 && config.baseline_rate * (1.0 + config.min_detectable_effect) < 1.0) {
        return invalid(format!(
            "baselineRate {} with effect {} is not a valid proportion",
            config.baseline_rate, config.min_detectable_effect
        ));
    }
    if config.min_practical_significance < 0.0 {
        return invalid("minPracticalSignificance must not be negative".to_string());
    }
    if config.max_negative_impact.is_nan()
        || config.max_negative_impact <= 0.0
        || config.max_spend_increase < 0.0
    {
        return invalid("guardrail ceilings must be positive".to_string());
    }
    Ok(())
}

fn project_power(
    config: &ExperimentConfig,
    required_sample_size: u64,
    current_sample_size: u64,
    days_running: u32,
) -> PowerProjection {
    let progress = if required_sample_size > 0 {
        (current_sample_size as f64 / required_sample_size as f64).min(1.0)
    } else {
        1.0
    };
    let achieved_power = achieved_power(
        config.baseline_rate,
        config.baseline_rate * (1.0 + config.min_detectable_effect),
        current_sample_size,
        config.significance_level,
    );

    let estimated_days_remaining = if current_sample_size >= required_sample_size {
        Some(0)
    } else if days_running > 0 && current_sample_size > 0 {
        let per_day = current_sample_size as f64 / f64::from(days_running);
        let remaining = (required_sample_size - current_sample_size) as f64 / per_day;
        Some(remaining.ceil() as u32)
    } else {
        None
    };

    PowerProjection {
        required_sample_size,
        current_sample_size,
        progress,
        achieved_power,
        estimated_days_remaining,
    }
}

/// Decision for one analysis
///
/// `days_to_minimum` is how long the experiment still has to run before it
/// reaches its configured minimum duration; no winner is called before then.
pub fn recommend(
    primary: &MetricResult,
    power: &PowerProjection,
    days_to_minimum: u32,
) -> TestRecommendation {
    let change = primary.improvement() * 100.0;

    if primary.statistically_significant && primary.practically_significant {
        if days_to_minimum > 0 {
            return TestRecommendation {
                decision: TestDecision::Continue,
                winner: None,
                rationale: format!(
                    "{} changed {:+.1}% (p = {:.4}) but the minimum duration is {} day(s) away",
                    primary.metric.as_str(),
                    change,
                    primary.p_value,
                    days_to_minimum
                ),
            };
        }
        return TestRecommendation {
            decision: TestDecision::StopSuccess,
            winner: primary.better_arm(),
            rationale: format!(
                "{} changed {:+.1}% (p = {:.4}); significant and above the practical threshold",
                primary.metric.as_str(),
                change,
                primary.p_value
            ),
        };
    }

    if primary.statistically_significant {
        return TestRecommendation {
            decision: TestDecision::Continue,
            winner: None,
            rationale: format!(
                "{} changed {:+.1}% (p = {:.4}) but below the practical threshold; weigh the cost of running longer against the gain",
                primary.metric.as_str(),
                change,
                primary.p_value
            ),
        };
    }

    if power.progress < 1.0 {
        TestRecommendation {
            decision: TestDecision::Continue,
            winner: None,
            rationale: format!(
                "Not significant yet (p = {:.4}); {:.0}% of the required sample collected",
                primary.p_value,
                power.progress * 100.0
            ),
        }
    } else {
        TestRecommendation {
            decision: TestDecision::IncreaseSample,
            winner: None,
            rationale: format!(
                "Required sample reached without significance (p = {:.4}); extend the test or accept no difference",
                primary.p_value
            ),
        }
    }
}

/// Guardrail, then success, futility and maximum duration
///
/// Guardrails fire at any time; success and futility wait for the minimum
/// duration.
pub fn early_stopping(
    config: &ExperimentConfig,
    analysis: &ExperimentAnalysis,
    t: &ExperimentThresholds,
) -> EarlyStoppingDecision {
    let primary = &analysis.primary;
    let enough_data = analysis.power.current_sample_size >= t.min_arm_sample;
    let mut details = Vec::new();
    let mut outcome: Option<(EarlyStopTrigger, StopReason)> = None;

    // Guardrails
    if enough_data && primary.improvement() < -config.max_negative_impact {
        details.push(format!(
            "{} declined {:.1}%, beyond the {:.1}% guardrail",
            primary.metric.as_str(),
            -primary.improvement() * 100.0,
            config.max_negative_impact * 100.0
        ));
        outcome = Some((EarlyStopTrigger::GuardrailViolation, StopReason::Failure));
    }
    let control_cpm = spend_per_impression(&analysis.control);
    let test_cpm = spend_per_impression(&analysis.test);
    if enough_data && control_cpm > 0.0 {
        let increase = test_cpm / control_cpm - 1.0;
        if increase > config.max_spend_increase {
            details.push(format!(
                "spend per impression up {:.1}%, beyond the {:.1}% guardrail",
                increase * 100.0,
                config.max_spend_increase * 100.0
            ));
            outcome.get_or_insert((EarlyStopTrigger::GuardrailViolation, StopReason::Failure));
        }
    }

    let min_duration_met = analysis.days_running >= config.min_duration_days;
    if outcome.is_none() && config.early_stopping_enabled && !min_duration_met {
        details.push(format!(
            "{} of the minimum {} days elapsed; success and futility not evaluated",
            analysis.days_running, config.min_duration_days
        ));
    } else if outcome.is_none() && config.early_stopping_enabled {
        if primary.statistically_significant && primary.practically_significant {
            details.push(format!(
                "{} significant (p = {:.4}) with a {:+.1}% change",
                primary.metric.as_str(),
                primary.p_value,
                primary.improvement() * 100.0
            ));
            outcome = Some((EarlyStopTrigger::Success, StopReason::Success));
        } else if config.futility_enabled
            && analysis.power.progress >= t.futility_min_progress
            && primary.improvement().abs() < t.futility_effect_ratio * config.min_detectable_effect
        {
            details.push(format!(
                "observed effect {:.1}% is far below the {:.1}% detectable effect at {:.0}% progress",
                primary.improvement() * 100.0,
                config.min_detectable_effect * 100.0,
                analysis.power.progress * 100.0
            ));
            outcome = Some((EarlyStopTrigger::Futility, StopReason::Inconclusive));
        }
    }

    if outcome.is_none() && analysis.days_running >= config.max_duration_days {
        details.push(format!(
            "maximum duration of {} days reached",
            config.max_duration_days
        ));
        outcome = Some((EarlyStopTrigger::MaxDurationReached, StopReason::Inconclusive));
    }

    EarlyStoppingDecision {
        should_stop: outcome.is_some(),
        trigger: outcome.map(|(trigger, _)| trigger),
        stop_reason: outcome.map(|(_, reason)| reason),
        details,
        analysis: analysis.clone(),
    }
}

fn spend_per_impression(arm: &ArmSummary) -> f64 {
    if arm.impressions > 0 {
        arm.spend / arm.impressions as f64
    } else {
        0.0
    }
}

#[cfg(test)]
#[path = "experiment_test.rs"]
mod tests;
