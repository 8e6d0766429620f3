//! Rotation Optimizer
//!
//! Chooses a traffic-allocation strategy for an ad group from its
//! performance picture and turns it into a weighted schedule. `apply`
//! persists the schedule and records the platform intents; nothing else
//! here writes.

use crate::config::RotationThresholds;
use crate::engine::performance::{trend_sign, PerformanceAnalyzer};
use crate::engine::{Context, EngineError};
use crate::model::creative::CreativeStatus;
use crate::model::intent::IntentAction;
use crate::model::performance::{AdGroupPerformance, PerformanceProfile};
use crate::model::rotation::{
    OptimizationOpportunity, Priority, RiskLevel, RotationAction, RotationActionKind,
    RotationAnalysis, RotationConfig, RotationRecommendation, RotationSchedule, RotationState,
    RotationStrategy, ScheduleEntry,
};
use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Smallest weight a creative can get under ADAPTIVE
const MIN_ADAPTIVE_WEIGHT: f64 = 0.01;

#[derive(Clone)]
pub struct RotationOptimizer {
    ctx: Arc<Context>,
    performance: PerformanceAnalyzer,
}

/// Everything derived for one ad group in one call
struct Assessment {
    analysis: RotationAnalysis,
    strategy: RotationStrategy,
    rationale: String,
    weights: Vec<(String, f64)>,
    actions: Vec<RotationAction>,
}

impl RotationOptimizer {
    pub fn new(ctx: Arc<Context>, performance: PerformanceAnalyzer) -> Self {
        RotationOptimizer { ctx, performance }
    }

    /// Current rotation state, gap, stability and opportunity
    pub async fn analyze(
        &self,
        ad_group_id: &str,
        config: &RotationConfig,
    ) -> Result<RotationAnalysis, EngineError> {
        let started = Instant::now();
        let result = self.assess(ad_group_id, config).await.map(|a| a.analysis);
        self.ctx.observe("analyze_rotation", started, &result);
        result
    }

    /// Full recommendation with a concrete schedule; nothing is persisted
    pub async fn recommend(
        &self,
        ad_group_id: &str,
        config: &RotationConfig,
    ) -> Result<RotationRecommendation, EngineError> {
        let started = Instant::now();
        let result = self.recommend_inner(ad_group_id, config).await;
        self.ctx.observe("recommend_rotation", started, &result);
        result
    }

    async fn recommend_inner(
        &self,
        ad_group_id: &str,
        config: &RotationConfig,
    ) -> Result<RotationRecommendation, EngineError> {
        let assessment = self.assess(ad_group_id, config).await?;

        let now = self.ctx.clock.now();
        let entries = schedule_entries(&assessment.weights);
        let schedule = RotationSchedule {
            ad_group_id: ad_group_id.to_string(),
            strategy: assessment.strategy,
            entries,
            effective_from: now,
            next_review: now + Duration::days(i64::from(config.rotation_interval_days.max(1))),
        };

        Ok(RotationRecommendation {
            analysis: assessment.analysis,
            strategy: assessment.strategy,
            schedule,
            actions: assessment.actions,
            rationale: assessment.rationale,
        })
    }

    /// Persist the recommended schedule, pause creatives left out of it and
    /// record the matching platform intents
    pub async fn apply(
        &self,
        ad_group_id: &str,
        config: &RotationConfig,
    ) -> Result<RotationRecommendation, EngineError> {
        let started = Instant::now();
        let result = self.apply_inner(ad_group_id, config).await;
        self.ctx.observe("apply_rotation", started, &result);
        result
    }

    async fn apply_inner(
        &self,
        ad_group_id: &str,
        config: &RotationConfig,
    ) -> Result<RotationRecommendation, EngineError> {
        let recommendation = self.recommend_inner(ad_group_id, config).await?;
        let schedule = &recommendation.schedule;

        self.ctx.store.upsert_rotation_schedule(schedule).await?;
        self.ctx
            .record_intent(
                "rotation",
                IntentAction::ShiftTraffic {
                    ad_group_id: ad_group_id.to_string(),
                    weights: schedule.weights(),
                },
            )
            .await?;

        let scheduled = schedule.weights();
        for action in &recommendation.actions {
            if action.kind != RotationActionKind::PauseCreative {
                continue;
            }
            let Some(ref creative_id) = action.creative_id else {
                continue;
            };
            if scheduled.contains_key(creative_id) {
                continue;
            }
            self.ctx
                .store
                .set_creative_status(creative_id, CreativeStatus::Paused)
                .await?;
            self.ctx
                .record_intent(
                    "rotation",
                    IntentAction::PauseCreative {
                        creative_id: creative_id.clone(),
                    },
                )
                .await?;
        }

        info!(
            ad_group = %ad_group_id,
            strategy = schedule.strategy.as_str(),
            creatives = schedule.entries.len(),
            "Rotation schedule applied"
        );
        Ok(recommendation)
    }

    /// Schedule last applied to the ad group
    pub async fn current_schedule(
        &self,
        ad_group_id: &str,
    ) -> Result<Option<RotationSchedule>, EngineError> {
        Ok(self.ctx.store.get_rotation_schedule(ad_group_id).await?)
    }

    async fn assess(
        &self,
        ad_group_id: &str,
        config: &RotationConfig,
    ) -> Result<Assessment, EngineError> {
        validate_config(config)?;
        let t = &self.ctx.thresholds.rotation;

        let group = self
            .performance
            .analyze_ad_group(ad_group_id, Some(config.lookback_days))
            .await?;
        let now = self.ctx.clock.now();
        let ages: BTreeMap<String, i64> = self
            .ctx
            .store
            .creatives_in_ad_group(ad_group_id)
            .await?
            .into_iter()
            .map(|c| {
                let age = c.age_days(now);
                (c.id, age)
            })
            .collect();
        let stored = self.ctx.store.get_rotation_schedule(ad_group_id).await?;

        let active: Vec<&PerformanceProfile> = group
            .profiles
            .iter()
            .filter(|p| p.status == CreativeStatus::Enabled)
            .collect();
        let proven: Vec<f64> = active
            .iter()
            .filter(|p| p.totals.impressions >= config.min_impressions)
            .map(|p| p.score)
            .collect();

        let performance_gap = gap(&proven);
        let stability_index = stability(&proven);
        let risk_level = assess_risk(&active, performance_gap, stability_index, config, t);

        let current = current_state(&active, stored.as_ref(), config);
        let scores: BTreeMap<String, f64> = active
            .iter()
            .map(|p| (p.creative_id.clone(), p.score))
            .collect();
        let strategy_effectiveness = effectiveness(&current.weights, &scores);

        let (strategy, rationale) = choose_strategy(
            config,
            current.strategy,
            performance_gap,
            stability_index,
            risk_level,
            strategy_effectiveness,
            t,
        );

        let candidates = schedule_candidates(&active, config);
        let weights = strategy_weights(strategy, &candidates, &ages, config, t);
        let weight_map: BTreeMap<String, f64> = weights.iter().cloned().collect();
        let projected = effectiveness(&weight_map, &scores);
        let estimated_improvement = if strategy_effectiveness > 0.0 {
            (projected - strategy_effectiveness) / strategy_effectiveness * 100.0
        } else {
            0.0
        };

        let actions = rotation_actions(&group, &active, current.strategy, strategy, config, t);

        let analysis = RotationAnalysis {
            ad_group_id: ad_group_id.to_string(),
            current,
            scores,
            performance_gap,
            stability_index,
            strategy_effectiveness,
            risk_level,
            opportunity: OptimizationOpportunity {
                recommended_strategy: strategy,
                estimated_improvement,
                description: rationale.clone(),
            },
        };

        Ok(Assessment {
            analysis,
            strategy,
            rationale,
            weights,
            actions,
        })
    }
}

fn validate_config(config: &RotationConfig) -> Result<(), EngineError> {
    if config.max_active_creatives == 0 {
        return Err(EngineError::InvalidConfiguration(
            "maxActiveCreatives must be at least 1".to_string(),
        ));
    }
    if !(config.confidence_level > 0.0 && config.confidence_level < 1.0) {
        return Err(EngineError::InvalidConfiguration(format!(
            "confidenceLevel must be in (0, 1), got {}",
            config.confidence_level
        )));
    }
    if config.manual_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(EngineError::InvalidConfiguration(
            "manualWeights must be non-negative".to_string(),
        ));
    }
    if config.strategy == RotationStrategy::Manual && config.manual_weights.is_empty() {
        return Err(EngineError::InvalidConfiguration(
            "MANUAL strategy requires manualWeights".to_string(),
        ));
    }
    Ok(())
}

/// Best minus worst proven score
fn gap(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let max = scores.iter().cloned().fold(f64::MIN, f64::max);
    let min = scores.iter().cloned().fold(f64::MAX, f64::min);
    max - min
}

/// 100 minus twice the population standard deviation, floored at 0
pub fn stability(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 100.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std_dev = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
    100.0 - (2.0 * std_dev).min(100.0)
}

fn assess_risk(
    active: &[&PerformanceProfile],
    performance_gap: f64,
    stability_index: f64,
    config: &RotationConfig,
    t: &RotationThresholds,
) -> RiskLevel {
    if active.len() < t.min_active_for_low_risk || performance_gap > t.high_risk_gap {
        RiskLevel::High
    } else if stability_index < t.stability_floor
        || active
            .iter()
            .any(|p| p.totals.impressions < config.min_impressions)
    {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Stored schedule restricted to active creatives, or an even split
fn current_state(
    active: &[&PerformanceProfile],
    stored: Option<&RotationSchedule>,
    config: &RotationConfig,
) -> RotationState {
    let (strategy, weights, last_updated) = match stored {
        Some(schedule) => {
            let weights: BTreeMap<String, f64> = schedule
                .weights()
                .into_iter()
                .filter(|(id, _)| active.iter().any(|p| &p.creative_id == id))
                .collect();
            (schedule.strategy, weights, Some(schedule.effective_from))
        }
        None => {
            let even = 1.0 / active.len().max(1) as f64;
            let weights = active
                .iter()
                .map(|p| (p.creative_id.clone(), even))
                .collect();
            (config.strategy, weights, None)
        }
    };

    RotationState {
        strategy,
        active_creatives: active.len(),
        weights: normalize_map(weights),
        last_updated,
    }
}

/// Traffic-weighted mean score
fn effectiveness(weights: &BTreeMap<String, f64>, scores: &BTreeMap<String, f64>) -> f64 {
    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        return 0.0;
    }
    weights
        .iter()
        .map(|(id, w)| w * scores.get(id).copied().unwrap_or(0.0))
        .sum::<f64>()
        / total
}

fn choose_strategy(
    config: &RotationConfig,
    current: RotationStrategy,
    performance_gap: f64,
    stability_index: f64,
    risk: RiskLevel,
    current_effectiveness: f64,
    t: &RotationThresholds,
) -> (RotationStrategy, String) {
    if config.strategy == RotationStrategy::Manual {
        return (
            RotationStrategy::Manual,
            "Manual weights requested for this ad group".to_string(),
        );
    }
    if performance_gap > t.optimize_gap && risk == RiskLevel::Low {
        return (
            RotationStrategy::Optimize,
            format!(
                "Performance gap of {:.0} points with low risk; weight traffic by score",
                performance_gap
            ),
        );
    }
    if stability_index < t.stability_floor {
        return (
            RotationStrategy::Adaptive,
            format!(
                "Stability index {:.0} is below {:.0}; adapt weights to score, trend and freshness",
                stability_index, t.stability_floor
            ),
        );
    }
    if current_effectiveness > t.keep_effectiveness {
        return (
            current,
            format!(
                "Current {} rotation is effective ({:.0}); keep it",
                current.as_str(),
                current_effectiveness
            ),
        );
    }
    (
        RotationStrategy::Even,
        "No clear signal; rotate evenly to keep learning".to_string(),
    )
}

/// Active creatives eligible for the schedule, best first
fn schedule_candidates<'a>(
    active: &[&'a PerformanceProfile],
    config: &RotationConfig,
) -> Vec<&'a PerformanceProfile> {
    let below_threshold = |p: &PerformanceProfile| {
        p.totals.impressions >= config.min_impressions && p.score < config.performance_threshold
    };

    let mut candidates: Vec<&PerformanceProfile> =
        active.iter().copied().filter(|p| !below_threshold(p)).collect();
    if candidates.is_empty() {
        candidates = active.to_vec();
    }
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.creative_id.cmp(&b.creative_id))
    });
    candidates.truncate(config.max_active_creatives);
    candidates
}

/// Normalized weights per strategy, in candidate order
fn strategy_weights(
    strategy: RotationStrategy,
    candidates: &[&PerformanceProfile],
    ages: &BTreeMap<String, i64>,
    config: &RotationConfig,
    t: &RotationThresholds,
) -> Vec<(String, f64)> {
    let raw: Vec<(String, f64)> = match strategy {
        RotationStrategy::Even => candidates
            .iter()
            .map(|p| (p.creative_id.clone(), 1.0))
            .collect(),
        RotationStrategy::Optimize => {
            let proven: Vec<f64> = candidates
                .iter()
                .filter(|p| p.totals.impressions >= config.min_impressions)
                .map(|p| p.score)
                .collect();
            // Unproven creatives explore at the proven mean
            let exploration = if proven.is_empty() {
                0.0
            } else {
                proven.iter().sum::<f64>() / proven.len() as f64
            };
            candidates
                .iter()
                .map(|p| {
                    let score = if p.totals.impressions >= config.min_impressions {
                        p.score
                    } else {
                        exploration
                    };
                    (p.creative_id.clone(), score + t.optimize_weight_floor)
                })
                .collect()
        }
        RotationStrategy::Adaptive => candidates
            .iter()
            .map(|p| {
                let trend = t.adaptive_trend_weight * trend_sign(&p.trends.ctr) * p.trends.ctr.confidence;
                let fresh = ages
                    .get(&p.creative_id)
                    .is_some_and(|age| *age < i64::from(config.learning_period_days));
                let freshness = if fresh { t.adaptive_freshness_bonus } else { 0.0 };
                let weight = (p.score / 100.0 + trend + freshness).max(MIN_ADAPTIVE_WEIGHT);
                (p.creative_id.clone(), weight)
            })
            .collect(),
        RotationStrategy::Manual => candidates
            .iter()
            .map(|p| {
                let weight = config.manual_weights.get(&p.creative_id).copied().unwrap_or(0.0);
                (p.creative_id.clone(), weight)
            })
            .collect(),
    };

    normalize(raw)
}

/// Scale to sum 1.0; an all-zero vector becomes an even split
fn normalize(weights: Vec<(String, f64)>) -> Vec<(String, f64)> {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if weights.is_empty() {
        return weights;
    }
    if total <= 0.0 {
        let even = 1.0 / weights.len() as f64;
        return weights.into_iter().map(|(id, _)| (id, even)).collect();
    }
    weights.into_iter().map(|(id, w)| (id, w / total)).collect()
}

fn normalize_map(weights: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    normalize(weights.into_iter().collect()).into_iter().collect()
}

/// Integer percentages by largest remainder, summing to exactly 100
pub fn traffic_percents(weights: &[f64]) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let raw: Vec<f64> = weights.iter().map(|w| w * 100.0).collect();
    let mut percents: Vec<u32> = raw.iter().map(|r| r.floor() as u32).collect();
    let assigned: u32 = percents.iter().sum();

    let mut order: Vec<usize> = (0..raw.len()).collect();
    order.sort_by(|a, b| {
        let fa = raw[*a] - raw[*a].floor();
        let fb = raw[*b] - raw[*b].floor();
        fb.total_cmp(&fa).then(a.cmp(b))
    });
    for i in order.into_iter().cycle().take(100u32.saturating_sub(assigned) as usize) {
        percents[i] += 1;
    }
    percents
}

fn schedule_entries(weights: &[(String, f64)]) -> Vec<ScheduleEntry> {
    let values: Vec<f64> = weights.iter().map(|(_, w)| *w).collect();
    weights
        .iter()
        .zip(traffic_percents(&values))
        .map(|((id, weight), traffic_percent)| ScheduleEntry {
            creative_id: id.clone(),
            weight: *weight,
            traffic_percent,
        })
        .collect()
}

fn rotation_actions(
    group: &AdGroupPerformance,
    active: &[&PerformanceProfile],
    current: RotationStrategy,
    recommended: RotationStrategy,
    config: &RotationConfig,
    t: &RotationThresholds,
) -> Vec<RotationAction> {
    let mut actions = Vec::new();

    for p in active {
        if p.totals.impressions < config.min_impressions {
            continue;
        }
        if p.score < config.performance_threshold {
            let priority = if p.score < t.urgent_pause_score {
                Priority::High
            } else {
                Priority::Medium
            };
            actions.push(RotationAction {
                kind: RotationActionKind::PauseCreative,
                priority,
                creative_id: Some(p.creative_id.clone()),
                description: format!(
                    "Pause creative {} (score {:.0} below {:.0})",
                    p.creative_id, p.score, config.performance_threshold
                ),
            });
        } else if p.score > t.variant_source_score {
            actions.push(RotationAction {
                kind: RotationActionKind::CreateVariant,
                priority: Priority::Medium,
                creative_id: Some(p.creative_id.clone()),
                description: format!(
                    "Create a test variant from creative {} (score {:.0})",
                    p.creative_id, p.score
                ),
            });
        }
    }

    if recommended != current {
        actions.push(RotationAction {
            kind: RotationActionKind::ShiftTraffic,
            priority: Priority::Medium,
            creative_id: None,
            description: format!(
                "Switch ad group {} from {} to {} rotation",
                group.ad_group_id,
                current.as_str(),
                recommended.as_str()
            ),
        });
    }

    actions.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.kind.cmp(&b.kind)));
    actions
}

#[cfg(test)]
#[path = "rotation_test.rs"]
mod tests;
