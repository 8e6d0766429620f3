//! Pure selection policy: validation blocks, risk, projection, decision
//! and rollout plan. Nothing here touches the store.

use crate::config::{RiskCutoffs, SelectionThresholds};
use crate::engine::experiment::analyzers::{metric_value, sample_size};
use crate::model::experiment::{
    ArmSummary, ExperimentAnalysis, ExperimentConfig, ExperimentMetric, MetricDirection,
    MetricResult, VariantRole,
};
use crate::model::fatigue::FatigueSeverity;
use crate::model::rotation::RiskLevel;
use crate::model::selection::{
    BusinessValidation, ImplementationAction, ImplementationPlan, MarketContext, MonitoringPlan,
    PerformanceProjection, RiskAssessment, RiskTolerance, RolloutKind, RolloutPhase,
    SelectionCriteria, SelectionDecision, StatisticalValidation, Winner,
};

/// Quality signals for the would-be winner
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QualityGate {
    /// Severity of the latest fatigue verdict, if any
    pub fatigue: Option<FatigueSeverity>,
    /// Latest known quality score, if any
    pub quality_score: Option<f64>,
}

/// Arm the primary metric favours; Test on an exact tie
pub fn leading_arm(analysis: &ExperimentAnalysis) -> VariantRole {
    analysis.primary.better_arm().unwrap_or(VariantRole::Test)
}

fn arm(analysis: &ExperimentAnalysis, role: VariantRole) -> &ArmSummary {
    match role {
        VariantRole::Control => &analysis.control,
        VariantRole::Test => &analysis.test,
    }
}

fn other(role: VariantRole) -> VariantRole {
    match role {
        VariantRole::Control => VariantRole::Test,
        VariantRole::Test => VariantRole::Control,
    }
}

/// Improvement of `role` over the other arm, positive is better
fn improvement_for(result: &MetricResult, role: VariantRole) -> f64 {
    match role {
        VariantRole::Test => result.improvement(),
        VariantRole::Control => -result.improvement(),
    }
}

pub fn statistical_validation(
    analysis: &ExperimentAnalysis,
    criteria: &SelectionCriteria,
    min_arm_sample: u64,
) -> StatisticalValidation {
    let primary = &analysis.primary;
    let primary_metric_valid = sample_size(primary.metric, &analysis.control) >= min_arm_sample
        && sample_size(primary.metric, &analysis.test) >= min_arm_sample
        && primary.control_value.is_finite()
        && primary.test_value.is_finite();
    let sample_size_adequate = analysis.power.current_sample_size >= criteria.min_sample_size;
    let duration_adequate = analysis.days_running >= criteria.min_duration_days;
    let confidence_met = 1.0 - primary.p_value >= criteria.min_confidence;

    StatisticalValidation {
        primary_metric_valid,
        sample_size_adequate,
        duration_adequate,
        confidence_met,
        passed: primary_metric_valid && sample_size_adequate && duration_adequate && confidence_met,
    }
}

pub fn business_validation(
    analysis: &ExperimentAnalysis,
    criteria: &SelectionCriteria,
    gate: &QualityGate,
) -> BusinessValidation {
    let leader = leading_arm(analysis);
    let winner_arm = arm(analysis, leader);
    let other_arm = arm(analysis, other(leader));
    let mut notes = Vec::new();

    let effect = analysis.primary.improvement().abs();
    let practically_significant = effect >= criteria.min_practical_significance;
    if !practically_significant {
        notes.push(format!(
            "effect of {:.1}% is below the {:.1}% practical threshold",
            effect * 100.0,
            criteria.min_practical_significance * 100.0
        ));
    }

    let mut secondary_within_tolerance = true;
    for result in &analysis.secondary {
        let change = improvement_for(result, leader);
        if change < -criteria.max_secondary_decline {
            secondary_within_tolerance = false;
            notes.push(format!(
                "{} declines {:.1}% for the leading arm (tolerance {:.1}%)",
                result.metric.as_str(),
                -change * 100.0,
                criteria.max_secondary_decline * 100.0
            ));
        }
    }

    let budget_within_limit = match (cpm(winner_arm), cpm(other_arm)) {
        (Some(winner), Some(baseline)) if baseline > 0.0 => {
            let increase = winner / baseline - 1.0;
            if increase > criteria.max_budget_increase {
                notes.push(format!(
                    "spend per impression rises {:.1}% (limit {:.1}%)",
                    increase * 100.0,
                    criteria.max_budget_increase * 100.0
                ));
                false
            } else {
                true
            }
        }
        _ => true,
    };

    let roi_within_bounds = if winner_arm.spend > 0.0 && winner_arm.revenue > 0.0 {
        let roas = metric_value(ExperimentMetric::Roas, winner_arm);
        if roas < criteria.min_roas {
            notes.push(format!(
                "leading arm ROAS {:.2} is below {:.2}",
                roas, criteria.min_roas
            ));
            false
        } else {
            true
        }
    } else {
        true
    };

    let fatigue_ok = match gate.fatigue {
        Some(severity) if severity > criteria.max_fatigue_severity => {
            notes.push(format!(
                "leading creative shows {} fatigue",
                severity.as_str()
            ));
            false
        }
        _ => true,
    };
    let quality_ok = match (criteria.min_quality_score, gate.quality_score) {
        (Some(min), Some(score)) if score < min => {
            notes.push(format!("quality score {:.1} is below {:.1}", score, min));
            false
        }
        _ => true,
    };
    let quality_gate_passed = fatigue_ok && quality_ok;

    BusinessValidation {
        practically_significant,
        secondary_within_tolerance,
        budget_within_limit,
        roi_within_bounds,
        quality_gate_passed,
        passed: practically_significant
            && secondary_within_tolerance
            && budget_within_limit
            && roi_within_bounds
            && quality_gate_passed,
        notes,
    }
}

fn cpm(arm: &ArmSummary) -> Option<f64> {
    if arm.impressions > 0 {
        Some(arm.spend / arm.impressions as f64 * 1000.0)
    } else {
        None
    }
}

fn cutoffs(tolerance: RiskTolerance, t: &SelectionThresholds) -> RiskCutoffs {
    match tolerance {
        RiskTolerance::Conservative => t.conservative,
        RiskTolerance::Moderate => t.moderate,
        RiskTolerance::Aggressive => t.aggressive,
    }
}

pub fn assess_risk(
    analysis: &ExperimentAnalysis,
    config: &ExperimentConfig,
    criteria: &SelectionCriteria,
    market: &MarketContext,
    t: &SelectionThresholds,
) -> RiskAssessment {
    let primary = &analysis.primary;
    let mut risks = Vec::new();

    if primary.p_value > config.significance_level / 2.0 {
        risks.push(format!(
            "p-value {:.4} leaves little margin below {:.2}",
            primary.p_value, config.significance_level
        ));
    }
    if primary.relative_change.abs() > t.large_change {
        risks.push(format!(
            "{} changed {:+.1}%, an unusually large move",
            primary.metric.as_str(),
            primary.relative_change * 100.0
        ));
    }
    if market.competitive_activity {
        risks.push("competitor activity during the test window".to_string());
    }
    if market.seasonal_event {
        risks.push("test window overlapped a seasonal event".to_string());
    }

    let limits = cutoffs(criteria.risk_tolerance, t);
    let level = if risks.len() >= limits.high {
        RiskLevel::High
    } else if risks.len() >= limits.medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskAssessment { level, risks }
}

/// Control totals scaled by the expected lift
pub fn project(analysis: &ExperimentAnalysis) -> PerformanceProjection {
    let primary = &analysis.primary;
    let expected_lift = primary.improvement();
    let baseline = &analysis.control;
    let gain = expected_lift.max(0.0);

    let (revenue_factor, cost_factor) = match primary.metric.direction() {
        MetricDirection::Higher => (1.0 + gain, 1.0),
        MetricDirection::Lower => (1.0, 1.0 - gain),
    };

    PerformanceProjection {
        expected_lift,
        current_revenue: baseline.revenue,
        current_cost: baseline.spend,
        current_conversions: baseline.conversions,
        projected_revenue: baseline.revenue * revenue_factor,
        projected_cost: baseline.spend * cost_factor,
        projected_conversions: baseline.conversions as f64 * revenue_factor,
        confidence_interval: primary.confidence_interval,
    }
}

/// Decision and winner
///
/// SELECT_WINNER only when every statistical and business gate passed.
pub fn decide(
    analysis: &ExperimentAnalysis,
    config: &ExperimentConfig,
    criteria: &SelectionCriteria,
    statistical: &StatisticalValidation,
    business: &BusinessValidation,
    risk: &RiskAssessment,
) -> (SelectionDecision, Option<Winner>) {
    let primary = &analysis.primary;

    if primary.statistically_significant && primary.improvement() < -config.max_negative_impact {
        return (SelectionDecision::AbortTest, Some(Winner::Control));
    }

    if !statistical.passed || !business.passed {
        let needs_data = !statistical.sample_size_adequate
            || !statistical.duration_adequate
            || !statistical.primary_metric_valid;
        return if needs_data {
            (SelectionDecision::ContinueTest, None)
        } else {
            (SelectionDecision::DeclareInconclusive, Some(Winner::Neither))
        };
    }

    if risk.level == RiskLevel::High && criteria.risk_tolerance == RiskTolerance::Conservative {
        return (SelectionDecision::ContinueTest, None);
    }

    match primary.better_arm() {
        Some(role) => (SelectionDecision::SelectWinner, Some(Winner::from(role))),
        None => (SelectionDecision::DeclareInconclusive, Some(Winner::Neither)),
    }
}

/// Additive confidence from validation flags and risk, within [0.1, 1.0]
pub fn confidence(
    analysis: &ExperimentAnalysis,
    config: &ExperimentConfig,
    statistical: &StatisticalValidation,
    business: &BusinessValidation,
    risk: &RiskAssessment,
) -> f64 {
    let mut score: f64 = 0.5;
    if statistical.passed {
        score += 0.15;
    }
    if business.passed {
        score += 0.15;
    }
    if analysis.primary.p_value < config.significance_level / 5.0 {
        score += 0.1;
    }
    score += match risk.level {
        RiskLevel::Low => 0.1,
        RiskLevel::Medium => 0.0,
        RiskLevel::High => -0.2,
    };
    score.clamp(0.1, 1.0)
}

fn phase(phase: u32, traffic_percent: u32, start_day: u32) -> RolloutPhase {
    RolloutPhase {
        phase,
        traffic_percent,
        start_day,
        description: format!("Shift {}% of traffic to the winner", traffic_percent),
    }
}

/// Fixed phase template per rollout kind
pub fn rollout_phases(kind: RolloutKind) -> Vec<RolloutPhase> {
    match kind {
        RolloutKind::Immediate => vec![phase(1, 100, 0)],
        RolloutKind::Gradual => vec![phase(1, 25, 0), phase(2, 50, 3), phase(3, 100, 7)],
        RolloutKind::Segmented => vec![
            phase(1, 20, 0),
            phase(2, 40, 4),
            phase(3, 70, 9),
            phase(4, 100, 14),
        ],
    }
}

pub fn implementation_plan(
    decision: SelectionDecision,
    confidence: f64,
    risk: RiskLevel,
    config: &ExperimentConfig,
    criteria: &SelectionCriteria,
    t: &SelectionThresholds,
) -> ImplementationPlan {
    let (action, rollout) = match decision {
        SelectionDecision::SelectWinner if risk == RiskLevel::High => {
            (ImplementationAction::ImplementGradually, Some(RolloutKind::Segmented))
        }
        SelectionDecision::SelectWinner
            if confidence > t.immediate_confidence && risk == RiskLevel::Low =>
        {
            (ImplementationAction::ImplementImmediately, Some(RolloutKind::Immediate))
        }
        SelectionDecision::SelectWinner => {
            (ImplementationAction::ImplementWithMonitoring, Some(RolloutKind::Gradual))
        }
        SelectionDecision::ContinueTest => (ImplementationAction::ContinueTesting, None),
        SelectionDecision::DeclareInconclusive | SelectionDecision::AbortTest => {
            (ImplementationAction::NoAction, None)
        }
    };

    let Some(kind) = rollout else {
        return ImplementationPlan {
            action,
            rollout: None,
            phases: Vec::new(),
            monitoring: None,
            rollback_triggers: Vec::new(),
        };
    };

    let mut metrics = vec![config.primary_metric];
    for metric in &config.secondary_metrics {
        if !metrics.contains(metric) {
            metrics.push(*metric);
        }
    }

    ImplementationPlan {
        action,
        rollout: Some(kind),
        phases: rollout_phases(kind),
        monitoring: Some(MonitoringPlan {
            metrics,
            check_interval_hours: t.check_interval_hours,
            duration_days: t.monitoring_days,
            variance_threshold: t.variance_threshold,
        }),
        rollback_triggers: vec![
            format!(
                "{} more than {:.0}% below projection",
                config.primary_metric.as_str(),
                t.variance_threshold * 200.0
            ),
            format!(
                "spend per impression up more than {:.0}%",
                criteria.max_budget_increase * 100.0
            ),
            "any CRITICAL monitoring alert".to_string(),
        ],
    }
}
