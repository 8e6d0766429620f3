use super::creative::CreativeContent;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metric an experiment is judged on
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentMetric {
    Ctr,
    Cvr,
    Cpa,
    Cpc,
    Roas,
}

impl ExperimentMetric {
    /// Which direction counts as an improvement
    pub fn direction(&self) -> MetricDirection {
        match self {
            ExperimentMetric::Ctr | ExperimentMetric::Cvr | ExperimentMetric::Roas => {
                MetricDirection::Higher
            }
            ExperimentMetric::Cpa | ExperimentMetric::Cpc => MetricDirection::Lower,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentMetric::Ctr => "CTR",
            ExperimentMetric::Cvr => "CVR",
            ExperimentMetric::Cpa => "CPA",
            ExperimentMetric::Cpc => "CPC",
            ExperimentMetric::Roas => "ROAS",
        }
    }
}

/// Direction for metric comparison
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MetricDirection {
    /// Test should have a lower value (e.g., CPA)
    Lower,
    /// Test should have a higher value (e.g., CTR)
    Higher,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatisticalMethod {
    #[default]
    Frequentist,
    Bayesian,
    Sequential,
}

/// Validated parameters for a controlled test
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentConfig {
    /// Control traffic percentage; control + test must equal 100
    pub control_traffic_percent: u32,
    pub test_traffic_percent: u32,

    pub method: StatisticalMethod,
    pub primary_metric: ExperimentMetric,
    pub secondary_metrics: Vec<ExperimentMetric>,

    pub min_duration_days: u32,
    pub max_duration_days: u32,

    /// Per-arm floor applied on top of the power calculation
    pub min_sample_size: u64,

    pub target_power: f64,
    pub significance_level: f64,

    /// Relative effect the test is powered to detect (0.10 = 10%)
    pub min_detectable_effect: f64,

    /// Relative effect that matters to the business
    pub min_practical_significance: f64,

    /// Assumed baseline rate of the primary metric for sample planning
    pub baseline_rate: f64,

    pub early_stopping_enabled: bool,
    pub futility_enabled: bool,

    /// Guardrail: largest tolerated relative decline of the primary metric
    pub max_negative_impact: f64,

    /// Guardrail: largest tolerated relative increase in spend per impression
    ///
    /// Compared per impression so an uneven traffic split does not read as
    /// a spend change.
    pub max_spend_increase: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            control_traffic_percent: 50,
            test_traffic_percent: 50,
            method: StatisticalMethod::Frequentist,
            primary_metric: ExperimentMetric::Ctr,
            secondary_metrics: vec![ExperimentMetric::Cvr],
            min_duration_days: 7,
            max_duration_days: 30,
            min_sample_size: 1000,
            target_power: 0.8,
            significance_level: 0.05,
            min_detectable_effect: 0.10,
            min_practical_significance: 0.05,
            baseline_rate: 0.02,
            early_stopping_enabled: true,
            futility_enabled: true,
            max_negative_impact: 0.10,
            max_spend_increase: 0.20,
        }
    }
}

/// Lifecycle of an experiment
///
/// PLANNING -> READY -> RUNNING -> {PAUSED, COMPLETED, CANCELLED};
/// RUNNING <-> PAUSED; COMPLETED and CANCELLED are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    #[default]
    Planning,
    Ready,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Planning, Ready)
                | (Ready, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Planning, Cancelled)
                | (Ready, Cancelled)
                | (Running, Cancelled)
                | (Paused, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Cancelled)
    }

    /// Whether the experiment has collected (or is collecting) traffic
    pub fn has_started(&self) -> bool {
        matches!(
            self,
            ExperimentStatus::Running | ExperimentStatus::Paused | ExperimentStatus::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Planning => "PLANNING",
            ExperimentStatus::Ready => "READY",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Paused => "PAUSED",
            ExperimentStatus::Completed => "COMPLETED",
            ExperimentStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Success,
    Failure,
    Inconclusive,
    Manual,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Success => "SUCCESS",
            StopReason::Failure => "FAILURE",
            StopReason::Inconclusive => "INCONCLUSIVE",
            StopReason::Manual => "MANUAL",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub from: ExperimentStatus,
    pub to: ExperimentStatus,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantRole {
    Control,
    Test,
}

/// One arm of an experiment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: Uuid,
    pub role: VariantRole,
    pub creative_id: String,
    pub content: CreativeContent,
    pub active: bool,
}

/// Caller-supplied arm definition for `create`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantSpec {
    pub creative_id: String,
    /// Defaults to the creative's stored content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<CreativeContent>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateExperimentRequest {
    pub name: String,
    pub ad_group_id: String,
    pub control: VariantSpec,
    pub test: VariantSpec,
    #[serde(default)]
    pub config: ExperimentConfig,
}

/// A controlled test between two variants
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub ad_group_id: String,
    pub config: ExperimentConfig,
    pub control: Variant,
    pub test: Variant,
    pub status: ExperimentStatus,
    /// Per-arm sample size from the power calculation
    pub required_sample_size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<VariantRole>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    /// Latest analysis, cached for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_analysis: Option<ExperimentAnalysis>,
}

impl Experiment {
    pub fn variant(&self, role: VariantRole) -> &Variant {
        match role {
            VariantRole::Control => &self.control,
            VariantRole::Test => &self.test,
        }
    }
}

/// Per-arm totals since the experiment started
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArmSummary {
    pub creative_id: String,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub revenue: f64,
    pub spend: f64,
}

/// Comparison of one metric between the arms
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub metric: ExperimentMetric,
    pub control_value: f64,
    pub test_value: f64,
    /// (test - control) / control
    pub relative_change: f64,
    pub absolute_change: f64,
    pub p_value: f64,
    /// Interval for the absolute change
    pub confidence_interval: (f64, f64),
    pub statistically_significant: bool,
    pub practically_significant: bool,
}

impl MetricResult {
    /// Relative change oriented so positive means test is better
    pub fn improvement(&self) -> f64 {
        match self.metric.direction() {
            MetricDirection::Higher => self.relative_change,
            MetricDirection::Lower => -self.relative_change,
        }
    }

    /// Arm whose value is better for this metric, None on a tie
    pub fn better_arm(&self) -> Option<VariantRole> {
        let improvement = self.improvement();
        if improvement > 0.0 {
            Some(VariantRole::Test)
        } else if improvement < 0.0 {
            Some(VariantRole::Control)
        } else {
            None
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BayesianSummary {
    pub probability_test_better: f64,
    pub expected_loss_control: f64,
    pub expected_loss_test: f64,
    /// Credible interval for the absolute difference
    pub credible_interval: (f64, f64),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PowerProjection {
    pub required_sample_size: u64,
    /// Smaller of the two arms' sample sizes for the primary metric
    pub current_sample_size: u64,
    /// current / required, capped at 1.0
    pub progress: f64,
    pub achieved_power: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_days_remaining: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestDecision {
    StopSuccess,
    Continue,
    IncreaseSample,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestRecommendation {
    pub decision: TestDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<VariantRole>,
    pub rationale: String,
}

/// Point-in-time statistical read of an experiment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentAnalysis {
    pub experiment_id: Uuid,
    pub analyzed_at: DateTime<Utc>,
    pub method: StatisticalMethod,
    pub days_running: u32,
    pub control: ArmSummary,
    pub test: ArmSummary,
    pub primary: MetricResult,
    #[serde(default)]
    pub secondary: Vec<MetricResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bayesian: Option<BayesianSummary>,
    pub power: PowerProjection,
    pub recommendation: TestRecommendation,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EarlyStopTrigger {
    Success,
    Futility,
    GuardrailViolation,
    MaxDurationReached,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EarlyStoppingDecision {
    pub should_stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<EarlyStopTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub details: Vec<String>,
    pub analysis: ExperimentAnalysis,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExperimentStatus::*;

    #[test]
    fn test_running_requires_ready() {
        assert!(!Planning.can_transition_to(Running));
        assert!(Ready.can_transition_to(Running));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for next in [Planning, Ready, Running, Paused, Completed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_pause_resume_cycle() {
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Completed));
    }

    #[test]
    fn test_improvement_respects_direction() {
        let result = MetricResult {
            metric: ExperimentMetric::Cpa,
            control_value: 10.0,
            test_value: 8.0,
            relative_change: -0.2,
            absolute_change: -2.0,
            p_value: 0.01,
            confidence_interval: (-3.0, -1.0),
            statistically_significant: true,
            practically_significant: true,
        };
        assert!((result.improvement() - 0.2).abs() < 1e-9);
        assert_eq!(result.better_arm(), Some(VariantRole::Test));
    }
}
