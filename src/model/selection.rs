use super::experiment::{ExperimentAnalysis, ExperimentMetric, VariantRole};
use super::fatigue::FatigueSeverity;
use super::rotation::RiskLevel;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

/// Statistical and business gates for picking a winner
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionCriteria {
    /// Required 1 - p for the primary metric
    pub min_confidence: f64,
    pub min_sample_size: u64,
    pub min_duration_days: u32,
    pub min_practical_significance: f64,
    /// Largest tolerated relative decline on any secondary metric
    pub max_secondary_decline: f64,
    /// Largest tolerated relative increase of spend per impression
    pub max_budget_increase: f64,
    /// Floor for the winning arm's ROAS when it has revenue data
    pub min_roas: f64,
    pub risk_tolerance: RiskTolerance,
    /// Winner's latest quality score must be at least this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_quality_score: Option<f64>,
    /// Winner's latest fatigue verdict must not exceed this
    pub max_fatigue_severity: FatigueSeverity,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        SelectionCriteria {
            min_confidence: 0.95,
            min_sample_size: 1000,
            min_duration_days: 7,
            min_practical_significance: 0.05,
            max_secondary_decline: 0.05,
            max_budget_increase: 0.20,
            min_roas: 1.0,
            risk_tolerance: RiskTolerance::Moderate,
            min_quality_score: None,
            max_fatigue_severity: FatigueSeverity::Moderate,
        }
    }
}

/// External context that can raise selection risk
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketContext {
    /// A competitor launched or changed campaigns during the test
    pub competitive_activity: bool,
    /// The test window overlapped a seasonal event
    pub seasonal_event: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionDecision {
    SelectWinner,
    ContinueTest,
    DeclareInconclusive,
    AbortTest,
}

impl SelectionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionDecision::SelectWinner => "SELECT_WINNER",
            SelectionDecision::ContinueTest => "CONTINUE_TEST",
            SelectionDecision::DeclareInconclusive => "DECLARE_INCONCLUSIVE",
            SelectionDecision::AbortTest => "ABORT_TEST",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    Control,
    Test,
    Neither,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::Control => "CONTROL",
            Winner::Test => "TEST",
            Winner::Neither => "NEITHER",
        }
    }
}

impl From<VariantRole> for Winner {
    fn from(role: VariantRole) -> Self {
        match role {
            VariantRole::Control => Winner::Control,
            VariantRole::Test => Winner::Test,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalValidation {
    pub primary_metric_valid: bool,
    pub sample_size_adequate: bool,
    pub duration_adequate: bool,
    pub confidence_met: bool,
    pub passed: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BusinessValidation {
    pub practically_significant: bool,
    pub secondary_within_tolerance: bool,
    pub budget_within_limit: bool,
    pub roi_within_bounds: bool,
    pub quality_gate_passed: bool,
    pub passed: bool,
    pub notes: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub risks: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceProjection {
    /// Primary-metric improvement, positive means test is better
    pub expected_lift: f64,
    pub current_revenue: f64,
    pub current_cost: f64,
    pub current_conversions: u64,
    pub projected_revenue: f64,
    pub projected_cost: f64,
    pub projected_conversions: f64,
    pub confidence_interval: (f64, f64),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImplementationAction {
    ImplementImmediately,
    ImplementWithMonitoring,
    ImplementGradually,
    ContinueTesting,
    NoAction,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutKind {
    Immediate,
    Gradual,
    Segmented,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPhase {
    pub phase: u32,
    pub traffic_percent: u32,
    /// Days after implementation start
    pub start_day: u32,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringPlan {
    pub metrics: Vec<ExperimentMetric>,
    pub check_interval_hours: u32,
    pub duration_days: u32,
    pub variance_threshold: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationPlan {
    pub action: ImplementationAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutKind>,
    pub phases: Vec<RolloutPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringPlan>,
    pub rollback_triggers: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImplementationStatus {
    #[default]
    Pending,
    InProgress,
    Adjusting,
    RollbackRecommended,
    Completed,
    NotApplicable,
}

impl ImplementationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImplementationStatus::Pending => "PENDING",
            ImplementationStatus::InProgress => "IN_PROGRESS",
            ImplementationStatus::Adjusting => "ADJUSTING",
            ImplementationStatus::RollbackRecommended => "ROLLBACK_RECOMMENDED",
            ImplementationStatus::Completed => "COMPLETED",
            ImplementationStatus::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

/// One winner-selection decision
///
/// Immutable after creation except for `implementation_status`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub analysis: ExperimentAnalysis,
    pub criteria: SelectionCriteria,
    pub decision: SelectionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    /// 0.1 to 1.0
    pub confidence: f64,
    pub statistical: StatisticalValidation,
    pub business: BusinessValidation,
    pub risk: RiskAssessment,
    pub projection: PerformanceProjection,
    pub implementation: ImplementationPlan,
    pub implementation_status: ImplementationStatus,
}

impl SelectionResult {
    /// Creative that won, when a winner was selected
    pub fn winning_creative(&self) -> Option<&str> {
        match self.winner {
            Some(Winner::Control) => Some(self.analysis.control.creative_id.as_str()),
            Some(Winner::Test) => Some(self.analysis.test.creative_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringAlert {
    pub metric: ExperimentMetric,
    pub level: AlertLevel,
    pub projected_value: f64,
    pub live_value: f64,
    /// Relative shortfall against the projection
    pub variance: f64,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitoringRecommendation {
    Continue,
    Adjust,
    Rollback,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringReport {
    pub selection_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub days_since_implementation: u32,
    pub alerts: Vec<MonitoringAlert>,
    pub recommendation: MonitoringRecommendation,
    pub implementation_status: ImplementationStatus,
    pub notes: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSelectionReport {
    pub requested: usize,
    pub evaluated: usize,
    pub decision_counts: std::collections::BTreeMap<String, usize>,
    pub results: Vec<SelectionResult>,
    pub failures: Vec<super::fatigue::BatchFailure>,
}
