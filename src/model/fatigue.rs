use super::creative::MetricTotals;
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Closed set of fatigue signal kinds
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FatigueSignalType {
    CtrDecline,
    CvrDecline,
    FrequencyIncrease,
    CpcIncrease,
    CreativeStaleness,
    QualityScoreDecline,
}

impl FatigueSignalType {
    pub const ALL: [FatigueSignalType; 6] = [
        FatigueSignalType::CtrDecline,
        FatigueSignalType::CvrDecline,
        FatigueSignalType::FrequencyIncrease,
        FatigueSignalType::CpcIncrease,
        FatigueSignalType::CreativeStaleness,
        FatigueSignalType::QualityScoreDecline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FatigueSignalType::CtrDecline => "CTR_DECLINE",
            FatigueSignalType::CvrDecline => "CVR_DECLINE",
            FatigueSignalType::FrequencyIncrease => "FREQUENCY_INCREASE",
            FatigueSignalType::CpcIncrease => "CPC_INCREASE",
            FatigueSignalType::CreativeStaleness => "CREATIVE_STALENESS",
            FatigueSignalType::QualityScoreDecline => "QUALITY_SCORE_DECLINE",
        }
    }
}

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FatigueSeverity {
    #[default]
    None,
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl FatigueSeverity {
    /// Points used by the verdict aggregation
    pub fn points(&self) -> f64 {
        match self {
            FatigueSeverity::None => 0.0,
            FatigueSeverity::Mild => 25.0,
            FatigueSeverity::Moderate => 50.0,
            FatigueSeverity::Severe => 75.0,
            FatigueSeverity::Critical => 100.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FatigueSeverity::None => "NONE",
            FatigueSeverity::Mild => "MILD",
            FatigueSeverity::Moderate => "MODERATE",
            FatigueSeverity::Severe => "SEVERE",
            FatigueSeverity::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NONE" => Some(FatigueSeverity::None),
            "MILD" => Some(FatigueSeverity::Mild),
            "MODERATE" => Some(FatigueSeverity::Moderate),
            "SEVERE" => Some(FatigueSeverity::Severe),
            "CRITICAL" => Some(FatigueSeverity::Critical),
            _ => None,
        }
    }
}

/// One detected anomaly
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FatigueSignal {
    pub signal_type: FatigueSignalType,
    pub severity: FatigueSeverity,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub baseline_value: f64,
    pub recent_value: f64,
    /// Relative change of recent against baseline (negative = decline)
    pub delta: f64,
    /// z-score for tested signals, magnitude ratio otherwise
    pub score: f64,
    pub recommendation: String,
}

/// What to do about a signal
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationAction {
    PauseCreative,
    RefreshCreative,
    LaunchVariantTest,
    ExpandAudience,
    ReviewBidding,
    ReviewLandingPage,
    Monitor,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPriority {
    Immediate,
    High,
    Medium,
    Low,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemediationStep {
    pub action: RemediationAction,
    pub priority: ActionPriority,
    pub source: FatigueSignalType,
    pub description: String,
}

/// Recent vs baseline window aggregates used by the detectors
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FatigueWindows {
    pub recent_start: NaiveDate,
    pub recent_end: NaiveDate,
    pub baseline_start: NaiveDate,
    pub baseline_end: NaiveDate,
    pub recent: MetricTotals,
    pub baseline: MetricTotals,
    pub creative_age_days: i64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoricalTrend {
    Worsening,
    Stable,
    Improving,
    FirstAnalysis,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalComparison {
    pub prior_verdicts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_severity: Option<FatigueSeverity>,
    pub score_delta: f64,
    pub trend: HistoricalTrend,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifespanProjection {
    pub days_remaining: u32,
    pub refresh_by: NaiveDate,
    pub severe_signal_count: usize,
}

/// Aggregated fatigue read for one creative on one day
///
/// Persisted with natural key (creative_id, analysis_date).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FatigueVerdict {
    pub creative_id: String,
    pub ad_group_id: String,
    pub analysis_date: NaiveDate,
    pub analyzed_at: DateTime<Utc>,
    pub severity: FatigueSeverity,
    /// 0 to 100
    pub score: f64,
    pub signals: Vec<FatigueSignal>,
    pub windows: FatigueWindows,
    pub history: HistoricalComparison,
    pub lifespan: LifespanProjection,
    pub actions: Vec<RemediationStep>,
}

impl FatigueVerdict {
    pub fn is_fatigued(&self) -> bool {
        self.severity >= FatigueSeverity::Moderate
    }
}

/// Result of a batch fatigue scan
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchFatigueReport {
    pub requested: usize,
    pub analyzed: usize,
    pub fatigued: usize,
    /// fatigued / analyzed
    pub fatigue_rate: f64,
    pub severity_counts: std::collections::BTreeMap<FatigueSeverity, usize>,
    pub action_counts: std::collections::BTreeMap<RemediationAction, usize>,
    pub verdicts: Vec<FatigueVerdict>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}
