use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Traffic-allocation policy for an ad group
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationStrategy {
    /// Even split across active creatives
    #[default]
    Even,
    /// Performance-weighted allocation
    Optimize,
    /// Score, trend and freshness blended weights
    Adaptive,
    /// Caller-provided weights
    Manual,
}

impl RotationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStrategy::Even => "EVEN",
            RotationStrategy::Optimize => "OPTIMIZE",
            RotationStrategy::Adaptive => "ADAPTIVE",
            RotationStrategy::Manual => "MANUAL",
        }
    }
}

/// Per-call rotation configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RotationConfig {
    /// Strategy currently configured for the ad group
    pub strategy: RotationStrategy,

    /// Creatives below this impression count are not weighted by score
    pub min_impressions: u64,

    pub max_active_creatives: usize,

    pub rotation_interval_days: u32,

    /// Creatives scoring below this are recommended for pausing
    pub performance_threshold: f64,

    /// Creatives younger than this get a freshness bonus
    pub learning_period_days: u32,

    pub confidence_level: f64,

    /// Weights for the MANUAL strategy, keyed by creative id
    pub manual_weights: BTreeMap<String, f64>,

    /// Window used for the performance picture
    pub lookback_days: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            strategy: RotationStrategy::Even,
            min_impressions: 1000,
            max_active_creatives: 5,
            rotation_interval_days: 7,
            performance_threshold: 40.0,
            learning_period_days: 7,
            confidence_level: 0.95,
            manual_weights: BTreeMap::new(),
            lookback_days: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    pub strategy: RotationStrategy,
    pub active_creatives: usize,
    /// Current weights, from the stored schedule or an even split
    pub weights: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationOpportunity {
    pub recommended_strategy: RotationStrategy,
    /// Estimated relative lift in group score, percent
    pub estimated_improvement: f64,
    pub description: String,
}

/// Current rotation picture for an ad group
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationAnalysis {
    pub ad_group_id: String,
    pub current: RotationState,
    pub scores: BTreeMap<String, f64>,
    pub performance_gap: f64,
    pub stability_index: f64,
    pub strategy_effectiveness: f64,
    pub risk_level: RiskLevel,
    pub opportunity: OptimizationOpportunity,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub creative_id: String,
    /// Normalized weight, all entries sum to 1.0
    pub weight: f64,
    /// Integer traffic percentage, all entries sum to 100
    pub traffic_percent: u32,
}

/// Weighted rotation schedule, persisted per ad group
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationSchedule {
    pub ad_group_id: String,
    pub strategy: RotationStrategy,
    pub entries: Vec<ScheduleEntry>,
    pub effective_from: DateTime<Utc>,
    pub next_review: DateTime<Utc>,
}

impl RotationSchedule {
    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|e| (e.creative_id.clone(), e.weight))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationActionKind {
    PauseCreative,
    CreateVariant,
    ShiftTraffic,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationAction {
    pub kind: RotationActionKind,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creative_id: Option<String>,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationRecommendation {
    pub analysis: RotationAnalysis,
    pub strategy: RotationStrategy,
    pub schedule: RotationSchedule,
    pub actions: Vec<RotationAction>,
    pub rationale: String,
}
