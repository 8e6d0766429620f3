use super::creative::{CreativeStatus, MetricTotals};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Direction of a metric over the lookback window
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
    Volatile,
}

/// Trend classification for one metric
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricTrend {
    pub direction: TrendDirection,
    /// Relative change of the recent half against the early half
    pub change: f64,
    /// 0.0 to 1.0, grows with sample volume
    pub confidence: f64,
}

impl MetricTrend {
    /// Neutral trend used when there is not enough data
    pub fn neutral() -> Self {
        MetricTrend {
            direction: TrendDirection::Stable,
            change: 0.0,
            confidence: 0.0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendSummary {
    pub ctr: MetricTrend,
    pub cvr: MetricTrend,
    pub volume: MetricTrend,
}

impl TrendSummary {
    pub fn neutral() -> Self {
        TrendSummary {
            ctr: MetricTrend::neutral(),
            cvr: MetricTrend::neutral(),
            volume: MetricTrend::neutral(),
        }
    }
}

/// Aggregated view of a creative over a lookback window
///
/// Recomputed on every call; snapshots stay the source of truth.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceProfile {
    pub creative_id: String,
    pub ad_group_id: String,
    pub status: CreativeStatus,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub days_with_data: usize,
    pub totals: MetricTotals,
    pub ctr: f64,
    pub cvr: f64,
    pub cpa: f64,
    pub roas: f64,
    pub trends: TrendSummary,
    /// 0 to 100
    pub score: f64,
    /// Dense rank within the ad group, None when below the impressions floor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Poor,
    Fair,
    Good,
    Excellent,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdGroupHealth {
    pub score: f64,
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

/// Three-tier recommendation list
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TieredRecommendations {
    pub immediate: Vec<String>,
    pub short_term: Vec<String>,
    pub strategic: Vec<String>,
}

/// Ad-group level analysis result
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdGroupPerformance {
    pub ad_group_id: String,
    pub lookback_days: u32,
    pub creative_count: usize,
    pub active_count: usize,
    /// All profiles, ranked ones first in rank order
    pub profiles: Vec<PerformanceProfile>,
    pub top_performers: Vec<String>,
    pub poor_performers: Vec<String>,
    /// Creatives below the impressions floor
    pub unranked: Vec<String>,
    pub health: AdGroupHealth,
    pub recommendations: TieredRecommendations,
}

impl AdGroupPerformance {
    pub fn profile(&self, creative_id: &str) -> Option<&PerformanceProfile> {
        self.profiles.iter().find(|p| p.creative_id == creative_id)
    }
}
