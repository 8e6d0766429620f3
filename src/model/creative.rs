use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Creative is one advertising unit inside an ad group
///
/// Created by the ingestion side; this engine only writes back `status`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Creative {
    pub id: String,

    #[serde(rename = "adGroupId")]
    pub ad_group_id: String,

    #[serde(rename = "campaignId")]
    pub campaign_id: String,

    #[serde(rename = "type")]
    pub creative_type: CreativeType,

    pub status: CreativeStatus,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub content: CreativeContent,
}

impl Creative {
    /// Age in whole days at `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_days().max(0)
    }

    pub fn is_active(&self) -> bool {
        self.status == CreativeStatus::Enabled
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreativeType {
    Text,
    Responsive,
    Image,
    Video,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreativeStatus {
    Enabled,
    Paused,
    Removed,
}

impl CreativeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreativeStatus::Enabled => "ENABLED",
            CreativeStatus::Paused => "PAUSED",
            CreativeStatus::Removed => "REMOVED",
        }
    }
}

/// Content payload of a creative
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CreativeContent {
    #[serde(default)]
    pub headlines: Vec<String>,

    #[serde(default)]
    pub descriptions: Vec<String>,

    #[serde(rename = "mediaRefs", default)]
    pub media_refs: Vec<String>,

    #[serde(rename = "finalUrl", skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
}

impl CreativeContent {
    /// Lowercased alphanumeric tokens across all text fields
    pub fn tokens(&self) -> std::collections::BTreeSet<String> {
        let mut text: Vec<&str> = Vec::new();
        text.extend(self.headlines.iter().map(String::as_str));
        text.extend(self.descriptions.iter().map(String::as_str));
        text.extend(self.media_refs.iter().map(String::as_str));
        if let Some(url) = &self.final_url {
            text.push(url);
        }

        text.iter()
            .flat_map(|t| t.split(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

/// One (creative, day) performance observation
///
/// Immutable once recorded. Rates are derived on read, never stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MetricSnapshot {
    #[serde(rename = "creativeId")]
    pub creative_id: String,

    pub date: NaiveDate,

    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
    pub revenue: f64,

    /// Unique users reached, when the platform reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reach: Option<u64>,

    /// Platform quality score (1-10)
    #[serde(rename = "qualityScore", skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl MetricSnapshot {
    /// Zeroed snapshot for a day without a metric row
    pub fn empty(creative_id: &str, date: NaiveDate) -> Self {
        MetricSnapshot {
            creative_id: creative_id.to_string(),
            date,
            impressions: 0,
            clicks: 0,
            conversions: 0,
            cost: 0.0,
            revenue: 0.0,
            reach: None,
            quality_score: None,
        }
    }
}

/// Summed counts over any set of snapshots, with derived rates
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MetricTotals {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
    pub revenue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reach: Option<u64>,
    /// Impressions from the days that reported reach
    #[serde(default)]
    pub reached_impressions: u64,
}

impl MetricTotals {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a MetricSnapshot>) -> Self {
        let mut totals = MetricTotals::default();
        for s in snapshots {
            totals.impressions += s.impressions;
            totals.clicks += s.clicks;
            totals.conversions += s.conversions;
            totals.cost += s.cost;
            totals.revenue += s.revenue;
            if let Some(reach) = s.reach {
                totals.reach = Some(totals.reach.unwrap_or(0) + reach);
                totals.reached_impressions += s.impressions;
            }
        }
        totals
    }

    pub fn ctr(&self) -> f64 {
        ratio(self.clicks as f64, self.impressions as f64)
    }

    pub fn cvr(&self) -> f64 {
        ratio(self.conversions as f64, self.clicks as f64)
    }

    pub fn cpa(&self) -> f64 {
        ratio(self.cost, self.conversions as f64)
    }

    pub fn cpc(&self) -> f64 {
        ratio(self.cost, self.clicks as f64)
    }

    pub fn roas(&self) -> f64 {
        ratio(self.revenue, self.cost)
    }

    /// Cost per thousand impressions
    pub fn cpm(&self) -> f64 {
        ratio(self.cost * 1000.0, self.impressions as f64)
    }

    /// Average impressions per reached user, None without reach data
    pub fn frequency(&self) -> Option<f64> {
        match self.reach {
            Some(reach) if reach > 0 => Some(self.reached_impressions as f64 / reach as f64),
            _ => None,
        }
    }
}

/// Division that yields 0.0 instead of NaN/inf for an empty denominator
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
