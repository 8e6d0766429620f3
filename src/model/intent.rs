use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Action an external ad-platform adapter is expected to carry out
///
/// The engine only records intents; it never calls the platform.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentAction {
    ActivateVariants {
        #[serde(rename = "experimentId")]
        experiment_id: Uuid,
        /// Creative id -> traffic percent
        split: BTreeMap<String, u32>,
    },
    ShiftTraffic {
        #[serde(rename = "adGroupId")]
        ad_group_id: String,
        /// Creative id -> normalized weight
        weights: BTreeMap<String, f64>,
    },
    PauseCreative {
        #[serde(rename = "creativeId")]
        creative_id: String,
    },
    RollbackTraffic {
        #[serde(rename = "selectionId")]
        selection_id: Uuid,
        #[serde(rename = "restoreCreativeId")]
        restore_creative_id: String,
    },
}

impl IntentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            IntentAction::ActivateVariants { .. } => "ACTIVATE_VARIANTS",
            IntentAction::ShiftTraffic { .. } => "SHIFT_TRAFFIC",
            IntentAction::PauseCreative { .. } => "PAUSE_CREATIVE",
            IntentAction::RollbackTraffic { .. } => "ROLLBACK_TRAFFIC",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformIntent {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    /// Component that produced the intent
    pub origin: String,
    pub action: IntentAction,
}
