//! Persistence collaborator
//!
//! The store is the single durable source of truth. Snapshots and creatives
//! are written by ingestion; the engine writes verdicts, experiments,
//! selection results, rotation schedules and platform intents.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::creative::{Creative, CreativeStatus, MetricSnapshot};
use crate::model::experiment::Experiment;
use crate::model::fatigue::FatigueVerdict;
use crate::model::intent::PlatformIntent;
use crate::model::rotation::RotationSchedule;
use crate::model::selection::{ImplementationStatus, SelectionResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("record does not exist: {0}")]
    Missing(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, ref msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Read/write interface the engine depends on
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn get_creative(&self, id: &str) -> Result<Option<Creative>, StoreError>;

    async fn creatives_in_ad_group(&self, ad_group_id: &str) -> Result<Vec<Creative>, StoreError>;

    async fn creatives_in_campaign(&self, campaign_id: &str) -> Result<Vec<Creative>, StoreError>;

    /// Ingestion-side write; also used to seed tests
    async fn upsert_creative(&self, creative: &Creative) -> Result<(), StoreError>;

    /// The only creative field the engine writes back
    async fn set_creative_status(&self, id: &str, status: CreativeStatus)
        -> Result<(), StoreError>;

    /// Snapshots with `start <= date <= end`, ordered by date
    async fn snapshots(
        &self,
        creative_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricSnapshot>, StoreError>;

    /// Ingestion-side write, keyed by (creative_id, date)
    async fn record_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError>;

    /// Upsert keyed by (creative_id, analysis_date)
    async fn upsert_fatigue_verdict(&self, verdict: &FatigueVerdict) -> Result<(), StoreError>;

    /// Verdicts with `analysis_date >= since`, oldest first
    async fn fatigue_verdicts(
        &self,
        creative_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<FatigueVerdict>, StoreError>;

    /// Fails with `Conflict` when the id already exists
    async fn insert_experiment(&self, experiment: &Experiment) -> Result<(), StoreError>;

    /// Fails with `Missing` when the id does not exist
    async fn update_experiment(&self, experiment: &Experiment) -> Result<(), StoreError>;

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, StoreError>;

    async fn list_experiments(
        &self,
        ad_group_id: Option<&str>,
    ) -> Result<Vec<Experiment>, StoreError>;

    /// Fails with `Conflict` when the id already exists
    async fn insert_selection(&self, result: &SelectionResult) -> Result<(), StoreError>;

    async fn get_selection(&self, id: Uuid) -> Result<Option<SelectionResult>, StoreError>;

    async fn selections_for_experiment(
        &self,
        experiment_id: Uuid,
    ) -> Result<Vec<SelectionResult>, StoreError>;

    async fn set_implementation_status(
        &self,
        id: Uuid,
        status: ImplementationStatus,
    ) -> Result<(), StoreError>;

    /// Upsert keyed by ad_group_id
    async fn upsert_rotation_schedule(&self, schedule: &RotationSchedule)
        -> Result<(), StoreError>;

    async fn get_rotation_schedule(
        &self,
        ad_group_id: &str,
    ) -> Result<Option<RotationSchedule>, StoreError>;

    /// Append-only
    async fn append_intent(&self, intent: &PlatformIntent) -> Result<(), StoreError>;

    async fn list_intents(&self) -> Result<Vec<PlatformIntent>, StoreError>;
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
