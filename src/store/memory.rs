use super::{MetricsStore, StoreError};
use crate::model::creative::{Creative, CreativeStatus, MetricSnapshot};
use crate::model::experiment::Experiment;
use crate::model::fatigue::FatigueVerdict;
use crate::model::intent::PlatformIntent;
use crate::model::rotation::RotationSchedule;
use crate::model::selection::{ImplementationStatus, SelectionResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    creatives: BTreeMap<String, Creative>,
    snapshots: BTreeMap<(String, NaiveDate), MetricSnapshot>,
    verdicts: BTreeMap<(String, NaiveDate), FatigueVerdict>,
    experiments: HashMap<Uuid, Experiment>,
    selections: HashMap<Uuid, SelectionResult>,
    schedules: HashMap<String, RotationSchedule>,
    intents: Vec<PlatformIntent>,
}

/// In-process store with the same key semantics as the SQLite schema
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn get_creative(&self, id: &str) -> Result<Option<Creative>, StoreError> {
        Ok(self.tables.read().await.creatives.get(id).cloned())
    }

    async fn creatives_in_ad_group(&self, ad_group_id: &str) -> Result<Vec<Creative>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .creatives
            .values()
            .filter(|c| c.ad_group_id == ad_group_id)
            .cloned()
            .collect())
    }

    async fn creatives_in_campaign(&self, campaign_id: &str) -> Result<Vec<Creative>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .creatives
            .values()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn upsert_creative(&self, creative: &Creative) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .creatives
            .insert(creative.id.clone(), creative.clone());
        Ok(())
    }

    async fn set_creative_status(
        &self,
        id: &str,
        status: CreativeStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let creative = tables
            .creatives
            .get_mut(id)
            .ok_or_else(|| StoreError::Missing(format!("creative {}", id)))?;
        creative.status = status;
        Ok(())
    }

    async fn snapshots(
        &self,
        creative_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        let from = (creative_id.to_string(), start);
        let to = (creative_id.to_string(), end);
        Ok(tables
            .snapshots
            .range(from..=to)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn record_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        self.tables.write().await.snapshots.insert(
            (snapshot.creative_id.clone(), snapshot.date),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn upsert_fatigue_verdict(&self, verdict: &FatigueVerdict) -> Result<(), StoreError> {
        self.tables.write().await.verdicts.insert(
            (verdict.creative_id.clone(), verdict.analysis_date),
            verdict.clone(),
        );
        Ok(())
    }

    async fn fatigue_verdicts(
        &self,
        creative_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<FatigueVerdict>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .verdicts
            .range((creative_id.to_string(), since)..)
            .take_while(|((id, _), _)| id == creative_id)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn insert_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.experiments.contains_key(&experiment.id) {
            return Err(StoreError::Conflict(format!("experiment {}", experiment.id)));
        }
        tables.experiments.insert(experiment.id, experiment.clone());
        Ok(())
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.experiments.get_mut(&experiment.id) {
            Some(existing) => {
                *existing = experiment.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(format!("experiment {}", experiment.id))),
        }
    }

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, StoreError> {
        Ok(self.tables.read().await.experiments.get(&id).cloned())
    }

    async fn list_experiments(
        &self,
        ad_group_id: Option<&str>,
    ) -> Result<Vec<Experiment>, StoreError> {
        let tables = self.tables.read().await;
        let mut experiments: Vec<Experiment> = tables
            .experiments
            .values()
            .filter(|e| ad_group_id.is_none_or(|g| e.ad_group_id == g))
            .cloned()
            .collect();
        experiments.sort_by_key(|e| e.created_at);
        Ok(experiments)
    }

    async fn insert_selection(&self, result: &SelectionResult) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.selections.contains_key(&result.id) {
            return Err(StoreError::Conflict(format!("selection {}", result.id)));
        }
        tables.selections.insert(result.id, result.clone());
        Ok(())
    }

    async fn get_selection(&self, id: Uuid) -> Result<Option<SelectionResult>, StoreError> {
        Ok(self.tables.read().await.selections.get(&id).cloned())
    }

    async fn selections_for_experiment(
        &self,
        experiment_id: Uuid,
    ) -> Result<Vec<SelectionResult>, StoreError> {
        let tables = self.tables.read().await;
        let mut results: Vec<SelectionResult> = tables
            .selections
            .values()
            .filter(|s| s.experiment_id == experiment_id)
            .cloned()
            .collect();
        results.sort_by_key(|s| s.created_at);
        Ok(results)
    }

    async fn set_implementation_status(
        &self,
        id: Uuid,
        status: ImplementationStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let result = tables
            .selections
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("selection {}", id)))?;
        result.implementation_status = status;
        Ok(())
    }

    async fn upsert_rotation_schedule(
        &self,
        schedule: &RotationSchedule,
    ) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .schedules
            .insert(schedule.ad_group_id.clone(), schedule.clone());
        Ok(())
    }

    async fn get_rotation_schedule(
        &self,
        ad_group_id: &str,
    ) -> Result<Option<RotationSchedule>, StoreError> {
        Ok(self.tables.read().await.schedules.get(ad_group_id).cloned())
    }

    async fn append_intent(&self, intent: &PlatformIntent) -> Result<(), StoreError> {
        self.tables.write().await.intents.push(intent.clone());
        Ok(())
    }

    async fn list_intents(&self) -> Result<Vec<PlatformIntent>, StoreError> {
        Ok(self.tables.read().await.intents.clone())
    }
}
