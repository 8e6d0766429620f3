//! Test builders shared by engine, store and server tests

#![allow(clippy::unwrap_used)]

use crate::model::creative::{
    Creative, CreativeContent, CreativeStatus, CreativeType, MetricSnapshot,
};
use crate::config::Thresholds;
use crate::engine::clock::MockClock;
use crate::engine::events::MockEventSink;
use crate::engine::Context;
use crate::model::experiment::Experiment;
use crate::model::fatigue::FatigueVerdict;
use crate::model::intent::PlatformIntent;
use crate::model::rotation::RotationSchedule;
use crate::model::selection::{ImplementationStatus, SelectionResult};
use crate::store::{MemoryStore, MetricsStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Context backed by in-memory collaborators, with handles kept for assertions
pub struct Harness {
    pub ctx: Arc<Context>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<MockClock>,
    pub events: MockEventSink,
}

/// Harness whose clock reads noon UTC on the given date
pub fn harness(year: i32, month: u32, day: u32) -> Harness {
    harness_with(year, month, day, Thresholds::default())
}

pub fn harness_with(year: i32, month: u32, day: u32, thresholds: Thresholds) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(MockClock::at_date(year, month, day));
    let events = MockEventSink::new();
    let ctx = Arc::new(Context::new(
        store.clone(),
        Arc::new(events.clone()),
        clock.clone(),
        thresholds,
        None,
    ));
    Harness {
        ctx,
        store,
        clock,
        events,
    }
}

pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn creative(id: &str, ad_group_id: &str, created_at: DateTime<Utc>) -> Creative {
    Creative {
        id: id.to_string(),
        ad_group_id: ad_group_id.to_string(),
        campaign_id: "camp-1".to_string(),
        creative_type: CreativeType::Responsive,
        status: CreativeStatus::Enabled,
        created_at,
        updated_at: created_at,
        content: CreativeContent {
            headlines: vec![format!("{} headline", id)],
            descriptions: vec![format!("description for {}", id)],
            media_refs: vec![],
            final_url: Some("https://example.com/landing".to_string()),
        },
    }
}

pub fn with_content(mut creative: Creative, headline: &str, description: &str) -> Creative {
    creative.content.headlines = vec![headline.to_string()];
    creative.content.descriptions = vec![description.to_string()];
    creative
}

/// Daily counts; revenue defaults to 50 per conversion and cost to 0.5 per click
#[derive(Clone, Copy, Debug)]
pub struct Day {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
}

pub fn day(impressions: u64, clicks: u64, conversions: u64) -> Day {
    Day {
        impressions,
        clicks,
        conversions,
    }
}

pub fn snapshot(creative_id: &str, on: NaiveDate, d: Day) -> MetricSnapshot {
    MetricSnapshot {
        creative_id: creative_id.to_string(),
        date: on,
        impressions: d.impressions,
        clicks: d.clicks,
        conversions: d.conversions,
        cost: d.clicks as f64 * 0.5,
        revenue: d.conversions as f64 * 50.0,
        reach: None,
        quality_score: None,
    }
}

/// Record one snapshot per day for `days` days ending at `last`
pub async fn seed_days(
    store: &dyn MetricsStore,
    creative_id: &str,
    last: NaiveDate,
    days: i64,
    per_day: impl Fn(i64) -> Day,
) {
    for offset in 0..days {
        let on = last - Duration::days(days - 1 - offset);
        store
            .record_snapshot(&snapshot(creative_id, on, per_day(offset)))
            .await
            .unwrap();
    }
}

/// Record raw snapshots as-is
pub async fn seed_snapshots(store: &dyn MetricsStore, snapshots: &[MetricSnapshot]) {
    for s in snapshots {
        store.record_snapshot(s).await.unwrap();
    }
}

/// Memory store whose intent log can be switched off
#[derive(Default)]
pub struct IntentOutageStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl IntentOutageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_intents(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetricsStore for IntentOutageStore {
    async fn get_creative(&self, id: &str) -> Result<Option<Creative>, StoreError> {
        self.inner.get_creative(id).await
    }

    async fn creatives_in_ad_group(&self, ad_group_id: &str) -> Result<Vec<Creative>, StoreError> {
        self.inner.creatives_in_ad_group(ad_group_id).await
    }

    async fn creatives_in_campaign(&self, campaign_id: &str) -> Result<Vec<Creative>, StoreError> {
        self.inner.creatives_in_campaign(campaign_id).await
    }

    async fn upsert_creative(&self, creative: &Creative) -> Result<(), StoreError> {
        self.inner.upsert_creative(creative).await
    }

    async fn set_creative_status(
        &self,
        id: &str,
        status: CreativeStatus,
    ) -> Result<(), StoreError> {
        self.inner.set_creative_status(id, status).await
    }

    async fn snapshots(
        &self,
        creative_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        self.inner.snapshots(creative_id, start, end).await
    }

    async fn record_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        self.inner.record_snapshot(snapshot).await
    }

    async fn upsert_fatigue_verdict(&self, verdict: &FatigueVerdict) -> Result<(), StoreError> {
        self.inner.upsert_fatigue_verdict(verdict).await
    }

    async fn fatigue_verdicts(
        &self,
        creative_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<FatigueVerdict>, StoreError> {
        self.inner.fatigue_verdicts(creative_id, since).await
    }

    async fn insert_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        self.inner.insert_experiment(experiment).await
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        self.inner.update_experiment(experiment).await
    }

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, StoreError> {
        self.inner.get_experiment(id).await
    }

    async fn list_experiments(
        &self,
        ad_group_id: Option<&str>,
    ) -> Result<Vec<Experiment>, StoreError> {
        self.inner.list_experiments(ad_group_id).await
    }

    async fn insert_selection(&self, result: &SelectionResult) -> Result<(), StoreError> {
        self.inner.insert_selection(result).await
    }

    async fn get_selection(&self, id: Uuid) -> Result<Option<SelectionResult>, StoreError> {
        self.inner.get_selection(id).await
    }

    async fn selections_for_experiment(
        &self,
        experiment_id: Uuid,
    ) -> Result<Vec<SelectionResult>, StoreError> {
        self.inner.selections_for_experiment(experiment_id).await
    }

    async fn set_implementation_status(
        &self,
        id: Uuid,
        status: ImplementationStatus,
    ) -> Result<(), StoreError> {
        self.inner.set_implementation_status(id, status).await
    }

    async fn upsert_rotation_schedule(
        &self,
        schedule: &RotationSchedule,
    ) -> Result<(), StoreError> {
        self.inner.upsert_rotation_schedule(schedule).await
    }

    async fn get_rotation_schedule(
        &self,
        ad_group_id: &str,
    ) -> Result<Option<RotationSchedule>, StoreError> {
        self.inner.get_rotation_schedule(ad_group_id).await
    }

    async fn append_intent(&self, intent: &PlatformIntent) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database("intent log unavailable".to_string()));
        }
        self.inner.append_intent(intent).await
    }

    async fn list_intents(&self) -> Result<Vec<PlatformIntent>, StoreError> {
        self.inner.list_intents().await
    }
}
