//! Behavioural tests shared by both store implementations

use super::*;
use crate::engine::fixtures::{creative, date, day, snapshot};
use crate::model::creative::MetricTotals;
use crate::model::experiment::{
    ExperimentConfig, ExperimentStatus, Variant, VariantRole,
};
use crate::model::fatigue::{
    FatigueSeverity, FatigueWindows, HistoricalComparison, HistoricalTrend, LifespanProjection,
};
use crate::model::intent::IntentAction;
use crate::model::rotation::{RotationStrategy, ScheduleEntry};
use chrono::{TimeZone, Utc};

fn stores() -> Vec<(&'static str, Box<dyn MetricsStore>)> {
    vec![
        ("memory", Box::new(MemoryStore::new())),
        ("sqlite", Box::new(SqliteStore::open_in_memory().unwrap())),
    ]
}

fn verdict(creative_id: &str, on: NaiveDate, severity: FatigueSeverity, score: f64) -> FatigueVerdict {
    FatigueVerdict {
        creative_id: creative_id.to_string(),
        ad_group_id: "ag-1".to_string(),
        analysis_date: on,
        analyzed_at: on.and_hms_opt(6, 0, 0).unwrap().and_utc(),
        severity,
        score,
        signals: vec![],
        windows: FatigueWindows {
            recent_start: on,
            recent_end: on,
            baseline_start: on,
            baseline_end: on,
            recent: MetricTotals::default(),
            baseline: MetricTotals::default(),
            creative_age_days: 10,
        },
        history: HistoricalComparison {
            prior_verdicts: 0,
            previous_score: None,
            previous_severity: None,
            score_delta: 0.0,
            trend: HistoricalTrend::FirstAnalysis,
        },
        lifespan: LifespanProjection {
            days_remaining: 60,
            refresh_by: on,
            severe_signal_count: 0,
        },
        actions: vec![],
    }
}

fn experiment(ad_group_id: &str) -> Experiment {
    let created = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
    let c = creative("cr-a", ad_group_id, created);
    let t = creative("cr-b", ad_group_id, created);
    Experiment {
        id: Uuid::new_v4(),
        name: "headline test".to_string(),
        ad_group_id: ad_group_id.to_string(),
        config: ExperimentConfig::default(),
        control: Variant {
            id: Uuid::new_v4(),
            role: VariantRole::Control,
            creative_id: c.id.clone(),
            content: c.content.clone(),
            active: false,
        },
        test: Variant {
            id: Uuid::new_v4(),
            role: VariantRole::Test,
            creative_id: t.id.clone(),
            content: t.content.clone(),
            active: false,
        },
        status: ExperimentStatus::Ready,
        required_sample_size: 80_000,
        created_at: created,
        started_at: None,
        completed_at: None,
        stop_reason: None,
        winner: None,
        status_history: vec![],
        latest_analysis: None,
    }
}

#[tokio::test]
async fn test_creative_status_write_back() {
    for (name, store) in stores() {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store.upsert_creative(&creative("cr-1", "ag-1", created)).await.unwrap();
        store.upsert_creative(&creative("cr-2", "ag-2", created)).await.unwrap();

        store
            .set_creative_status("cr-1", CreativeStatus::Paused)
            .await
            .unwrap();

        let c = store.get_creative("cr-1").await.unwrap().unwrap();
        assert_eq!(c.status, CreativeStatus::Paused, "{}", name);
        assert_eq!(store.creatives_in_ad_group("ag-1").await.unwrap().len(), 1, "{}", name);
        assert_eq!(store.creatives_in_campaign("camp-1").await.unwrap().len(), 2, "{}", name);

        let missing = store.set_creative_status("nope", CreativeStatus::Paused).await;
        assert!(matches!(missing, Err(StoreError::Missing(_))), "{}", name);
    }
}

#[tokio::test]
async fn test_snapshot_range_is_inclusive_and_ordered() {
    for (name, store) in stores() {
        for d in [5, 1, 3, 2, 4] {
            store
                .record_snapshot(&snapshot("cr-1", date(2026, 3, d), day(1000, 10, 1)))
                .await
                .unwrap();
        }
        store
            .record_snapshot(&snapshot("cr-2", date(2026, 3, 3), day(1, 1, 1)))
            .await
            .unwrap();

        let rows = store
            .snapshots("cr-1", date(2026, 3, 2), date(2026, 3, 4))
            .await
            .unwrap();
        let days: Vec<_> = rows.iter().map(|s| s.date).collect();
        assert_eq!(
            days,
            vec![date(2026, 3, 2), date(2026, 3, 3), date(2026, 3, 4)],
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_verdict_upsert_keeps_one_row_per_day() {
    for (name, store) in stores() {
        let on = date(2026, 4, 10);
        store
            .upsert_fatigue_verdict(&verdict("cr-1", on, FatigueSeverity::Mild, 25.0))
            .await
            .unwrap();
        store
            .upsert_fatigue_verdict(&verdict("cr-1", on, FatigueSeverity::Severe, 70.0))
            .await
            .unwrap();
        store
            .upsert_fatigue_verdict(&verdict("cr-1", date(2026, 4, 2), FatigueSeverity::None, 0.0))
            .await
            .unwrap();

        let rows = store.fatigue_verdicts("cr-1", date(2026, 4, 5)).await.unwrap();
        assert_eq!(rows.len(), 1, "{}", name);
        assert_eq!(rows[0].severity, FatigueSeverity::Severe, "{}", name);

        let all = store.fatigue_verdicts("cr-1", date(2026, 1, 1)).await.unwrap();
        assert_eq!(all.len(), 2, "{}", name);
        assert!(all[0].analysis_date < all[1].analysis_date, "{}", name);
    }
}

#[tokio::test]
async fn test_experiment_insert_is_unique() {
    for (name, store) in stores() {
        let mut e = experiment("ag-1");
        store.insert_experiment(&e).await.unwrap();

        let dup = store.insert_experiment(&e).await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))), "{}", name);

        e.status = ExperimentStatus::Running;
        store.update_experiment(&e).await.unwrap();
        let loaded = store.get_experiment(e.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExperimentStatus::Running, "{}", name);

        let other = experiment("ag-1");
        let missing = store.update_experiment(&other).await;
        assert!(matches!(missing, Err(StoreError::Missing(_))), "{}", name);

        assert_eq!(store.list_experiments(Some("ag-1")).await.unwrap().len(), 1, "{}", name);
        assert!(store.list_experiments(Some("ag-9")).await.unwrap().is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn test_rotation_schedule_upsert_replaces() {
    for (name, store) in stores() {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let mut schedule = RotationSchedule {
            ad_group_id: "ag-1".to_string(),
            strategy: RotationStrategy::Even,
            entries: vec![ScheduleEntry {
                creative_id: "cr-1".to_string(),
                weight: 1.0,
                traffic_percent: 100,
            }],
            effective_from: at,
            next_review: at,
        };
        store.upsert_rotation_schedule(&schedule).await.unwrap();

        schedule.strategy = RotationStrategy::Optimize;
        store.upsert_rotation_schedule(&schedule).await.unwrap();

        let loaded = store.get_rotation_schedule("ag-1").await.unwrap().unwrap();
        assert_eq!(loaded.strategy, RotationStrategy::Optimize, "{}", name);
        assert!(store.get_rotation_schedule("ag-2").await.unwrap().is_none(), "{}", name);
    }
}

#[tokio::test]
async fn test_intents_are_append_only_in_order() {
    for (name, store) in stores() {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        for id in ["cr-1", "cr-2"] {
            store
                .append_intent(&PlatformIntent {
                    id: ulid::Ulid::new().to_string(),
                    recorded_at: at,
                    origin: "rotation".to_string(),
                    action: IntentAction::PauseCreative {
                        creative_id: id.to_string(),
                    },
                })
                .await
                .unwrap();
        }

        let intents = store.list_intents().await.unwrap();
        assert_eq!(intents.len(), 2, "{}", name);
        assert_eq!(
            intents[0].action,
            IntentAction::PauseCreative {
                creative_id: "cr-1".to_string()
            },
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_sqlite_schema_is_fully_migrated() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.schema_version().await.unwrap(), 3);
}
