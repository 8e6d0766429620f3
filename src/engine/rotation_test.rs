use super::*;
use crate::config::Thresholds;
use crate::engine::fixtures::{creative, date, day, harness, harness_with, seed_days, utc};
use crate::engine::performance::PerformanceAnalyzer;
use crate::model::intent::IntentAction;
use crate::store::MetricsStore;

async fn seed_group(h: &crate::engine::fixtures::Harness, rows: &[(&str, u64, u64, u64)]) {
    let today = date(2026, 6, 15);
    for (id, impressions, clicks, conversions) in rows {
        h.store
            .upsert_creative(&creative(id, "ag-1", utc(2026, 4, 1)))
            .await
            .unwrap();
        let d = day(*impressions, *clicks, *conversions);
        seed_days(h.store.as_ref(), id, today, 10, |_| d).await;
    }
}

fn optimizer(h: &crate::engine::fixtures::Harness) -> RotationOptimizer {
    RotationOptimizer::new(h.ctx.clone(), PerformanceAnalyzer::new(h.ctx.clone()))
}

#[test]
fn test_traffic_percents_sum_to_hundred() {
    let cases: [&[f64]; 4] = [
        &[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
        &[0.5, 0.5],
        &[0.127, 0.333, 0.54],
        &[1.0],
    ];
    for weights in cases {
        let percents = traffic_percents(weights);
        assert_eq!(percents.iter().sum::<u32>(), 100, "{:?}", weights);
    }
    assert_eq!(traffic_percents(&[1.0 / 3.0; 3]), vec![34, 33, 33]);
    assert!(traffic_percents(&[]).is_empty());
}

#[test]
fn test_stability_drops_with_spread() {
    assert_eq!(stability(&[70.0]), 100.0);
    assert_eq!(stability(&[50.0, 50.0, 50.0]), 100.0);
    // population std dev 25 -> 100 - 50
    assert!((stability(&[25.0, 75.0]) - 50.0).abs() < 1e-9);
    assert_eq!(stability(&[0.0, 100.0]), 0.0);
}

#[tokio::test]
async fn test_even_group_with_weak_scores_stays_even() {
    // ARRANGE: three similar mid-range creatives
    let h = harness(2026, 6, 15);
    seed_group(
        &h,
        &[
            ("cr-a", 3_000, 90, 2),
            ("cr-b", 3_000, 90, 2),
            ("cr-c", 3_000, 90, 2),
        ],
    )
    .await;

    // ACT
    let analysis = optimizer(&h)
        .analyze("ag-1", &RotationConfig::default())
        .await
        .unwrap();

    // ASSERT
    assert_eq!(analysis.current.strategy, RotationStrategy::Even);
    assert_eq!(analysis.current.active_creatives, 3);
    assert_eq!(analysis.performance_gap, 0.0);
    assert_eq!(analysis.stability_index, 100.0);
    assert_eq!(analysis.risk_level, RiskLevel::Low);
    assert_eq!(analysis.opportunity.recommended_strategy, RotationStrategy::Even);
    assert!(analysis.opportunity.estimated_improvement.abs() < 1e-9);
}

#[tokio::test]
async fn test_wide_gap_with_two_creatives_is_high_risk() {
    let h = harness(2026, 6, 15);
    seed_group(&h, &[("cr-a", 12_500, 1_000, 50), ("cr-b", 5_000, 50, 0)]).await;

    let analysis = optimizer(&h)
        .analyze("ag-1", &RotationConfig::default())
        .await
        .unwrap();

    // 85 vs 19
    assert!((analysis.performance_gap - 66.0).abs() < 1e-9);
    assert_eq!(analysis.risk_level, RiskLevel::High);
    // HIGH risk blocks OPTIMIZE; the spread makes the group unstable
    assert_eq!(analysis.opportunity.recommended_strategy, RotationStrategy::Adaptive);
}

#[tokio::test]
async fn test_moderate_gap_with_low_risk_recommends_optimize() {
    // ARRANGE: scores 85, 85, 55; gap 30 clears a lowered optimize gap
    let mut thresholds = Thresholds::default();
    thresholds.rotation.optimize_gap = 25.0;
    thresholds.rotation.stability_floor = 50.0;
    let h = harness_with(2026, 6, 15, thresholds);
    seed_group(
        &h,
        &[
            ("cr-a", 12_500, 1_000, 50),
            ("cr-b", 12_500, 1_000, 50),
            ("cr-c", 3_000, 90, 2),
        ],
    )
    .await;

    // ACT
    let rec = optimizer(&h)
        .recommend("ag-1", &RotationConfig::default())
        .await
        .unwrap();

    // ASSERT
    assert_eq!(rec.analysis.risk_level, RiskLevel::Low);
    assert_eq!(rec.strategy, RotationStrategy::Optimize);
    let weights = rec.schedule.weights();
    assert!(weights["cr-a"] > weights["cr-c"]);
    assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
    assert_eq!(
        rec.schedule
            .entries
            .iter()
            .map(|e| e.traffic_percent)
            .sum::<u32>(),
        100
    );
    assert!(rec.analysis.opportunity.estimated_improvement > 0.0);
    assert!(rec
        .actions
        .iter()
        .any(|a| a.kind == RotationActionKind::ShiftTraffic));
    assert!(rec
        .actions
        .iter()
        .any(|a| a.kind == RotationActionKind::CreateVariant
            && a.creative_id.as_deref() == Some("cr-a")));
    assert_eq!(
        rec.schedule.next_review,
        h.ctx.clock.now() + Duration::days(7)
    );
}

#[tokio::test]
async fn test_recommend_excludes_poor_creatives_and_caps_schedule() {
    let h = harness(2026, 6, 15);
    seed_group(
        &h,
        &[
            ("cr-a", 12_500, 1_000, 50),
            ("cr-b", 5_000, 50, 0),
            ("cr-c", 3_000, 90, 2),
            ("cr-d", 3_000, 90, 2),
        ],
    )
    .await;
    let config = RotationConfig {
        max_active_creatives: 2,
        ..Default::default()
    };

    let rec = optimizer(&h).recommend("ag-1", &config).await.unwrap();

    let ids: Vec<&str> = rec
        .schedule
        .entries
        .iter()
        .map(|e| e.creative_id.as_str())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], "cr-a");
    assert!(!ids.contains(&"cr-b"));

    let pause = rec
        .actions
        .iter()
        .find(|a| a.kind == RotationActionKind::PauseCreative)
        .unwrap();
    assert_eq!(pause.creative_id.as_deref(), Some("cr-b"));
    assert_eq!(pause.priority, Priority::High);
    assert_eq!(rec.actions[0].priority, Priority::High);

    // Nothing persisted by recommend
    assert!(h.store.get_rotation_schedule("ag-1").await.unwrap().is_none());
    assert!(h.store.list_intents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_apply_persists_schedule_and_pauses_dropped_creatives() {
    // ARRANGE
    let h = harness(2026, 6, 15);
    seed_group(
        &h,
        &[
            ("cr-a", 12_500, 1_000, 50),
            ("cr-b", 5_000, 50, 0),
            ("cr-c", 3_000, 90, 2),
        ],
    )
    .await;
    let rotation = optimizer(&h);

    // ACT
    let rec = rotation.apply("ag-1", &RotationConfig::default()).await.unwrap();

    // ASSERT
    let stored = rotation.current_schedule("ag-1").await.unwrap().unwrap();
    assert_eq!(stored, rec.schedule);

    let cr_b = h.store.get_creative("cr-b").await.unwrap().unwrap();
    assert_eq!(cr_b.status, CreativeStatus::Paused);

    let intents = h.store.list_intents().await.unwrap();
    assert_eq!(intents.len(), 2);
    assert!(matches!(
        intents[0].action,
        IntentAction::ShiftTraffic { ref ad_group_id, .. } if ad_group_id == "ag-1"
    ));
    assert!(matches!(
        intents[1].action,
        IntentAction::PauseCreative { ref creative_id } if creative_id == "cr-b"
    ));
    assert!(intents.iter().all(|i| i.origin == "rotation"));

    // Next analysis starts from the stored schedule
    let analysis = rotation
        .analyze("ag-1", &RotationConfig::default())
        .await
        .unwrap();
    assert_eq!(analysis.current.strategy, rec.schedule.strategy);
    assert!(analysis.current.last_updated.is_some());
    assert_eq!(analysis.current.active_creatives, 2);
}

#[tokio::test]
async fn test_manual_weights_are_honored() {
    let h = harness(2026, 6, 15);
    seed_group(
        &h,
        &[
            ("cr-a", 3_000, 90, 2),
            ("cr-b", 3_000, 90, 2),
            ("cr-c", 3_000, 90, 2),
        ],
    )
    .await;
    let config = RotationConfig {
        strategy: RotationStrategy::Manual,
        manual_weights: [
            ("cr-a".to_string(), 3.0),
            ("cr-b".to_string(), 1.0),
            ("cr-c".to_string(), 0.0),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };

    let rec = optimizer(&h).recommend("ag-1", &config).await.unwrap();

    assert_eq!(rec.strategy, RotationStrategy::Manual);
    let weights = rec.schedule.weights();
    assert!((weights["cr-a"] - 0.75).abs() < 1e-9);
    assert!((weights["cr-b"] - 0.25).abs() < 1e-9);
    assert_eq!(weights["cr-c"], 0.0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_any_read() {
    let h = harness(2026, 6, 15);
    let rotation = optimizer(&h);

    let manual_without_weights = RotationConfig {
        strategy: RotationStrategy::Manual,
        ..Default::default()
    };
    let result = rotation.recommend("ag-1", &manual_without_weights).await;
    assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));

    let zero_cap = RotationConfig {
        max_active_creatives: 0,
        ..Default::default()
    };
    let result = rotation.apply("ag-1", &zero_cap).await;
    assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn test_unknown_ad_group_is_empty() {
    let h = harness(2026, 6, 15);
    let result = optimizer(&h)
        .analyze("ag-missing", &RotationConfig::default())
        .await;
    assert!(matches!(result, Err(EngineError::EmptyAdGroup(_))));
}
