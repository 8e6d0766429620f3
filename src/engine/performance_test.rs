use super::*;
use crate::engine::fixtures::{creative, date, day, harness, seed_days, utc};
use crate::model::creative::CreativeStatus;
use crate::store::MetricsStore;

fn profile_with(id: &str, impressions: u64, score: f64) -> PerformanceProfile {
    let c = creative(id, "ag-1", utc(2026, 1, 1));
    let mut p = build_profile(
        &c,
        &[],
        date(2026, 6, 1),
        date(2026, 6, 15),
        &PerformanceThresholds::default(),
    );
    p.totals.impressions = impressions;
    p.score = score;
    p
}

#[tokio::test]
async fn test_ad_group_scenario_ranks_and_flags() {
    // ARRANGE: today is 2026-06-15, ten days of data each
    let h = harness(2026, 6, 15);
    let today = date(2026, 6, 15);
    for id in ["cr-a", "cr-b", "cr-c"] {
        h.store
            .upsert_creative(&creative(id, "ag-1", utc(2026, 5, 1)))
            .await
            .unwrap();
    }
    // 8% CTR, 5% CVR, 500 conversions
    seed_days(h.store.as_ref(), "cr-a", today, 10, |_| day(12_500, 1_000, 50)).await;
    // 1% CTR, no conversions
    seed_days(h.store.as_ref(), "cr-b", today, 10, |_| day(5_000, 50, 0)).await;
    // mid-range
    seed_days(h.store.as_ref(), "cr-c", today, 10, |_| day(3_000, 90, 2)).await;

    let analyzer = PerformanceAnalyzer::new(h.ctx.clone());

    // ACT
    let group = analyzer.analyze_ad_group("ag-1", None).await.unwrap();

    // ASSERT
    let a = group.profile("cr-a").unwrap();
    assert_eq!(a.rank, Some(1));
    assert!((a.score - 85.0).abs() < 1e-9);
    assert_eq!(group.profile("cr-c").unwrap().rank, Some(2));
    assert_eq!(group.profile("cr-b").unwrap().rank, Some(3));

    assert_eq!(group.top_performers, vec!["cr-a".to_string()]);
    assert_eq!(group.poor_performers, vec!["cr-b".to_string()]);
    assert!(group.health.status <= HealthStatus::Fair);
    assert!(group
        .health
        .issues
        .iter()
        .any(|i| i.contains("score below")));
    assert!(group
        .recommendations
        .immediate
        .iter()
        .any(|r| r.contains("cr-b")));
    assert_eq!(group.profiles[0].creative_id, "cr-a");
}

#[tokio::test]
async fn test_creative_without_rows_scores_zero() {
    let h = harness(2026, 6, 15);
    h.store
        .upsert_creative(&creative("cr-new", "ag-1", utc(2026, 6, 14)))
        .await
        .unwrap();

    let analyzer = PerformanceAnalyzer::new(h.ctx.clone());
    let profile = analyzer.analyze_creative("cr-new", Some(7)).await.unwrap();

    assert_eq!(profile.score, 0.0);
    assert_eq!(profile.days_with_data, 0);
    assert_eq!(profile.trends, TrendSummary::neutral());
    assert_eq!(profile.window_start, date(2026, 6, 9));
    assert_eq!(profile.window_end, date(2026, 6, 15));
}

#[tokio::test]
async fn test_unknown_creative_is_not_found() {
    let h = harness(2026, 6, 15);
    let analyzer = PerformanceAnalyzer::new(h.ctx.clone());

    let result = analyzer.analyze_creative("missing", None).await;
    assert!(matches!(result, Err(EngineError::NotFound { .. })));
}

#[tokio::test]
async fn test_empty_ad_group_is_rejected() {
    let h = harness(2026, 6, 15);
    let mut removed = creative("cr-x", "ag-empty", utc(2026, 1, 1));
    removed.status = CreativeStatus::Removed;
    h.store.upsert_creative(&removed).await.unwrap();

    let analyzer = PerformanceAnalyzer::new(h.ctx.clone());
    let result = analyzer.analyze_ad_group("ag-empty", None).await;
    assert!(matches!(result, Err(EngineError::EmptyAdGroup(_))));
}

#[tokio::test]
async fn test_declining_ctr_lowers_score() {
    let h = harness(2026, 6, 15);
    h.store
        .upsert_creative(&creative("cr-1", "ag-1", utc(2026, 5, 1)))
        .await
        .unwrap();
    seed_days(h.store.as_ref(), "cr-1", date(2026, 6, 15), 10, |i| {
        if i < 5 {
            day(2_000, 100, 5)
        } else {
            day(2_000, 40, 2)
        }
    })
    .await;

    let analyzer = PerformanceAnalyzer::new(h.ctx.clone());
    let profile = analyzer.analyze_creative("cr-1", None).await.unwrap();

    assert_eq!(profile.trends.ctr.direction, TrendDirection::Declining);
    assert!((profile.trends.ctr.change + 0.6).abs() < 1e-9);
    assert_eq!(profile.trends.ctr.confidence, 1.0);

    let flat = TrendSummary::neutral();
    let unadjusted = performance_score(&profile.totals, &flat, &PerformanceThresholds::default());
    assert!(profile.score < unadjusted);
}

#[test]
fn test_too_few_snapshots_yield_neutral_trends() {
    let t = PerformanceThresholds::default();
    let snapshots: Vec<MetricSnapshot> = (1..=3)
        .map(|d| crate::engine::fixtures::snapshot("cr-1", date(2026, 6, d), day(1_000, 10, 1)))
        .collect();

    let trends = compute_trends("cr-1", &snapshots, date(2026, 6, 3), 3_000, &t);
    assert_eq!(trends, TrendSummary::neutral());
}

#[test]
fn test_alternating_ctr_is_volatile() {
    let t = PerformanceThresholds::default();
    let snapshots: Vec<MetricSnapshot> = (1..=8)
        .map(|d| {
            let clicks = if d % 2 == 0 { 40 } else { 10 };
            crate::engine::fixtures::snapshot("cr-1", date(2026, 6, d), day(1_000, clicks, 0))
        })
        .collect();

    let trends = compute_trends("cr-1", &snapshots, date(2026, 6, 8), 8_000, &t);
    assert_eq!(trends.ctr.direction, TrendDirection::Volatile);
    assert!((trends.ctr.confidence - 0.8).abs() < 1e-9);
}

#[test]
fn test_score_is_bounded_for_any_input() {
    let t = PerformanceThresholds::default();
    let cases = [
        (0, 0, 0, 0.0, 0.0),
        (1, 1, 1, 0.0, 1_000_000.0),
        (10_000_000, 9_000_000, 9_000_000, 1.0, 1e12),
        (500, 0, 0, 100.0, 0.0),
    ];
    for (impressions, clicks, conversions, cost, revenue) in cases {
        let totals = MetricTotals {
            impressions,
            clicks,
            conversions,
            cost,
            revenue,
            reach: None,
            ..Default::default()
        };
        let mut trends = TrendSummary::neutral();
        trends.ctr = MetricTrend {
            direction: TrendDirection::Improving,
            change: 1.0,
            confidence: 1.0,
        };
        let score = performance_score(&totals, &trends, &t);
        assert!((0.0..=100.0).contains(&score), "score {} out of range", score);
        assert!(!score.is_nan());
    }
}

#[test]
fn test_dense_ranking_shares_ties_and_skips_thin_creatives() {
    let ranked = rank_profiles(
        vec![
            profile_with("cr-1", 5_000, 50.0),
            profile_with("cr-2", 5_000, 70.0),
            profile_with("cr-3", 5_000, 50.0),
            profile_with("cr-4", 200, 99.0),
            profile_with("cr-5", 5_000, 30.0),
        ],
        1_000,
    );

    let ranks: Vec<(&str, Option<u32>)> = ranked
        .iter()
        .map(|p| (p.creative_id.as_str(), p.rank))
        .collect();
    assert_eq!(
        ranks,
        vec![
            ("cr-2", Some(1)),
            ("cr-1", Some(2)),
            ("cr-3", Some(2)),
            ("cr-5", Some(3)),
            ("cr-4", None),
        ]
    );
}

#[test]
fn test_healthy_group_without_issues_is_good_or_better() {
    let t = PerformanceThresholds::default();
    let profiles = vec![
        profile_with("cr-1", 50_000, 80.0),
        profile_with("cr-2", 50_000, 78.0),
        profile_with("cr-3", 50_000, 72.0),
    ];

    let group = summarize_ad_group("ag-1", 30, profiles, &t);
    assert!(group.health.issues.is_empty());
    assert_eq!(group.health.status, HealthStatus::Excellent);
    assert_eq!(group.top_performers.len(), 3);
}
