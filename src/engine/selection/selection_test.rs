use super::*;
use crate::engine::experiment::AnalyzerRegistry;
use crate::engine::fixtures::{creative, date, day, harness, seed_days, utc, with_content, Harness};
use crate::model::creative::MetricSnapshot;
use crate::model::experiment::{
    CreateExperimentRequest, Experiment, ExperimentConfig, VariantSpec,
};
use crate::model::rotation::RiskLevel;
use crate::model::selection::{
    BusinessValidation, ImplementationAction, RiskAssessment, RiskTolerance, RolloutKind,
    StatisticalValidation,
};
use crate::store::MetricsStore;

struct Setup {
    h: Harness,
    selector: WinnerSelector,
    experiments: ExperimentFramework,
}

fn setup() -> Setup {
    let h = harness(2026, 6, 1);
    let experiments = ExperimentFramework::new(h.ctx.clone(), AnalyzerRegistry::standard());
    let selector = WinnerSelector::new(h.ctx.clone(), experiments.clone());
    Setup {
        h,
        selector,
        experiments,
    }
}

/// Experiment started 2026-06-01 and observed for 14 days
///
/// `control` is daily (impressions, clicks, conversions); `test` carries a
/// ten-day click total so odd lifts can be expressed.
async fn running_experiment(
    s: &Setup,
    control: (u64, u64, u64),
    test: (u64, u64, u64),
) -> Experiment {
    let a = with_content(
        creative("cr-a", "ag-1", utc(2026, 4, 1)),
        "Summer sale on running shoes",
        "Free shipping on every order",
    );
    let b = with_content(
        creative("cr-b", "ag-1", utc(2026, 4, 1)),
        "New trail collection is here",
        "Built for mud, rock and rain",
    );
    s.h.store.upsert_creative(&a).await.unwrap();
    s.h.store.upsert_creative(&b).await.unwrap();

    let experiment = s
        .experiments
        .create(CreateExperimentRequest {
            name: "trail headline".to_string(),
            ad_group_id: "ag-1".to_string(),
            control: VariantSpec {
                creative_id: "cr-a".to_string(),
                content: None,
            },
            test: VariantSpec {
                creative_id: "cr-b".to_string(),
                content: None,
            },
            config: ExperimentConfig::default(),
        })
        .await
        .unwrap();
    s.experiments.start(experiment.id).await.unwrap();

    let last = date(2026, 6, 11);
    let (ci, cc, cv) = control;
    seed_days(s.h.store.as_ref(), "cr-a", last, 10, |_| day(ci, cc, cv)).await;
    let (ti, tc, tv) = test;
    seed_days(s.h.store.as_ref(), "cr-b", last, 10, |i| {
        day(ti, clicks_on_day(tc, i), tv)
    })
    .await;
    s.h.clock.advance(Duration::days(14));
    experiment
}

/// Spread a ten-day click total evenly, remainder on the first days
fn clicks_on_day(total: u64, i: i64) -> u64 {
    let base = total / 10;
    let rest = total % 10;
    if (i as u64) < rest {
        base + 1
    } else {
        base
    }
}

/// 5.0% vs 5.5% CTR; test CVR slightly higher
async fn lift(s: &Setup) -> Experiment {
    running_experiment(s, (1_900, 95, 5), (1_900, 1_045, 6)).await
}

#[tokio::test]
async fn test_significant_lift_selects_test() {
    // ARRANGE
    let s = setup();
    let experiment = lift(&s).await;

    // ACT
    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &MarketContext::default())
        .await
        .unwrap();

    // ASSERT
    assert!(result.statistical.passed, "{:?}", result.statistical);
    assert!(result.business.passed, "{:?}", result.business.notes);
    assert_eq!(result.risk.level, RiskLevel::Low);
    assert_eq!(result.risk.risks.len(), 1);
    assert_eq!(result.decision, SelectionDecision::SelectWinner);
    assert_eq!(result.winner, Some(Winner::Test));
    assert_eq!(result.winning_creative(), Some("cr-b"));
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert_eq!(
        result.implementation.action,
        ImplementationAction::ImplementWithMonitoring
    );
    assert_eq!(result.implementation.rollout, Some(RolloutKind::Gradual));
    assert_eq!(result.implementation_status, ImplementationStatus::Pending);

    assert!((result.projection.expected_lift - 0.1).abs() < 1e-9);
    assert!((result.projection.projected_revenue - result.projection.current_revenue * 1.1).abs() < 1e-6);

    let stored = s.selector.get(result.id).await.unwrap();
    assert_eq!(stored, result);
    assert_eq!(
        s.selector.list_for_experiment(experiment.id).await.unwrap().len(),
        1
    );
    assert_eq!(s.h.events.events_of(EventType::WinnerSelected).len(), 1);
}

#[tokio::test]
async fn test_conservative_tolerance_continues_on_high_risk() {
    let s = setup();
    let experiment = lift(&s).await;
    let criteria = SelectionCriteria {
        risk_tolerance: RiskTolerance::Conservative,
        ..Default::default()
    };
    let market = MarketContext {
        competitive_activity: true,
        seasonal_event: true,
        notes: vec![],
    };

    let result = s
        .selector
        .evaluate(experiment.id, &criteria, &market)
        .await
        .unwrap();

    assert_eq!(result.risk.level, RiskLevel::High);
    assert_eq!(result.decision, SelectionDecision::ContinueTest);
    assert_eq!(result.winner, None);
    assert_eq!(result.implementation.action, ImplementationAction::ContinueTesting);
    assert_eq!(result.implementation_status, ImplementationStatus::NotApplicable);
    assert!(s.h.events.events_of(EventType::WinnerSelected).is_empty());
}

#[tokio::test]
async fn test_high_risk_with_moderate_tolerance_rolls_out_in_segments() {
    let s = setup();
    let experiment = lift(&s).await;
    let market = MarketContext {
        competitive_activity: true,
        seasonal_event: true,
        notes: vec![],
    };

    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &market)
        .await
        .unwrap();

    assert_eq!(result.risk.level, RiskLevel::High);
    assert_eq!(result.decision, SelectionDecision::SelectWinner);
    assert_eq!(result.implementation.action, ImplementationAction::ImplementGradually);
    assert_eq!(result.implementation.rollout, Some(RolloutKind::Segmented));
    assert!((result.confidence - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_insufficient_sample_continues_test() {
    let s = setup();
    let experiment = lift(&s).await;
    let criteria = SelectionCriteria {
        min_sample_size: 50_000,
        ..Default::default()
    };

    let result = s
        .selector
        .evaluate(experiment.id, &criteria, &MarketContext::default())
        .await
        .unwrap();

    assert!(!result.statistical.sample_size_adequate);
    assert_eq!(result.decision, SelectionDecision::ContinueTest);
    assert_eq!(result.winner, None);
}

#[tokio::test]
async fn test_no_difference_is_inconclusive() {
    let s = setup();
    let experiment = running_experiment(&s, (1_900, 95, 5), (1_900, 950, 5)).await;

    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &MarketContext::default())
        .await
        .unwrap();

    assert!(!result.statistical.confidence_met);
    assert_eq!(result.decision, SelectionDecision::DeclareInconclusive);
    assert_eq!(result.winner, Some(Winner::Neither));
    assert_eq!(result.implementation.action, ImplementationAction::NoAction);
}

#[tokio::test]
async fn test_significantly_worse_test_aborts() {
    let s = setup();
    let experiment = running_experiment(&s, (2_000, 100, 5), (2_000, 700, 5)).await;

    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &MarketContext::default())
        .await
        .unwrap();

    assert_eq!(result.decision, SelectionDecision::AbortTest);
    assert_eq!(result.winner, Some(Winner::Control));
}

#[tokio::test]
async fn test_quality_gate_blocks_selection() {
    let s = setup();
    let experiment = lift(&s).await;
    let mut low_quality = MetricSnapshot::empty("cr-b", date(2026, 6, 14));
    low_quality.quality_score = Some(3.0);
    s.h.store.record_snapshot(&low_quality).await.unwrap();
    let criteria = SelectionCriteria {
        min_quality_score: Some(5.0),
        ..Default::default()
    };

    let result = s
        .selector
        .evaluate(experiment.id, &criteria, &MarketContext::default())
        .await
        .unwrap();

    assert!(result.statistical.passed);
    assert!(!result.business.quality_gate_passed);
    assert_ne!(result.decision, SelectionDecision::SelectWinner);
    assert!(result.business.notes.iter().any(|n| n.contains("quality score")));
}

#[tokio::test]
async fn test_evaluate_rejects_unstarted_experiment_and_bad_criteria() {
    let s = setup();
    s.h.store
        .upsert_creative(&with_content(
            creative("cr-a", "ag-1", utc(2026, 4, 1)),
            "Summer sale",
            "Free shipping",
        ))
        .await
        .unwrap();
    s.h.store
        .upsert_creative(&with_content(
            creative("cr-b", "ag-1", utc(2026, 4, 1)),
            "Trail collection",
            "Built for mud",
        ))
        .await
        .unwrap();
    let experiment = s
        .experiments
        .create(CreateExperimentRequest {
            name: "ready only".to_string(),
            ad_group_id: "ag-1".to_string(),
            control: VariantSpec {
                creative_id: "cr-a".to_string(),
                content: None,
            },
            test: VariantSpec {
                creative_id: "cr-b".to_string(),
                content: None,
            },
            config: ExperimentConfig::default(),
        })
        .await
        .unwrap();

    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &MarketContext::default())
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { from: "READY", .. })
    ));

    let bad = SelectionCriteria {
        min_confidence: 1.5,
        ..Default::default()
    };
    let result = s
        .selector
        .evaluate(experiment.id, &bad, &MarketContext::default())
        .await;
    assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn test_begin_implementation_shifts_first_phase() {
    let s = setup();
    let experiment = lift(&s).await;
    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &MarketContext::default())
        .await
        .unwrap();

    let started = s.selector.begin_implementation(result.id).await.unwrap();

    assert_eq!(started.implementation_status, ImplementationStatus::InProgress);
    let intents = s.h.store.list_intents().await.unwrap();
    match &intents.last().unwrap().action {
        IntentAction::ShiftTraffic { ad_group_id, weights } => {
            assert_eq!(ad_group_id, "ag-1");
            assert!((weights["cr-b"] - 0.25).abs() < 1e-9);
            assert!((weights["cr-a"] - 0.75).abs() < 1e-9);
        }
        other => panic!("unexpected intent {:?}", other),
    }
    assert!(matches!(
        s.selector.begin_implementation(result.id).await,
        Err(EngineError::InvalidTransition { from: "IN_PROGRESS", .. })
    ));
}

/// Selected, rolled out, then observed from 2026-06-15 for `days` more days
async fn implemented(s: &Setup, days: i64, live: crate::engine::fixtures::Day) -> SelectionResult {
    let experiment = lift(s).await;
    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &MarketContext::default())
        .await
        .unwrap();
    s.selector.begin_implementation(result.id).await.unwrap();

    s.h.clock.advance(Duration::days(days));
    seed_days(
        s.h.store.as_ref(),
        "cr-b",
        date(2026, 6, 15) + Duration::days(days),
        days + 1,
        |_| live,
    )
    .await;
    result
}

#[tokio::test]
async fn test_monitor_recommends_rollback_on_critical_shortfall() {
    // ARRANGE: live CTR 4.0% against a projected 5.5%
    let s = setup();
    let result = implemented(&s, 3, day(2_000, 80, 5)).await;

    // ACT
    let report = s.selector.monitor(result.id).await.unwrap();

    // ASSERT
    assert_eq!(report.days_since_implementation, 3);
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].metric, ExperimentMetric::Ctr);
    assert_eq!(report.alerts[0].level, AlertLevel::Critical);
    assert_eq!(report.recommendation, MonitoringRecommendation::Rollback);
    assert_eq!(
        report.implementation_status,
        ImplementationStatus::RollbackRecommended
    );

    let stored = s.selector.get(result.id).await.unwrap();
    assert_eq!(
        stored.implementation_status,
        ImplementationStatus::RollbackRecommended
    );
    let intents = s.h.store.list_intents().await.unwrap();
    assert!(matches!(
        intents.last().unwrap().action,
        IntentAction::RollbackTraffic { ref restore_creative_id, .. } if restore_creative_id == "cr-a"
    ));
    assert_eq!(s.h.events.events_of(EventType::RollbackRequired).len(), 1);
}

#[tokio::test]
async fn test_monitor_adjusts_on_multiple_warnings() {
    // CTR 4.8% and CVR 5.0%, both 10-20% short
    let s = setup();
    let result = implemented(&s, 3, day(2_500, 120, 6)).await;

    let report = s.selector.monitor(result.id).await.unwrap();

    assert_eq!(report.alerts.len(), 2);
    assert!(report.alerts.iter().all(|a| a.level == AlertLevel::Warning));
    assert_eq!(report.recommendation, MonitoringRecommendation::Adjust);
    assert_eq!(report.implementation_status, ImplementationStatus::Adjusting);

    // Adjusting is still monitored
    assert!(s.selector.monitor(result.id).await.is_ok());
}

#[tokio::test]
async fn test_monitor_completes_after_monitoring_period() {
    let s = setup();
    let result = implemented(&s, 15, day(2_000, 110, 7)).await;

    let report = s.selector.monitor(result.id).await.unwrap();

    assert!(report.alerts.is_empty());
    assert_eq!(report.recommendation, MonitoringRecommendation::Continue);
    assert_eq!(report.implementation_status, ImplementationStatus::Completed);
    assert!(matches!(
        s.selector.monitor(result.id).await,
        Err(EngineError::InvalidTransition { from: "COMPLETED", .. })
    ));
}

#[tokio::test]
async fn test_monitor_requires_rollout_in_progress() {
    let s = setup();
    let experiment = lift(&s).await;
    let result = s
        .selector
        .evaluate(experiment.id, &SelectionCriteria::default(), &MarketContext::default())
        .await
        .unwrap();

    assert!(matches!(
        s.selector.monitor(result.id).await,
        Err(EngineError::InvalidTransition { from: "PENDING", .. })
    ));
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let s = setup();
    let experiment = lift(&s).await;
    let missing = Uuid::new_v4();

    let report = s
        .selector
        .batch_evaluate(
            &[experiment.id, missing],
            &SelectionCriteria::default(),
            &MarketContext::default(),
        )
        .await;

    assert_eq!(report.requested, 2);
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.decision_counts.get("SELECT_WINNER"), Some(&1));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, missing.to_string());
}

#[test]
fn test_confidence_stays_within_bounds() {
    let analysis_template = crate::model::experiment::MetricResult {
        metric: ExperimentMetric::Ctr,
        control_value: 0.05,
        test_value: 0.055,
        relative_change: 0.1,
        absolute_change: 0.005,
        p_value: 0.001,
        confidence_interval: (0.001, 0.009),
        statistically_significant: true,
        practically_significant: true,
    };
    let config = ExperimentConfig::default();

    for passed_stat in [true, false] {
        for passed_biz in [true, false] {
            for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
                for p_value in [0.001, 0.03, 0.5] {
                    let mut primary = analysis_template.clone();
                    primary.p_value = p_value;
                    let analysis = analysis_with(primary);
                    let statistical = StatisticalValidation {
                        primary_metric_valid: true,
                        sample_size_adequate: true,
                        duration_adequate: true,
                        confidence_met: passed_stat,
                        passed: passed_stat,
                    };
                    let business = BusinessValidation {
                        practically_significant: passed_biz,
                        secondary_within_tolerance: true,
                        budget_within_limit: true,
                        roi_within_bounds: true,
                        quality_gate_passed: true,
                        passed: passed_biz,
                        notes: vec![],
                    };
                    let risk = RiskAssessment {
                        level,
                        risks: vec![],
                    };
                    let c = policy::confidence(&analysis, &config, &statistical, &business, &risk);
                    assert!((0.1..=1.0).contains(&c), "confidence {}", c);
                }
            }
        }
    }
}

fn analysis_with(
    primary: crate::model::experiment::MetricResult,
) -> crate::model::experiment::ExperimentAnalysis {
    use crate::model::experiment::{
        ExperimentAnalysis, PowerProjection, StatisticalMethod, TestDecision, TestRecommendation,
    };
    ExperimentAnalysis {
        experiment_id: Uuid::nil(),
        analyzed_at: utc(2026, 6, 15),
        method: StatisticalMethod::Frequentist,
        days_running: 14,
        control: ArmSummary::default(),
        test: ArmSummary::default(),
        primary,
        secondary: vec![],
        bayesian: None,
        power: PowerProjection {
            required_sample_size: 1_000,
            current_sample_size: 1_000,
            progress: 1.0,
            achieved_power: 0.8,
            estimated_days_remaining: Some(0),
        },
        recommendation: TestRecommendation {
            decision: TestDecision::Continue,
            winner: None,
            rationale: String::new(),
        },
    }
}

#[test]
fn test_variance_alerts_respect_metric_direction() {
    assert!(check_variance(ExperimentMetric::Ctr, 0.05, 0.05, 0.1).is_none());
    assert_eq!(
        check_variance(ExperimentMetric::Ctr, 0.05, 0.044, 0.1).map(|a| a.level),
        Some(AlertLevel::Warning)
    );
    assert_eq!(
        check_variance(ExperimentMetric::Ctr, 0.05, 0.03, 0.1).map(|a| a.level),
        Some(AlertLevel::Critical)
    );
    // CPA going up is the shortfall
    assert_eq!(
        check_variance(ExperimentMetric::Cpa, 10.0, 12.5, 0.1).map(|a| a.level),
        Some(AlertLevel::Critical)
    );
    assert!(check_variance(ExperimentMetric::Cpa, 10.0, 8.0, 0.1).is_none());
}
