//! Fatigue Detector
//!
//! Compares a recent window against the baseline window before it, runs every
//! registered signal detector and folds the signals into one daily verdict
//! per creative. Verdicts are upserted on (creative, analysis date), so a
//! rerun on the same day replaces the earlier row.

pub mod remediation;
pub mod signals;

pub use signals::{DetectorRegistry, SignalDetector, SignalInput};

use crate::config::FatigueThresholds;
use crate::engine::events::{EventType, Severity};
use crate::engine::{Context, EngineError};
use crate::model::creative::{Creative, MetricSnapshot, MetricTotals};
use crate::model::fatigue::{
    BatchFailure, BatchFatigueReport, FatigueSeverity, FatigueSignal, FatigueVerdict,
    FatigueWindows, HistoricalComparison, HistoricalTrend, LifespanProjection,
};
use chrono::{Duration, NaiveDate};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Creatives analyzed concurrently in batch mode
const BATCH_CONCURRENCY: usize = 4;

/// Score change between verdicts that counts as a trend
const HISTORY_TREND_DELTA: f64 = 5.0;

#[derive(Clone)]
pub struct FatigueDetector {
    ctx: Arc<Context>,
    registry: Arc<DetectorRegistry>,
}

impl FatigueDetector {
    pub fn new(ctx: Arc<Context>, registry: DetectorRegistry) -> Self {
        FatigueDetector {
            ctx,
            registry: Arc::new(registry),
        }
    }

    /// Detect fatigue for one creative as of today and persist the verdict
    pub async fn detect(&self, creative_id: &str) -> Result<FatigueVerdict, EngineError> {
        let started = Instant::now();
        let result = self.detect_inner(creative_id).await;
        self.ctx.observe("detect_fatigue", started, &result);
        result
    }

    async fn detect_inner(&self, creative_id: &str) -> Result<FatigueVerdict, EngineError> {
        let creative = self
            .ctx
            .store
            .get_creative(creative_id)
            .await?
            .ok_or_else(|| EngineError::not_found("creative", creative_id))?;

        let t = &self.ctx.thresholds.fatigue;
        let today = self.ctx.clock.today();
        let window = Windows::ending(today, t);

        let snapshots = self
            .ctx
            .store
            .snapshots(&creative.id, window.baseline_start, window.recent_end)
            .await?;
        let history_since = today - Duration::days(i64::from(t.history_days));
        let prior: Vec<FatigueVerdict> = self
            .ctx
            .store
            .fatigue_verdicts(&creative.id, history_since)
            .await?
            .into_iter()
            .filter(|v| v.analysis_date < today)
            .collect();

        let verdict = self.evaluate(&creative, &snapshots, &prior, window);
        self.ctx.store.upsert_fatigue_verdict(&verdict).await?;

        if let Some(ref metrics) = self.ctx.metrics {
            metrics.record_fatigue_verdict(verdict.severity.as_str());
        }
        info!(
            creative = %creative.id,
            severity = verdict.severity.as_str(),
            score = verdict.score,
            signals = verdict.signals.len(),
            "Fatigue verdict recorded"
        );

        if verdict.severity >= t.notify_min_severity {
            self.ctx
                .notify(
                    EventType::FatigueDetected,
                    notification_severity(verdict.severity),
                    &verdict.creative_id,
                    &verdict,
                )
                .await;
        }

        Ok(verdict)
    }

    /// Pure verdict computation over already-loaded rows
    fn evaluate(
        &self,
        creative: &Creative,
        snapshots: &[MetricSnapshot],
        prior: &[FatigueVerdict],
        window: Windows,
    ) -> FatigueVerdict {
        let t = &self.ctx.thresholds.fatigue;
        let now = self.ctx.clock.now();

        let (baseline, recent): (Vec<MetricSnapshot>, Vec<MetricSnapshot>) = snapshots
            .iter()
            .cloned()
            .partition(|s| s.date <= window.baseline_end);
        let baseline_totals = MetricTotals::from_snapshots(&baseline);
        let recent_totals = MetricTotals::from_snapshots(&recent);
        let creative_age_days = creative.age_days(now);

        let input = SignalInput {
            recent: &recent,
            baseline: &baseline,
            recent_totals: &recent_totals,
            baseline_totals: &baseline_totals,
            creative_age_days,
        };
        let signals = self.registry.detect_all(&input, t);

        let score = verdict_score(&signals);
        let severity = t.verdict.classify(score);
        let lifespan = project_lifespan(&signals, severity, window.recent_end, t);
        let history = compare_history(score, prior);
        let actions = remediation::plan(&signals, severity);

        FatigueVerdict {
            creative_id: creative.id.clone(),
            ad_group_id: creative.ad_group_id.clone(),
            analysis_date: window.recent_end,
            analyzed_at: now,
            severity,
            score,
            signals,
            windows: FatigueWindows {
                recent_start: window.recent_start,
                recent_end: window.recent_end,
                baseline_start: window.baseline_start,
                baseline_end: window.baseline_end,
                recent: recent_totals,
                baseline: baseline_totals,
                creative_age_days,
            },
            history,
            lifespan,
            actions,
        }
    }

    /// Detect fatigue for many creatives; failures are recorded, not raised
    pub async fn detect_batch(&self, creative_ids: &[String]) -> BatchFatigueReport {
        let outcomes: Vec<(String, Result<FatigueVerdict, EngineError>)> =
            stream::iter(creative_ids.iter().cloned())
                .map(|id| async move {
                    let result = self.detect(&id).await;
                    (id, result)
                })
                .buffered(BATCH_CONCURRENCY)
                .collect()
                .await;

        let mut report = BatchFatigueReport {
            requested: creative_ids.len(),
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(verdict) => report.verdicts.push(verdict),
                Err(e) => {
                    warn!(creative = %id, error = %e, "Fatigue detection failed for batch item");
                    report.failures.push(BatchFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }

        summarize_batch(&mut report);
        info!(
            requested = report.requested,
            analyzed = report.analyzed,
            fatigued = report.fatigued,
            failures = report.failures.len(),
            "Fatigue batch complete"
        );
        report
    }

    /// Batch detection over every enabled creative of a campaign
    pub async fn detect_campaign(&self, campaign_id: &str) -> Result<BatchFatigueReport, EngineError> {
        let creatives = self.ctx.store.creatives_in_campaign(campaign_id).await?;
        if creatives.is_empty() {
            return Err(EngineError::not_found("campaign", campaign_id));
        }
        let ids: Vec<String> = creatives
            .into_iter()
            .filter(Creative::is_active)
            .map(|c| c.id)
            .collect();
        Ok(self.detect_batch(&ids).await)
    }

    /// Stored verdicts of the last `days` days, oldest first
    pub async fn history(
        &self,
        creative_id: &str,
        days: Option<u32>,
    ) -> Result<Vec<FatigueVerdict>, EngineError> {
        if self.ctx.store.get_creative(creative_id).await?.is_none() {
            return Err(EngineError::not_found("creative", creative_id));
        }
        let days = days.unwrap_or(self.ctx.thresholds.fatigue.history_days);
        let since = self.ctx.clock.today() - Duration::days(i64::from(days));
        Ok(self.ctx.store.fatigue_verdicts(creative_id, since).await?)
    }
}

/// Recent window ending today and the baseline window right before it
#[derive(Clone, Copy, Debug, PartialEq)]
struct Windows {
    recent_start: NaiveDate,
    recent_end: NaiveDate,
    baseline_start: NaiveDate,
    baseline_end: NaiveDate,
}

impl Windows {
    fn ending(today: NaiveDate, t: &FatigueThresholds) -> Self {
        let recent_start = today - Duration::days(i64::from(t.recent_window_days.max(1)) - 1);
        let baseline_end = recent_start - Duration::days(1);
        let baseline_start = baseline_end - Duration::days(i64::from(t.baseline_window_days.max(1)) - 1);
        Windows {
            recent_start,
            recent_end: today,
            baseline_start,
            baseline_end,
        }
    }
}

/// Confidence-weighted average of signal severity points
pub fn verdict_score(signals: &[FatigueSignal]) -> f64 {
    let weight: f64 = signals.iter().map(|s| s.confidence).sum();
    if weight <= 0.0 {
        return 0.0;
    }
    let points: f64 = signals
        .iter()
        .map(|s| s.severity.points() * s.confidence)
        .sum();
    (points / weight).clamp(0.0, 100.0)
}

/// Base lifespan for the verdict, shortened by each severe signal
pub fn project_lifespan(
    signals: &[FatigueSignal],
    severity: FatigueSeverity,
    today: NaiveDate,
    t: &FatigueThresholds,
) -> LifespanProjection {
    let severe_signal_count = signals
        .iter()
        .filter(|s| s.severity >= FatigueSeverity::Severe)
        .count();
    let base = t.lifespan_days.for_severity(severity);
    let days_remaining = base / (1 + severe_signal_count as u32);

    LifespanProjection {
        days_remaining,
        refresh_by: today + Duration::days(i64::from(days_remaining)),
        severe_signal_count,
    }
}

fn compare_history(score: f64, prior: &[FatigueVerdict]) -> HistoricalComparison {
    let Some(previous) = prior.iter().max_by_key(|v| v.analysis_date) else {
        return HistoricalComparison {
            prior_verdicts: 0,
            previous_score: None,
            previous_severity: None,
            score_delta: 0.0,
            trend: HistoricalTrend::FirstAnalysis,
        };
    };

    let score_delta = score - previous.score;
    let trend = if score_delta > HISTORY_TREND_DELTA {
        HistoricalTrend::Worsening
    } else if score_delta < -HISTORY_TREND_DELTA {
        HistoricalTrend::Improving
    } else {
        HistoricalTrend::Stable
    };

    HistoricalComparison {
        prior_verdicts: prior.len(),
        previous_score: Some(previous.score),
        previous_severity: Some(previous.severity),
        score_delta,
        trend,
    }
}

fn summarize_batch(report: &mut BatchFatigueReport) {
    report.analyzed = report.verdicts.len();
    report.fatigued = report.verdicts.iter().filter(|v| v.is_fatigued()).count();
    report.fatigue_rate = if report.analyzed > 0 {
        report.fatigued as f64 / report.analyzed as f64
    } else {
        0.0
    };
    for verdict in &report.verdicts {
        *report.severity_counts.entry(verdict.severity).or_insert(0) += 1;
        for step in &verdict.actions {
            *report.action_counts.entry(step.action).or_insert(0) += 1;
        }
    }
}

fn notification_severity(severity: FatigueSeverity) -> Severity {
    match severity {
        FatigueSeverity::Critical => Severity::Critical,
        FatigueSeverity::Severe => Severity::Error,
        FatigueSeverity::Moderate => Severity::Warning,
        FatigueSeverity::Mild | FatigueSeverity::None => Severity::Info,
    }
}

#[cfg(test)]
#[path = "fatigue_test.rs"]
mod tests;
