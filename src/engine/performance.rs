//! Performance Analyzer
//!
//! Aggregates daily snapshots into per-creative profiles, scores and ranks
//! creatives inside an ad group, and derives ad-group health with tiered
//! recommendations. Nothing here is persisted.

use crate::config::{band_points, PerformanceThresholds};
use crate::engine::{Context, EngineError};
use crate::model::creative::{Creative, CreativeStatus, MetricSnapshot, MetricTotals};
use crate::model::performance::{
    AdGroupHealth, AdGroupPerformance, HealthStatus, MetricTrend, PerformanceProfile,
    TieredRecommendations, TrendDirection, TrendSummary,
};
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Clone)]
pub struct PerformanceAnalyzer {
    ctx: Arc<Context>,
}

impl PerformanceAnalyzer {
    pub fn new(ctx: Arc<Context>) -> Self {
        PerformanceAnalyzer { ctx }
    }

    /// Profile a single creative over the lookback window ending today
    pub async fn analyze_creative(
        &self,
        creative_id: &str,
        lookback_days: Option<u32>,
    ) -> Result<PerformanceProfile, EngineError> {
        let started = Instant::now();
        let result = self.analyze_creative_inner(creative_id, lookback_days).await;
        self.ctx.observe("analyze_creative", started, &result);
        result
    }

    async fn analyze_creative_inner(
        &self,
        creative_id: &str,
        lookback_days: Option<u32>,
    ) -> Result<PerformanceProfile, EngineError> {
        let creative = self
            .ctx
            .store
            .get_creative(creative_id)
            .await?
            .ok_or_else(|| EngineError::not_found("creative", creative_id))?;

        let (start, end) = self.window(lookback_days);
        self.profile(&creative, start, end).await
    }

    /// Rank every creative in an ad group and assess the group's health
    pub async fn analyze_ad_group(
        &self,
        ad_group_id: &str,
        lookback_days: Option<u32>,
    ) -> Result<AdGroupPerformance, EngineError> {
        let started = Instant::now();
        let result = self.analyze_ad_group_inner(ad_group_id, lookback_days).await;
        self.ctx.observe("analyze_ad_group", started, &result);
        result
    }

    async fn analyze_ad_group_inner(
        &self,
        ad_group_id: &str,
        lookback_days: Option<u32>,
    ) -> Result<AdGroupPerformance, EngineError> {
        let creatives: Vec<Creative> = self
            .ctx
            .store
            .creatives_in_ad_group(ad_group_id)
            .await?
            .into_iter()
            .filter(|c| c.status != CreativeStatus::Removed)
            .collect();

        if creatives.is_empty() {
            return Err(EngineError::EmptyAdGroup(ad_group_id.to_string()));
        }

        let lookback = self.lookback(lookback_days);
        let (start, end) = self.window(Some(lookback));

        let mut profiles = Vec::with_capacity(creatives.len());
        for creative in &creatives {
            profiles.push(self.profile(creative, start, end).await?);
        }

        let t = &self.ctx.thresholds.performance;
        let analysis = summarize_ad_group(ad_group_id, lookback, profiles, t);

        info!(
            ad_group = %ad_group_id,
            creatives = analysis.creative_count,
            health = ?analysis.health.status,
            score = analysis.health.score,
            "Ad group analyzed"
        );
        Ok(analysis)
    }

    async fn profile(
        &self,
        creative: &Creative,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PerformanceProfile, EngineError> {
        let snapshots = self.ctx.store.snapshots(&creative.id, start, end).await?;
        let profile = build_profile(
            creative,
            &snapshots,
            start,
            end,
            &self.ctx.thresholds.performance,
        );
        debug!(
            creative = %creative.id,
            days = profile.days_with_data,
            score = profile.score,
            "Creative profiled"
        );
        Ok(profile)
    }

    fn lookback(&self, lookback_days: Option<u32>) -> u32 {
        lookback_days
            .unwrap_or(self.ctx.thresholds.performance.lookback_days)
            .max(1)
    }

    fn window(&self, lookback_days: Option<u32>) -> (NaiveDate, NaiveDate) {
        let end = self.ctx.clock.today();
        let start = end - Duration::days(i64::from(self.lookback(lookback_days)) - 1);
        (start, end)
    }
}

/// Build a profile from the snapshots inside `[start, end]`
///
/// Days without a row count as zero activity; a creative without any rows
/// gets a zero score and neutral trends.
pub fn build_profile(
    creative: &Creative,
    snapshots: &[MetricSnapshot],
    start: NaiveDate,
    end: NaiveDate,
    t: &PerformanceThresholds,
) -> PerformanceProfile {
    let totals = MetricTotals::from_snapshots(snapshots);
    let trends = compute_trends(&creative.id, snapshots, end, totals.impressions, t);
    let score = performance_score(&totals, &trends, t);

    PerformanceProfile {
        creative_id: creative.id.clone(),
        ad_group_id: creative.ad_group_id.clone(),
        status: creative.status,
        window_start: start,
        window_end: end,
        days_with_data: snapshots.len(),
        ctr: totals.ctr(),
        cvr: totals.cvr(),
        cpa: totals.cpa(),
        roas: totals.roas(),
        totals,
        trends,
        score,
        rank: None,
    }
}

/// Daily series from the first observed day to `end`, gaps filled with zeros
fn daily_series(creative_id: &str, snapshots: &[MetricSnapshot], end: NaiveDate) -> Vec<MetricSnapshot> {
    let Some(first) = snapshots.iter().map(|s| s.date).min() else {
        return Vec::new();
    };

    let mut series = Vec::new();
    let mut rows = snapshots.iter().peekable();
    let mut day = first;
    while day <= end {
        match rows.peek() {
            Some(s) if s.date == day => {
                series.push((*s).clone());
                rows.next();
            }
            _ => series.push(MetricSnapshot::empty(creative_id, day)),
        }
        day += Duration::days(1);
    }
    series
}

/// Early-half versus recent-half trends for CTR, CVR and volume
pub fn compute_trends(
    creative_id: &str,
    snapshots: &[MetricSnapshot],
    end: NaiveDate,
    total_impressions: u64,
    t: &PerformanceThresholds,
) -> TrendSummary {
    if snapshots.len() < t.min_trend_snapshots {
        return TrendSummary::neutral();
    }

    let series = daily_series(creative_id, snapshots, end);
    let (early, recent) = series.split_at(series.len() / 2);
    let early_totals = MetricTotals::from_snapshots(early);
    let recent_totals = MetricTotals::from_snapshots(recent);
    let confidence = (total_impressions as f64 / t.trend_confidence_volume as f64).min(1.0);

    let daily_ctr: Vec<f64> = series
        .iter()
        .filter(|s| s.impressions > 0)
        .map(|s| s.clicks as f64 / s.impressions as f64)
        .collect();
    let daily_cvr: Vec<f64> = series
        .iter()
        .filter(|s| s.clicks > 0)
        .map(|s| s.conversions as f64 / s.clicks as f64)
        .collect();
    let daily_volume: Vec<f64> = series.iter().map(|s| s.impressions as f64).collect();

    TrendSummary {
        ctr: classify_trend(
            early_totals.ctr(),
            recent_totals.ctr(),
            &daily_ctr,
            t.rate_trend_threshold,
            t.volatility_cv,
            confidence,
        ),
        cvr: classify_trend(
            early_totals.cvr(),
            recent_totals.cvr(),
            &daily_cvr,
            t.rate_trend_threshold,
            t.volatility_cv,
            confidence,
        ),
        volume: classify_trend(
            early_totals.impressions as f64 / early.len().max(1) as f64,
            recent_totals.impressions as f64 / recent.len().max(1) as f64,
            &daily_volume,
            t.volume_trend_threshold,
            t.volatility_cv,
            confidence,
        ),
    }
}

fn classify_trend(
    early: f64,
    recent: f64,
    daily: &[f64],
    threshold: f64,
    volatility_cv: f64,
    confidence: f64,
) -> MetricTrend {
    // No early baseline means no relative change to judge
    if early <= 0.0 {
        return MetricTrend {
            direction: TrendDirection::Stable,
            change: 0.0,
            confidence,
        };
    }

    let change = (recent - early) / early;
    let direction = if change > threshold {
        TrendDirection::Improving
    } else if change < -threshold {
        TrendDirection::Declining
    } else if coefficient_of_variation(daily) > volatility_cv {
        TrendDirection::Volatile
    } else {
        TrendDirection::Stable
    };

    MetricTrend {
        direction,
        change,
        confidence,
    }
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// +1 improving, -1 declining, 0 otherwise
pub fn trend_sign(trend: &MetricTrend) -> f64 {
    match trend.direction {
        TrendDirection::Improving => 1.0,
        TrendDirection::Declining => -1.0,
        TrendDirection::Stable | TrendDirection::Volatile => 0.0,
    }
}

/// Banded 0-100 score
pub fn performance_score(
    totals: &MetricTotals,
    trends: &TrendSummary,
    t: &PerformanceThresholds,
) -> f64 {
    let base = band_points(totals.ctr(), &t.ctr_bands)
        + band_points(totals.cvr(), &t.cvr_bands)
        + band_points(totals.roas(), &t.roas_bands)
        + band_points(totals.impressions as f64, &t.volume_bands);

    let bonus = trend_sign(&trends.ctr) * t.ctr_trend_bonus * trends.ctr.confidence
        + trend_sign(&trends.cvr) * t.cvr_trend_bonus * trends.cvr.confidence;

    let score = base + bonus;
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Dense ranks by descending score for profiles above the impressions floor
///
/// Returns profiles ranked first, then unranked ones by id.
pub fn rank_profiles(
    mut profiles: Vec<PerformanceProfile>,
    min_impressions: u64,
) -> Vec<PerformanceProfile> {
    profiles.sort_by(|a, b| {
        let a_eligible = a.totals.impressions >= min_impressions;
        let b_eligible = b.totals.impressions >= min_impressions;
        b_eligible
            .cmp(&a_eligible)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.creative_id.cmp(&b.creative_id))
    });

    let mut rank = 0u32;
    let mut last_score: Option<f64> = None;
    for profile in profiles.iter_mut() {
        if profile.totals.impressions < min_impressions {
            profile.rank = None;
            continue;
        }
        if last_score != Some(profile.score) {
            rank += 1;
            last_score = Some(profile.score);
        }
        profile.rank = Some(rank);
    }

    let (mut ranked, mut unranked): (Vec<_>, Vec<_>) =
        profiles.into_iter().partition(|p| p.rank.is_some());
    unranked.sort_by(|a, b| a.creative_id.cmp(&b.creative_id));
    ranked.append(&mut unranked);
    ranked
}

pub fn summarize_ad_group(
    ad_group_id: &str,
    lookback_days: u32,
    profiles: Vec<PerformanceProfile>,
    t: &PerformanceThresholds,
) -> AdGroupPerformance {
    let profiles = rank_profiles(profiles, t.min_impressions_for_rank);
    let ranked: Vec<&PerformanceProfile> = profiles.iter().filter(|p| p.rank.is_some()).collect();

    let top_performers: Vec<String> = ranked
        .iter()
        .filter(|p| p.score >= t.top_score)
        .take(t.max_top_performers)
        .map(|p| p.creative_id.clone())
        .collect();
    let poor_performers: Vec<String> = ranked
        .iter()
        .filter(|p| p.score < t.poor_score)
        .map(|p| p.creative_id.clone())
        .collect();
    let unranked: Vec<String> = profiles
        .iter()
        .filter(|p| p.rank.is_none())
        .map(|p| p.creative_id.clone())
        .collect();
    let active_count = profiles
        .iter()
        .filter(|p| p.status == CreativeStatus::Enabled)
        .count();

    let health = assess_health(&profiles, &poor_performers, active_count, t);
    let recommendations = recommend(
        &profiles,
        &top_performers,
        &poor_performers,
        &unranked,
        active_count,
        &health,
        t,
    );

    AdGroupPerformance {
        ad_group_id: ad_group_id.to_string(),
        lookback_days,
        creative_count: profiles.len(),
        active_count,
        top_performers,
        poor_performers,
        unranked,
        health,
        recommendations,
        profiles,
    }
}

fn assess_health(
    profiles: &[PerformanceProfile],
    poor_performers: &[String],
    active_count: usize,
    t: &PerformanceThresholds,
) -> AdGroupHealth {
    let ranked: Vec<&PerformanceProfile> = profiles.iter().filter(|p| p.rank.is_some()).collect();
    let scored: Vec<&PerformanceProfile> = if ranked.is_empty() {
        profiles.iter().collect()
    } else {
        ranked.clone()
    };
    let score = if scored.is_empty() {
        0.0
    } else {
        scored.iter().map(|p| p.score).sum::<f64>() / scored.len() as f64
    };

    let mut issues = Vec::new();
    if active_count < t.min_active_creatives {
        issues.push(format!(
            "Only {} active creative(s); at least {} are needed for rotation",
            active_count, t.min_active_creatives
        ));
    }
    if active_count > t.max_active_creatives {
        issues.push(format!(
            "{} active creatives dilute traffic; keep at most {}",
            active_count, t.max_active_creatives
        ));
    }
    if !ranked.is_empty() {
        let poor_fraction = poor_performers.len() as f64 / ranked.len() as f64;
        if poor_fraction > t.poor_fraction_limit {
            issues.push(format!(
                "{:.0}% of ranked creatives score below {:.0}",
                poor_fraction * 100.0,
                t.poor_score
            ));
        }
    }
    if !profiles.is_empty() {
        let declining = profiles
            .iter()
            .filter(|p| p.trends.ctr.direction == TrendDirection::Declining)
            .count();
        let declining_fraction = declining as f64 / profiles.len() as f64;
        if declining_fraction > t.declining_fraction_limit {
            issues.push(format!(
                "CTR is declining on {:.0}% of creatives",
                declining_fraction * 100.0
            ));
        }
    }

    let status = if score >= 75.0 && issues.is_empty() {
        HealthStatus::Excellent
    } else if score >= 60.0 && issues.is_empty() {
        HealthStatus::Good
    } else if score >= 40.0 && issues.len() <= 2 {
        HealthStatus::Fair
    } else {
        HealthStatus::Poor
    };

    AdGroupHealth {
        score,
        status,
        issues,
    }
}

fn recommend(
    profiles: &[PerformanceProfile],
    top_performers: &[String],
    poor_performers: &[String],
    unranked: &[String],
    active_count: usize,
    health: &AdGroupHealth,
    t: &PerformanceThresholds,
) -> TieredRecommendations {
    let mut recs = TieredRecommendations::default();

    for id in poor_performers {
        recs.immediate
            .push(format!("Pause or refresh creative {} (score below {:.0})", id, t.poor_score));
    }
    for p in profiles {
        if p.trends.ctr.direction == TrendDirection::Declining && p.trends.ctr.confidence >= 0.5 {
            recs.immediate.push(format!(
                "Investigate CTR decline of {:.0}% on creative {}",
                -p.trends.ctr.change * 100.0,
                p.creative_id
            ));
        }
    }
    if active_count < t.min_active_creatives {
        recs.immediate
            .push("Add creatives so the ad group can rotate between variants".to_string());
    }

    for id in top_performers {
        recs.short_term
            .push(format!("Shift more traffic to top performer {}", id));
    }
    if !unranked.is_empty() {
        recs.short_term.push(format!(
            "Let {} creative(s) reach {} impressions before judging them",
            unranked.len(),
            t.min_impressions_for_rank
        ));
    }
    for p in profiles {
        if p.trends.ctr.direction == TrendDirection::Volatile {
            recs.short_term
                .push(format!("Monitor volatile CTR on creative {}", p.creative_id));
        }
    }

    if let Some(best) = top_performers.first() {
        recs.strategic
            .push(format!("Test new variants derived from creative {}", best));
    }
    if active_count > t.max_active_creatives {
        recs.strategic
            .push("Consolidate the ad group around fewer, stronger creatives".to_string());
    }
    if health.status == HealthStatus::Poor {
        recs.strategic
            .push("Rework the ad group's messaging; most creatives underperform".to_string());
    }

    recs
}

#[cfg(test)]
#[path = "performance_test.rs"]
mod tests;
