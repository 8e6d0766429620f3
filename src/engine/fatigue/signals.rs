//! Fatigue signal detectors
//!
//! Each [`FatigueSignalType`] maps to one [`SignalDetector`] in a
//! [`DetectorRegistry`] built at construction time. A detector returns None
//! when its metric shows no fatigue or lacks the volume to judge.

use crate::config::{FatigueThresholds, SeverityBands};
use crate::engine::statistics::{pooled_two_sample_z, proportion_z_test, two_sided_p};
use crate::model::creative::{MetricSnapshot, MetricTotals};
use crate::model::fatigue::{FatigueSeverity, FatigueSignal, FatigueSignalType};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Recent and baseline windows of one creative
pub struct SignalInput<'a> {
    pub recent: &'a [MetricSnapshot],
    pub baseline: &'a [MetricSnapshot],
    pub recent_totals: &'a MetricTotals,
    pub baseline_totals: &'a MetricTotals,
    pub creative_age_days: i64,
}

pub trait SignalDetector: Send + Sync {
    fn detect(&self, input: &SignalInput<'_>, t: &FatigueThresholds) -> Option<FatigueSignal>;
}

/// Detector lookup keyed by the closed signal type
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: BTreeMap<FatigueSignalType, Arc<dyn SignalDetector>>,
}

impl DetectorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in detector for every signal type
    pub fn standard() -> Self {
        FatigueSignalType::ALL
            .iter()
            .fold(Self::empty(), |registry, ty| {
                registry.register_arc(*ty, standard_detector(*ty))
            })
    }

    /// Replace the detector for one signal type
    pub fn register(self, signal_type: FatigueSignalType, detector: impl SignalDetector + 'static) -> Self {
        self.register_arc(signal_type, Arc::new(detector))
    }

    fn register_arc(mut self, signal_type: FatigueSignalType, detector: Arc<dyn SignalDetector>) -> Self {
        self.detectors.insert(signal_type, detector);
        self
    }

    pub fn signal_types(&self) -> Vec<FatigueSignalType> {
        self.detectors.keys().copied().collect()
    }

    /// Run every registered detector, in signal-type order
    pub fn detect_all(&self, input: &SignalInput<'_>, t: &FatigueThresholds) -> Vec<FatigueSignal> {
        self.detectors
            .values()
            .filter_map(|d| d.detect(input, t))
            .filter(|s| s.severity > FatigueSeverity::None)
            .collect()
    }
}

fn standard_detector(signal_type: FatigueSignalType) -> Arc<dyn SignalDetector> {
    match signal_type {
        FatigueSignalType::CtrDecline => Arc::new(RateDeclineDetector {
            metric: RateMetric::Ctr,
        }),
        FatigueSignalType::CvrDecline => Arc::new(RateDeclineDetector {
            metric: RateMetric::Cvr,
        }),
        FatigueSignalType::FrequencyIncrease => Arc::new(FrequencyDetector),
        FatigueSignalType::CpcIncrease => Arc::new(CpcIncreaseDetector),
        FatigueSignalType::CreativeStaleness => Arc::new(StalenessDetector),
        FatigueSignalType::QualityScoreDecline => Arc::new(QualityScoreDetector),
    }
}

#[derive(Clone, Copy, Debug)]
enum RateMetric {
    Ctr,
    Cvr,
}

impl RateMetric {
    /// (successes, trials) of one day or window
    fn counts(&self, impressions: u64, clicks: u64, conversions: u64) -> (u64, u64) {
        match self {
            RateMetric::Ctr => (clicks, impressions),
            RateMetric::Cvr => (conversions, clicks),
        }
    }

    fn signal_type(&self) -> FatigueSignalType {
        match self {
            RateMetric::Ctr => FatigueSignalType::CtrDecline,
            RateMetric::Cvr => FatigueSignalType::CvrDecline,
        }
    }

    fn bands<'a>(&self, t: &'a FatigueThresholds) -> &'a SeverityBands {
        match self {
            RateMetric::Ctr => &t.ctr_decline,
            RateMetric::Cvr => &t.cvr_decline,
        }
    }

    fn min_trials(&self, t: &FatigueThresholds) -> u64 {
        match self {
            RateMetric::Ctr => t.min_window_impressions,
            RateMetric::Cvr => t.min_window_clicks,
        }
    }

    fn daily_rates(&self, days: &[MetricSnapshot]) -> Vec<f64> {
        days.iter()
            .map(|s| self.counts(s.impressions, s.clicks, s.conversions))
            .filter(|(_, trials)| *trials > 0)
            .map(|(successes, trials)| successes as f64 / trials as f64)
            .collect()
    }
}

/// CTR or CVR decline: relative drop must reach a band AND be significant
struct RateDeclineDetector {
    metric: RateMetric,
}

impl SignalDetector for RateDeclineDetector {
    fn detect(&self, input: &SignalInput<'_>, t: &FatigueThresholds) -> Option<FatigueSignal> {
        let b = input.baseline_totals;
        let r = input.recent_totals;
        let (b_successes, b_trials) = self.metric.counts(b.impressions, b.clicks, b.conversions);
        let (r_successes, r_trials) = self.metric.counts(r.impressions, r.clicks, r.conversions);

        let min_trials = self.metric.min_trials(t);
        if b_trials < min_trials || r_trials < min_trials || b_successes == 0 {
            return None;
        }

        let baseline_rate = b_successes as f64 / b_trials as f64;
        let recent_rate = r_successes as f64 / r_trials as f64;

        let z = pooled_two_sample_z(
            &self.metric.daily_rates(input.baseline),
            &self.metric.daily_rates(input.recent),
        )
        .or_else(|| proportion_z_test(b_successes, b_trials, r_successes, r_trials, 1).map(|r| r.z))?;

        // Only a significant drop counts
        if z > -t.z_threshold {
            return None;
        }

        let decline = (baseline_rate - recent_rate) / baseline_rate;
        let severity = self.metric.bands(t).classify(decline);
        if severity == FatigueSeverity::None {
            return None;
        }

        let signal_type = self.metric.signal_type();
        Some(FatigueSignal {
            signal_type,
            severity,
            confidence: 1.0 - two_sided_p(z),
            baseline_value: baseline_rate,
            recent_value: recent_rate,
            delta: -decline,
            score: z,
            recommendation: recommendation(signal_type, severity),
        })
    }
}

/// Average impressions per reached user above the frequency bands
struct FrequencyDetector;

impl SignalDetector for FrequencyDetector {
    fn detect(&self, input: &SignalInput<'_>, t: &FatigueThresholds) -> Option<FatigueSignal> {
        if input.recent_totals.impressions < t.min_window_impressions {
            return None;
        }
        let frequency = input.recent_totals.frequency()?;
        let severity = t.frequency.classify_above(frequency);
        if severity == FatigueSeverity::None {
            return None;
        }

        let limit = t.frequency.mild;
        Some(FatigueSignal {
            signal_type: FatigueSignalType::FrequencyIncrease,
            severity,
            confidence: 0.9,
            baseline_value: limit,
            recent_value: frequency,
            delta: (frequency - limit) / limit,
            score: frequency / limit,
            recommendation: recommendation(FatigueSignalType::FrequencyIncrease, severity),
        })
    }
}

struct CpcIncreaseDetector;

impl SignalDetector for CpcIncreaseDetector {
    fn detect(&self, input: &SignalInput<'_>, t: &FatigueThresholds) -> Option<FatigueSignal> {
        let b = input.baseline_totals;
        let r = input.recent_totals;
        if b.clicks < t.min_window_clicks || r.clicks < t.min_window_clicks {
            return None;
        }
        let baseline_cpc = b.cpc();
        if baseline_cpc <= 0.0 {
            return None;
        }

        let recent_cpc = r.cpc();
        let rise = (recent_cpc - baseline_cpc) / baseline_cpc;
        let severity = t.cpc_increase.classify(rise);
        if severity == FatigueSeverity::None {
            return None;
        }

        Some(FatigueSignal {
            signal_type: FatigueSignalType::CpcIncrease,
            severity,
            confidence: (r.clicks as f64 / 100.0).min(1.0),
            baseline_value: baseline_cpc,
            recent_value: recent_cpc,
            delta: rise,
            score: recent_cpc / baseline_cpc,
            recommendation: recommendation(FatigueSignalType::CpcIncrease, severity),
        })
    }
}

/// Age of the creative itself
struct StalenessDetector;

impl SignalDetector for StalenessDetector {
    fn detect(&self, input: &SignalInput<'_>, t: &FatigueThresholds) -> Option<FatigueSignal> {
        let age = input.creative_age_days as f64;
        let severity = t.staleness_days.classify(age);
        if severity == FatigueSeverity::None {
            return None;
        }

        let limit = t.staleness_days.mild;
        Some(FatigueSignal {
            signal_type: FatigueSignalType::CreativeStaleness,
            severity,
            confidence: 1.0,
            baseline_value: limit,
            recent_value: age,
            delta: (age - limit) / limit,
            score: age / limit,
            recommendation: recommendation(FatigueSignalType::CreativeStaleness, severity),
        })
    }
}

/// Drop of the mean platform quality score, in points
struct QualityScoreDetector;

impl QualityScoreDetector {
    fn mean(days: &[MetricSnapshot]) -> Option<f64> {
        let scores: Vec<f64> = days.iter().filter_map(|s| s.quality_score).collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

impl SignalDetector for QualityScoreDetector {
    fn detect(&self, input: &SignalInput<'_>, t: &FatigueThresholds) -> Option<FatigueSignal> {
        let baseline = Self::mean(input.baseline)?;
        let recent = Self::mean(input.recent)?;
        let drop = baseline - recent;
        let severity = t.quality_score_drop.classify(drop);
        if severity == FatigueSeverity::None {
            return None;
        }

        Some(FatigueSignal {
            signal_type: FatigueSignalType::QualityScoreDecline,
            severity,
            confidence: 0.85,
            baseline_value: baseline,
            recent_value: recent,
            delta: if baseline > 0.0 { -drop / baseline } else { 0.0 },
            score: drop,
            recommendation: recommendation(FatigueSignalType::QualityScoreDecline, severity),
        })
    }
}

fn recommendation(signal_type: FatigueSignalType, severity: FatigueSeverity) -> String {
    let urgent = severity >= FatigueSeverity::Severe;
    match signal_type {
        FatigueSignalType::CtrDecline if urgent => {
            "Replace the creative; engagement has dropped sharply".to_string()
        }
        FatigueSignalType::CtrDecline => "Test a refreshed headline or visual".to_string(),
        FatigueSignalType::CvrDecline if urgent => {
            "Check the landing page and offer; conversions have collapsed".to_string()
        }
        FatigueSignalType::CvrDecline => "Review landing page relevance".to_string(),
        FatigueSignalType::FrequencyIncrease if urgent => {
            "Audience is saturated; pause or broaden targeting".to_string()
        }
        FatigueSignalType::FrequencyIncrease => "Expand the audience or add a frequency cap".to_string(),
        FatigueSignalType::CpcIncrease => "Review bids and auction competition".to_string(),
        FatigueSignalType::CreativeStaleness if urgent => {
            "Creative has run too long; schedule a replacement".to_string()
        }
        FatigueSignalType::CreativeStaleness => "Plan a creative refresh".to_string(),
        FatigueSignalType::QualityScoreDecline => {
            "Improve ad relevance and landing page experience".to_string()
        }
    }
}
