//! Statistical analyzers behind the experiment state machine
//!
//! Each `StatisticalMethod` maps to one `StatisticalAnalyzer`; the framework
//! only sees the trait, so methods can be swapped without touching lifecycle
//! code.

use crate::engine::statistics::{
    log_ratio_z_test, normal_cdf, normal_pdf, obrien_fleming_alpha, proportion_z_test, z_quantile,
};
use crate::engine::EngineError;
use crate::model::experiment::{
    ArmSummary, BayesianSummary, ExperimentConfig, ExperimentMetric, MetricResult,
    StatisticalMethod,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Both arms plus what the analyzer needs to judge them
pub struct Comparison<'a> {
    pub control: &'a ArmSummary,
    pub test: &'a ArmSummary,
    pub config: &'a ExperimentConfig,
    /// Per-arm events below which no test statistic is computed
    pub min_sample: u64,
    /// Current / required sample size, 0 to 1
    pub information_fraction: f64,
}

pub trait StatisticalAnalyzer: Send + Sync {
    fn compare(&self, metric: ExperimentMetric, input: &Comparison) -> MetricResult;

    /// Posterior summary of the primary metric, for methods that have one
    fn posterior(&self, _metric: ExperimentMetric, _input: &Comparison) -> Option<BayesianSummary> {
        None
    }
}

/// How a metric is sampled from an arm
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricSample {
    /// successes / trials
    Proportion { successes: u64, trials: u64 },
    /// amount / events, compared on the log scale
    Ratio { value: f64, events: u64 },
}

pub fn metric_sample(metric: ExperimentMetric, arm: &ArmSummary) -> MetricSample {
    match metric {
        ExperimentMetric::Ctr => MetricSample::Proportion {
            successes: arm.clicks,
            trials: arm.impressions,
        },
        ExperimentMetric::Cvr => MetricSample::Proportion {
            successes: arm.conversions,
            trials: arm.clicks,
        },
        ExperimentMetric::Cpa => MetricSample::Ratio {
            value: ratio(arm.spend, arm.conversions as f64),
            events: arm.conversions,
        },
        ExperimentMetric::Cpc => MetricSample::Ratio {
            value: ratio(arm.spend, arm.clicks as f64),
            events: arm.clicks,
        },
        ExperimentMetric::Roas => MetricSample::Ratio {
            value: ratio(arm.revenue, arm.spend),
            events: arm.conversions,
        },
    }
}

/// Observed value of a metric for one arm
pub fn metric_value(metric: ExperimentMetric, arm: &ArmSummary) -> f64 {
    match metric_sample(metric, arm) {
        MetricSample::Proportion { successes, trials } => ratio(successes as f64, trials as f64),
        MetricSample::Ratio { value, .. } => value,
    }
}

/// Sample size the metric is measured over for one arm
pub fn sample_size(metric: ExperimentMetric, arm: &ArmSummary) -> u64 {
    match metric_sample(metric, arm) {
        MetricSample::Proportion { trials, .. } => trials,
        MetricSample::Ratio { events, .. } => events,
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Z-test at a given significance level
fn z_test_result(metric: ExperimentMetric, input: &Comparison, alpha: f64) -> MetricResult {
    let control_value = metric_value(metric, input.control);
    let test_value = metric_value(metric, input.test);
    let absolute_change = test_value - control_value;
    let relative_change = ratio(absolute_change, control_value);
    let z_crit = z_quantile(1.0 - alpha / 2.0);

    let (p_value, confidence_interval) = match (
        metric_sample(metric, input.control),
        metric_sample(metric, input.test),
    ) {
        (
            MetricSample::Proportion {
                successes: sc,
                trials: tc,
            },
            MetricSample::Proportion {
                successes: st,
                trials: tt,
            },
        ) => match proportion_z_test(sc, tc, st, tt, input.min_sample) {
            Some(test) => (
                test.p_value,
                (
                    absolute_change - z_crit * test.standard_error,
                    absolute_change + z_crit * test.standard_error,
                ),
            ),
            None => (1.0, (absolute_change, absolute_change)),
        },
        (
            MetricSample::Ratio {
                value: vc,
                events: ec,
            },
            MetricSample::Ratio {
                value: vt,
                events: et,
            },
        ) => match log_ratio_z_test(vc, ec, vt, et, input.min_sample) {
            Some((log_ratio, test)) => {
                // Interval on the ratio, mapped back to an absolute change
                let low = control_value * ((log_ratio - z_crit * test.standard_error).exp() - 1.0);
                let high = control_value * ((log_ratio + z_crit * test.standard_error).exp() - 1.0);
                (test.p_value, (low, high))
            }
            None => (1.0, (absolute_change, absolute_change)),
        },
        _ => (1.0, (absolute_change, absolute_change)),
    };

    MetricResult {
        metric,
        control_value,
        test_value,
        relative_change,
        absolute_change,
        p_value,
        confidence_interval,
        statistically_significant: p_value < alpha,
        practically_significant: relative_change.abs() >= input.config.min_practical_significance,
    }
}

/// Fixed-horizon two-proportion and log-ratio Z-tests
pub struct FrequentistAnalyzer;

impl StatisticalAnalyzer for FrequentistAnalyzer {
    fn compare(&self, metric: ExperimentMetric, input: &Comparison) -> MetricResult {
        z_test_result(metric, input, input.config.significance_level)
    }
}

/// Z-tests against an O'Brien-Fleming boundary
///
/// Early looks need much stronger evidence; at full information the
/// boundary equals the configured significance level.
pub struct SequentialAnalyzer;

impl StatisticalAnalyzer for SequentialAnalyzer {
    fn compare(&self, metric: ExperimentMetric, input: &Comparison) -> MetricResult {
        let alpha = obrien_fleming_alpha(input.config.significance_level, input.information_fraction);
        if alpha <= 0.0 {
            let mut result = z_test_result(metric, input, input.config.significance_level);
            result.statistically_significant = false;
            return result;
        }
        z_test_result(metric, input, alpha)
    }
}

/// Beta-Binomial posteriors with a uniform prior
///
/// Proportion metrics are judged on the posterior difference; ratio metrics
/// fall back to the log-ratio Z-test.
pub struct BayesianAnalyzer;

struct Posterior {
    mean: f64,
    variance: f64,
}

fn beta_posterior(successes: u64, trials: u64) -> Posterior {
    let a = 1.0 + successes as f64;
    let b = 1.0 + trials.saturating_sub(successes) as f64;
    let total = a + b;
    Posterior {
        mean: a / total,
        variance: a * b / (total * total * (total + 1.0)),
    }
}

/// E[max(X, 0)] for X ~ N(mean, sd)
fn expected_positive_part(mean: f64, sd: f64) -> f64 {
    if sd <= 0.0 {
        return mean.max(0.0);
    }
    let z = mean / sd;
    mean * normal_cdf(z) + sd * normal_pdf(z)
}

impl BayesianAnalyzer {
    fn summarize(&self, metric: ExperimentMetric, input: &Comparison) -> Option<BayesianSummary> {
        let (
            MetricSample::Proportion {
                successes: sc,
                trials: tc,
            },
            MetricSample::Proportion {
                successes: st,
                trials: tt,
            },
        ) = (
            metric_sample(metric, input.control),
            metric_sample(metric, input.test),
        )
        else {
            return None;
        };
        if tc < input.min_sample.max(1) || tt < input.min_sample.max(1) {
            return None;
        }

        let control = beta_posterior(sc, tc);
        let test = beta_posterior(st, tt);
        let diff = test.mean - control.mean;
        let sd = (control.variance + test.variance).sqrt();

        let probability_test_better = if sd > 0.0 {
            normal_cdf(diff / sd)
        } else if diff > 0.0 {
            1.0
        } else if diff < 0.0 {
            0.0
        } else {
            0.5
        };
        let z = z_quantile(1.0 - input.config.significance_level / 2.0);

        Some(BayesianSummary {
            probability_test_better,
            // Loss from choosing control when test is better, and vice versa
            expected_loss_control: expected_positive_part(diff, sd),
            expected_loss_test: expected_positive_part(-diff, sd),
            credible_interval: (diff - z * sd, diff + z * sd),
        })
    }
}

impl StatisticalAnalyzer for BayesianAnalyzer {
    fn compare(&self, metric: ExperimentMetric, input: &Comparison) -> MetricResult {
        let mut result = z_test_result(metric, input, input.config.significance_level);
        if let Some(summary) = self.summarize(metric, input) {
            let p = summary.probability_test_better;
            // Posterior probability that the other arm is the better one
            result.p_value = p.min(1.0 - p);
            result.statistically_significant = result.p_value < input.config.significance_level;
            result.confidence_interval = summary.credible_interval;
        }
        result
    }

    fn posterior(&self, metric: ExperimentMetric, input: &Comparison) -> Option<BayesianSummary> {
        self.summarize(metric, input)
    }
}

/// Method to analyzer mapping, injected into the framework
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<StatisticalMethod, Arc<dyn StatisticalAnalyzer>>,
}

impl AnalyzerRegistry {
    pub fn empty() -> Self {
        AnalyzerRegistry::default()
    }

    /// One analyzer per method
    pub fn standard() -> Self {
        AnalyzerRegistry::empty()
            .register(StatisticalMethod::Frequentist, FrequentistAnalyzer)
            .register(StatisticalMethod::Sequential, SequentialAnalyzer)
            .register(StatisticalMethod::Bayesian, BayesianAnalyzer)
    }

    pub fn register(
        mut self,
        method: StatisticalMethod,
        analyzer: impl StatisticalAnalyzer + 'static,
    ) -> Self {
        self.analyzers.insert(method, Arc::new(analyzer));
        self
    }

    pub fn supports(&self, method: StatisticalMethod) -> bool {
        self.analyzers.contains_key(&method)
    }

    pub fn get(&self, method: StatisticalMethod) -> Result<Arc<dyn StatisticalAnalyzer>, EngineError> {
        self.analyzers.get(&method).cloned().ok_or_else(|| {
            EngineError::InvalidConfiguration(format!(
                "no analyzer registered for method {:?}",
                method
            ))
        })
    }
}
