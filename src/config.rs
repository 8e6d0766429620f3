//! Runtime configuration
//!
//! Process settings come from `LUOVA_*` environment variables. Heuristic
//! constants used by the analyzers live in [`Thresholds`], which can be
//! overridden from a JSON file named by `LUOVA_THRESHOLDS_FILE`.

use crate::model::fatigue::FatigueSeverity;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default port for the API, health and metrics server
pub const DEFAULT_PORT: u16 = 8080;

/// Default SQLite database path
pub const DEFAULT_DB_PATH: &str = "luova.db";

/// Database path that selects the in-memory store
pub const MEMORY_DB_PATH: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read thresholds file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid thresholds file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Process settings read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub db_path: String,
    pub events_enabled: bool,
    pub events_sink_url: Option<String>,
    pub thresholds_file: Option<String>,
}

impl Settings {
    /// Read settings from environment variables:
    /// - LUOVA_PORT: server port (default: 8080)
    /// - LUOVA_DB_PATH: SQLite path, `:memory:` for the in-memory store (default: luova.db)
    /// - LUOVA_EVENTS_ENABLED: "true" or "1" to emit notifications over HTTP (default: false)
    /// - LUOVA_EVENTS_SINK_URL: CloudEvents endpoint (optional)
    /// - LUOVA_THRESHOLDS_FILE: JSON file overriding heuristic thresholds (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("LUOVA_PORT") {
            Ok(value) => value.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                name: "LUOVA_PORT",
                value,
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Settings {
            port,
            db_path: std::env::var("LUOVA_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            events_enabled: std::env::var("LUOVA_EVENTS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            events_sink_url: std::env::var("LUOVA_EVENTS_SINK_URL").ok(),
            thresholds_file: std::env::var("LUOVA_THRESHOLDS_FILE").ok(),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.db_path == MEMORY_DB_PATH
    }

    /// Load thresholds from the configured file, or defaults when unset
    pub fn load_thresholds(&self) -> Result<Thresholds, ConfigError> {
        match &self.thresholds_file {
            Some(path) => Thresholds::from_file(path),
            None => Ok(Thresholds::default()),
        }
    }
}

/// All heuristic constants, one section per component
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    pub performance: PerformanceThresholds,
    pub fatigue: FatigueThresholds,
    pub rotation: RotationThresholds,
    pub experiment: ExperimentThresholds,
    pub selection: SelectionThresholds,
}

impl Thresholds {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })
    }
}

/// One step of an additive score: values at or above `min` earn `points`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ScoreBand {
    pub min: f64,
    pub points: f64,
}

const fn band(min: f64, points: f64) -> ScoreBand {
    ScoreBand { min, points }
}

/// Points for the first band (highest first) that `value` reaches
pub fn band_points(value: f64, bands: &[ScoreBand]) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    bands
        .iter()
        .find(|b| value >= b.min)
        .map(|b| b.points)
        .unwrap_or(0.0)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceThresholds {
    pub lookback_days: u32,
    /// Creatives below this are listed as unranked
    pub min_impressions_for_rank: u64,
    /// Total impressions at which trend confidence reaches 1.0
    pub trend_confidence_volume: u64,
    pub min_trend_snapshots: usize,
    pub rate_trend_threshold: f64,
    pub volume_trend_threshold: f64,
    /// Daily coefficient of variation above which a directionless metric is volatile
    pub volatility_cv: f64,
    pub ctr_bands: Vec<ScoreBand>,
    pub cvr_bands: Vec<ScoreBand>,
    pub roas_bands: Vec<ScoreBand>,
    pub volume_bands: Vec<ScoreBand>,
    pub ctr_trend_bonus: f64,
    pub cvr_trend_bonus: f64,
    pub poor_score: f64,
    pub top_score: f64,
    pub max_top_performers: usize,
    pub min_active_creatives: usize,
    pub max_active_creatives: usize,
    pub poor_fraction_limit: f64,
    pub declining_fraction_limit: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        PerformanceThresholds {
            lookback_days: 30,
            min_impressions_for_rank: 1000,
            trend_confidence_volume: 10_000,
            min_trend_snapshots: 4,
            rate_trend_threshold: 0.10,
            volume_trend_threshold: 0.15,
            volatility_cv: 0.5,
            ctr_bands: vec![
                band(0.05, 30.0),
                band(0.03, 25.0),
                band(0.02, 20.0),
                band(0.01, 12.0),
                band(0.005, 6.0),
            ],
            cvr_bands: vec![
                band(0.10, 25.0),
                band(0.05, 20.0),
                band(0.03, 15.0),
                band(0.01, 8.0),
                band(f64::MIN_POSITIVE, 3.0),
            ],
            roas_bands: vec![
                band(4.0, 25.0),
                band(3.0, 20.0),
                band(2.0, 15.0),
                band(1.0, 8.0),
                band(f64::MIN_POSITIVE, 3.0),
            ],
            volume_bands: vec![
                band(100_000.0, 10.0),
                band(10_000.0, 7.0),
                band(1_000.0, 4.0),
                band(1.0, 1.0),
            ],
            ctr_trend_bonus: 5.0,
            cvr_trend_bonus: 5.0,
            poor_score: 40.0,
            top_score: 60.0,
            max_top_performers: 3,
            min_active_creatives: 2,
            max_active_creatives: 8,
            poor_fraction_limit: 0.3,
            declining_fraction_limit: 0.3,
        }
    }
}

/// Four ascending cut-offs for MILD, MODERATE, SEVERE and CRITICAL
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct SeverityBands {
    pub mild: f64,
    pub moderate: f64,
    pub severe: f64,
    pub critical: f64,
}

impl SeverityBands {
    pub const fn new(mild: f64, moderate: f64, severe: f64, critical: f64) -> Self {
        SeverityBands {
            mild,
            moderate,
            severe,
            critical,
        }
    }

    /// Highest band whose cut-off `value` reaches
    pub fn classify(&self, value: f64) -> FatigueSeverity {
        self.classify_with(value, |v, cut| v >= cut)
    }

    /// Highest band whose cut-off `value` strictly exceeds
    pub fn classify_above(&self, value: f64) -> FatigueSeverity {
        self.classify_with(value, |v, cut| v > cut)
    }

    fn classify_with(&self, value: f64, reaches: impl Fn(f64, f64) -> bool) -> FatigueSeverity {
        if !value.is_finite() {
            return FatigueSeverity::None;
        }
        if reaches(value, self.critical) {
            FatigueSeverity::Critical
        } else if reaches(value, self.severe) {
            FatigueSeverity::Severe
        } else if reaches(value, self.moderate) {
            FatigueSeverity::Moderate
        } else if reaches(value, self.mild) {
            FatigueSeverity::Mild
        } else {
            FatigueSeverity::None
        }
    }
}

/// Base remaining-lifespan days per verdict severity
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct LifespanDays {
    pub none: u32,
    pub mild: u32,
    pub moderate: u32,
    pub severe: u32,
    pub critical: u32,
}

impl LifespanDays {
    pub fn for_severity(&self, severity: FatigueSeverity) -> u32 {
        match severity {
            FatigueSeverity::None => self.none,
            FatigueSeverity::Mild => self.mild,
            FatigueSeverity::Moderate => self.moderate,
            FatigueSeverity::Severe => self.severe,
            FatigueSeverity::Critical => self.critical,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FatigueThresholds {
    pub recent_window_days: u32,
    pub baseline_window_days: u32,
    /// Minimum |z| before a rate decline counts
    pub z_threshold: f64,
    /// Minimum impressions in each window before CTR is tested
    pub min_window_impressions: u64,
    /// Minimum clicks in each window before CVR is tested
    pub min_window_clicks: u64,
    pub ctr_decline: SeverityBands,
    pub cvr_decline: SeverityBands,
    pub frequency: SeverityBands,
    pub cpc_increase: SeverityBands,
    pub staleness_days: SeverityBands,
    pub quality_score_drop: SeverityBands,
    /// Cut-offs on the 0-100 verdict score
    pub verdict: SeverityBands,
    pub lifespan_days: LifespanDays,
    /// How far back stored verdicts are compared
    pub history_days: u32,
    /// Verdicts at or above this emit a notification
    pub notify_min_severity: FatigueSeverity,
}

impl Default for FatigueThresholds {
    fn default() -> Self {
        FatigueThresholds {
            recent_window_days: 7,
            baseline_window_days: 14,
            z_threshold: 1.96,
            min_window_impressions: 100,
            min_window_clicks: 20,
            ctr_decline: SeverityBands::new(0.15, 0.25, 0.40, 0.60),
            cvr_decline: SeverityBands::new(0.20, 0.30, 0.45, 0.65),
            frequency: SeverityBands::new(3.0, 4.0, 5.0, 7.0),
            cpc_increase: SeverityBands::new(0.25, 0.40, 0.60, 1.00),
            staleness_days: SeverityBands::new(30.0, 45.0, 60.0, 90.0),
            quality_score_drop: SeverityBands::new(1.0, 2.0, 3.0, 4.0),
            verdict: SeverityBands::new(20.0, 40.0, 60.0, 80.0),
            lifespan_days: LifespanDays {
                none: 60,
                mild: 30,
                moderate: 14,
                severe: 7,
                critical: 2,
            },
            history_days: 30,
            notify_min_severity: FatigueSeverity::Moderate,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RotationThresholds {
    /// Best-worst gap above which OPTIMIZE is recommended (with LOW risk)
    pub optimize_gap: f64,
    /// Stability index below which ADAPTIVE is recommended
    pub stability_floor: f64,
    /// Effectiveness above which the configured strategy is kept
    pub keep_effectiveness: f64,
    pub high_risk_gap: f64,
    /// Fewer active creatives than this is HIGH risk
    pub min_active_for_low_risk: usize,
    pub urgent_pause_score: f64,
    pub variant_source_score: f64,
    /// Floor added to scores for OPTIMIZE weights so weak creatives keep exploring
    pub optimize_weight_floor: f64,
    pub adaptive_trend_weight: f64,
    pub adaptive_freshness_bonus: f64,
}

impl Default for RotationThresholds {
    fn default() -> Self {
        RotationThresholds {
            optimize_gap: 30.0,
            stability_floor: 60.0,
            keep_effectiveness: 70.0,
            high_risk_gap: 50.0,
            min_active_for_low_risk: 3,
            urgent_pause_score: 30.0,
            variant_source_score: 80.0,
            optimize_weight_floor: 5.0,
            adaptive_trend_weight: 0.1,
            adaptive_freshness_bonus: 0.1,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentThresholds {
    /// Variants at or above this Jaccard similarity are rejected
    pub max_variant_similarity: f64,
    /// Per-arm events below which no test statistic is computed
    pub min_arm_sample: u64,
    /// Progress after which futility is evaluated
    pub futility_min_progress: f64,
    /// Futility when |effect| is below this fraction of the MDE
    pub futility_effect_ratio: f64,
}

impl Default for ExperimentThresholds {
    fn default() -> Self {
        ExperimentThresholds {
            max_variant_similarity: 0.9,
            min_arm_sample: 30,
            futility_min_progress: 0.5,
            futility_effect_ratio: 0.25,
        }
    }
}

/// Risk-string counts that map to MEDIUM and HIGH
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct RiskCutoffs {
    pub medium: usize,
    pub high: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionThresholds {
    /// Relative shortfall raising a WARNING; twice this raises CRITICAL
    pub variance_threshold: f64,
    /// Confidence above which a low-risk winner rolls out immediately
    pub immediate_confidence: f64,
    /// Relative change above which the magnitude itself is a risk
    pub large_change: f64,
    pub conservative: RiskCutoffs,
    pub moderate: RiskCutoffs,
    pub aggressive: RiskCutoffs,
    pub monitoring_days: u32,
    pub check_interval_hours: u32,
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        SelectionThresholds {
            variance_threshold: 0.10,
            immediate_confidence: 0.95,
            large_change: 0.50,
            conservative: RiskCutoffs { medium: 1, high: 2 },
            moderate: RiskCutoffs { medium: 2, high: 3 },
            aggressive: RiskCutoffs { medium: 3, high: 4 },
            monitoring_days: 14,
            check_interval_hours: 24,
        }
    }
}
