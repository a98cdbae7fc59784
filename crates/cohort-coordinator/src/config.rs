use crate::catalog::{CapabilityCatalog, GroupCapability};
use crate::profiles::default_capabilities;
use cohort_core::telemetry::LogFormat;
use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration, usually loaded from TOML.
///
/// ```toml
/// [engine]
/// default_timeout_ms = 30000
///
/// [aggregation]
/// base_quality = 85.0
///
/// [[groups]]
/// id = "build"
/// stage = "build"
/// max_concurrent_tasks = 4
/// functions = ["code_generation"]
/// affinity = { verify = 0.9 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// Group capabilities. When empty, the stock catalog is used.
    #[serde(default)]
    pub groups: Vec<GroupCapability>,
}

/// Runtime behaviour of the supervisor and executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Budget for tasks that do not declare one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Stop a sequential run at the first failing group.
    #[serde(default)]
    pub sequential_stop_on_failure: bool,
    /// Weight of the newest sample in the mean coordination time.
    #[serde(default = "default_stats_smoothing")]
    pub stats_smoothing: f64,
    /// Result summaries kept for introspection.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// A call slower than `expected_latency * factor` produces a warning.
    #[serde(default = "default_latency_warning_factor")]
    pub latency_warning_factor: f64,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_timeout_ms() -> u64 {
    60_000
}
fn default_stats_smoothing() -> f64 {
    0.1
}
fn default_history_limit() -> usize {
    100
}
fn default_latency_warning_factor() -> f64 {
    2.0
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            sequential_stop_on_failure: false,
            stats_smoothing: default_stats_smoothing(),
            history_limit: default_history_limit(),
            latency_warning_factor: default_latency_warning_factor(),
            log_format: LogFormat::default(),
        }
    }
}

impl EngineSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Scoring constants used by the result aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Quality of a successful group before bonuses.
    #[serde(default = "default_base_quality")]
    pub base_quality: f64,
    /// Added when a successful group reported no errors.
    #[serde(default = "default_clean_bonus")]
    pub no_error_bonus: f64,
    /// Added when a successful group reported no warnings.
    #[serde(default = "default_clean_bonus")]
    pub no_warning_bonus: f64,
    /// Efficiency multiplier once `breadth_threshold` groups succeeded.
    #[serde(default = "default_breadth_bonus")]
    pub breadth_bonus: f64,
    #[serde(default = "default_breadth_threshold")]
    pub breadth_threshold: usize,
    /// Efficiency multiplier when every required group succeeded.
    #[serde(default = "default_completeness_bonus")]
    pub completeness_bonus: f64,
}

fn default_base_quality() -> f64 {
    90.0
}
fn default_clean_bonus() -> f64 {
    5.0
}
fn default_breadth_bonus() -> f64 {
    1.1
}
fn default_breadth_threshold() -> usize {
    3
}
fn default_completeness_bonus() -> f64 {
    1.05
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            base_quality: default_base_quality(),
            no_error_bonus: default_clean_bonus(),
            no_warning_bonus: default_clean_bonus(),
            breadth_bonus: default_breadth_bonus(),
            breadth_threshold: default_breadth_threshold(),
            completeness_bonus: default_completeness_bonus(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> CohortResult<Self> {
        let config: EngineConfig =
            toml::from_str(source).map_err(|e| CohortError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> CohortResult<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            CohortError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> CohortResult<()> {
        let engine = &self.engine;
        if engine.default_timeout_ms == 0 {
            return Err(CohortError::Config(
                "engine.default_timeout_ms must be positive".to_string(),
            ));
        }
        if !(engine.stats_smoothing > 0.0 && engine.stats_smoothing <= 1.0) {
            return Err(CohortError::Config(format!(
                "engine.stats_smoothing must be in (0, 1], got {}",
                engine.stats_smoothing
            )));
        }
        if engine.latency_warning_factor <= 0.0 {
            return Err(CohortError::Config(
                "engine.latency_warning_factor must be positive".to_string(),
            ));
        }
        let agg = &self.aggregation;
        if agg.base_quality < 0.0 || agg.no_error_bonus < 0.0 || agg.no_warning_bonus < 0.0 {
            return Err(CohortError::Config(
                "aggregation quality values must not be negative".to_string(),
            ));
        }
        if agg.breadth_bonus < 1.0 || agg.completeness_bonus < 1.0 {
            return Err(CohortError::Config(
                "aggregation bonuses must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the capability catalog from `groups`, or the stock one if none are listed.
    pub fn build_catalog(&self) -> CohortResult<CapabilityCatalog> {
        if self.groups.is_empty() {
            CapabilityCatalog::from_capabilities(default_capabilities())
        } else {
            CapabilityCatalog::from_capabilities(self.groups.iter().cloned())
        }
    }
}
