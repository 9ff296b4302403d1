//! ---
//! ps_section: "01-core-functionality"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "TOML configuration model and loader."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_broker_address() -> String {
    "127.0.0.1:1883".to_owned()
}

fn default_topic_base() -> String {
    "pmcep".to_owned()
}

fn default_max_parallel_instances() -> usize {
    5
}

fn default_time_multiplier() -> f64 {
    1.0
}

fn default_case_id_pattern() -> String {
    "instance_{}".to_owned()
}

fn default_max_loops() -> u32 {
    3
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the streamer daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    pub process: ProcessConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub drift: Option<DriftConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl LoadedAppConfig {
    /// Resolve a path found in the configuration against the config file's directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.source.parent() {
            Some(parent) => parent.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "PROCSTREAM_CONFIG";

    /// Load configuration from disk, respecting the `PROCSTREAM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        self.process.validate()?;
        self.simulation.validate()?;
        if let Some(drift) = &self.drift {
            drift.validate()?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Transport and pacing settings. Immutable once a streamer is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_broker_address")]
    pub broker_address: String,
    #[serde(default = "default_topic_base")]
    pub topic_base: String,
    #[serde(default = "default_max_parallel_instances")]
    pub max_parallel_instances: usize,
    /// Scale applied to simulated inter-event gaps. `1.0` is real time.
    #[serde(default = "default_time_multiplier")]
    pub time_multiplier: f64,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_instances == 0 {
            return Err(anyhow!("stream.max_parallel_instances must be at least 1"));
        }
        if !self.time_multiplier.is_finite() || self.time_multiplier <= 0.0 {
            return Err(anyhow!(
                "stream.time_multiplier must be a positive finite number (got {})",
                self.time_multiplier
            ));
        }
        if self.topic_base.trim().is_empty() {
            return Err(anyhow!("stream.topic_base cannot be empty"));
        }
        if self.broker_address.trim().is_empty() {
            return Err(anyhow!("stream.broker_address cannot be empty"));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            broker_address: default_broker_address(),
            topic_base: default_topic_base(),
            max_parallel_instances: default_max_parallel_instances(),
            time_multiplier: default_time_multiplier(),
        }
    }
}

/// The process being streamed and the model file that drives generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub model: PathBuf,
}

impl ProcessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("process.name cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_case_id_pattern")]
    pub case_id_pattern: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.case_id_pattern.trim().is_empty() {
            return Err(anyhow!("simulation.case_id_pattern cannot be empty"));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            case_id_pattern: default_case_id_pattern(),
            seed: None,
            max_loops: default_max_loops(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// When set, a daily rolling JSON log is written to this directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Scheduled concept drift: swap to `model` once `after` has elapsed.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    pub model: PathBuf,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub after: Duration,
}

impl DriftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.after.is_zero() {
            return Err(anyhow!("drift.after must be greater than zero seconds"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
        [process]
        name = "order-to-cash"
        model = "models/order.toml"
    "#;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: AppConfig = MINIMAL.parse().expect("minimal config parses");
        assert_eq!(config.stream.max_parallel_instances, 5);
        assert_eq!(config.stream.time_multiplier, 1.0);
        assert_eq!(config.simulation.case_id_pattern, "instance_{}");
        assert!(config.drift.is_none());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let raw = format!("{MINIMAL}\n[stream]\nmax_parallel_instances = 0\n");
        let err = raw.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("max_parallel_instances"));
    }

    #[test]
    fn non_positive_multiplier_is_rejected() {
        let raw = format!("{MINIMAL}\n[stream]\ntime_multiplier = 0.0\n");
        assert!(raw.parse::<AppConfig>().is_err());
        let raw = format!("{MINIMAL}\n[stream]\ntime_multiplier = -2.0\n");
        assert!(raw.parse::<AppConfig>().is_err());
    }

    #[test]
    fn drift_section_parses_seconds() {
        let raw = format!("{MINIMAL}\n[drift]\nmodel = \"models/drifted.toml\"\nafter = 30\n");
        let config: AppConfig = raw.parse().unwrap();
        let drift = config.drift.expect("drift configured");
        assert_eq!(drift.after, Duration::from_secs(30));
    }

    #[test]
    fn load_with_source_resolves_relative_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("procstream.toml");
        let mut file = std::fs::File::create(&path)?;
        file.write_all(MINIMAL.as_bytes())?;

        let loaded = AppConfig::load_with_source(&[path.clone()])?;
        assert_eq!(loaded.source, path);
        let model = loaded.resolve(&loaded.config.process.model);
        assert_eq!(model, dir.path().join("models/order.toml"));
        Ok(())
    }

    #[test]
    fn load_reports_inspected_candidates() {
        let err = AppConfig::load(&["does/not/exist.toml"]).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.toml"));
    }

    #[test]
    fn invalid_file_is_reported_with_path() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[stream]\nmax_parallel_instances = \"many\"")?;
        file.flush()?;
        let err = AppConfig::load(&[file.path()]).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
        Ok(())
    }
}
