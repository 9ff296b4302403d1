//! ---
//! ps_section: "11-simulation"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Declarative process models consumed by the generator."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::GenerationError;

fn default_mean_gap_secs() -> f64 {
    60.0
}

/// Ordered list of activities a process instance walks through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    pub name: String,
    /// Pool of resources attached to events as `org:resource`.
    #[serde(default)]
    pub resources: Vec<String>,
    pub activities: Vec<ActivitySpec>,
}

/// A single step of a [`ProcessModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySpec {
    pub name: String,
    /// Mean simulated time elapsed before this activity completes.
    #[serde(default = "default_mean_gap_secs")]
    pub mean_gap_secs: f64,
    #[serde(default)]
    pub gap_std_dev_secs: f64,
    #[serde(default)]
    pub skip_probability: f64,
    /// Chance of executing the activity again right after itself.
    #[serde(default)]
    pub repeat_probability: f64,
}

impl ActivitySpec {
    pub fn new(name: impl Into<String>, mean_gap_secs: f64) -> Self {
        Self {
            name: name.into(),
            mean_gap_secs,
            gap_std_dev_secs: 0.0,
            skip_probability: 0.0,
            repeat_probability: 0.0,
        }
    }
}

impl ProcessModel {
    /// Sequential model without noise; handy for fixtures and demos.
    pub fn sequential(name: impl Into<String>, activities: &[(&str, f64)]) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            activities: activities
                .iter()
                .map(|(activity, gap)| ActivitySpec::new(*activity, *gap))
                .collect(),
        }
    }

    /// Load a model from a `.toml` or `.json` file and validate it.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read process model {}", path.display()))?;
        let model: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents)
                .with_context(|| format!("invalid process model TOML {}", path.display()))?,
            Some("json") => serde_json::from_str(&contents)
                .with_context(|| format!("invalid process model JSON {}", path.display()))?,
            _ => anyhow::bail!("unsupported process model format: {}", path.display()),
        };
        model
            .validate()
            .with_context(|| format!("rejected process model {}", path.display()))?;
        Ok(model)
    }

    pub fn validate(&self) -> std::result::Result<(), GenerationError> {
        if self.activities.is_empty() {
            return Err(GenerationError::InvalidModel(format!(
                "model `{}` declares no activities",
                self.name
            )));
        }
        for activity in &self.activities {
            let invalid = |reason: &str| {
                GenerationError::InvalidModel(format!(
                    "activity `{}` of model `{}`: {}",
                    activity.name, self.name, reason
                ))
            };
            if activity.name.trim().is_empty() {
                return Err(invalid("name cannot be empty"));
            }
            if !activity.mean_gap_secs.is_finite() || activity.mean_gap_secs < 0.0 {
                return Err(invalid("mean_gap_secs must be a non-negative number"));
            }
            if !activity.gap_std_dev_secs.is_finite() || activity.gap_std_dev_secs < 0.0 {
                return Err(invalid("gap_std_dev_secs must be a non-negative number"));
            }
            if !(0.0..=1.0).contains(&activity.skip_probability) {
                return Err(invalid("skip_probability must be within [0, 1]"));
            }
            if !(0.0..=1.0).contains(&activity.repeat_probability) {
                return Err(invalid("repeat_probability must be within [0, 1]"));
            }
        }
        Ok(())
    }
}
