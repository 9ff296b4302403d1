//! ---
//! ps_section: "11-simulation"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Immutable parameters handed to every generation call."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use procstream_common::SimulationConfig;

use crate::pattern::{CaseIdPattern, PatternError};

/// Generation settings shared by every trace of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationParameters {
    pub case_id_pattern: CaseIdPattern,
    pub seed: Option<u64>,
    /// Upper bound on consecutive repetitions of one activity.
    pub max_loops: u32,
}

impl SimulationParameters {
    pub fn new(case_id_pattern: CaseIdPattern) -> Self {
        Self {
            case_id_pattern,
            seed: None,
            max_loops: 3,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn from_config(config: &SimulationConfig) -> Result<Self, PatternError> {
        Ok(Self {
            case_id_pattern: CaseIdPattern::parse(&config.case_id_pattern)?,
            seed: config.seed,
            max_loops: config.max_loops,
        })
    }

    pub fn case_id(&self, counter: u64) -> String {
        self.case_id_pattern.render(counter)
    }
}
