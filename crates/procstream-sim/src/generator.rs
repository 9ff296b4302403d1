//! ---
//! ps_section: "11-simulation"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Trace generator contract and stochastic implementation."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::prelude::*;
use rand_distr::Normal;
use tracing::trace;

use crate::model::{ActivitySpec, ProcessModel};
use crate::params::SimulationParameters;
use crate::trace::{StreamEvent, Trace};
use crate::{GenerationError, Result};

const DEFAULT_SEED: u64 = 0x5EED_7ACE;
const RESOURCE_KEY: &str = "org:resource";
const LIFECYCLE_KEY: &str = "lifecycle:transition";

/// Produces one complete trace per call for a given process model.
pub trait TraceGenerator: Send {
    /// Generative definition the generator simulates.
    type Model: Send;

    /// Synchronously simulate a single process instance identified by `case_id`.
    fn generate(
        &mut self,
        model: &Self::Model,
        case_id: &str,
        params: &SimulationParameters,
    ) -> Result<Trace>;
}

/// Walks a [`ProcessModel`] sampling normally distributed gaps between
/// activities, starting each trace at the generation wall-clock time.
#[derive(Debug)]
pub struct StochasticGenerator {
    rng: StdRng,
    origin: Option<DateTime<Utc>>,
}

impl StochasticGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            origin: None,
        }
    }

    pub fn from_parameters(params: &SimulationParameters) -> Self {
        Self::new(params.seed.unwrap_or(DEFAULT_SEED))
    }

    /// Start every trace at `origin` instead of the current time.
    pub fn with_fixed_origin(mut self, origin: DateTime<Utc>) -> Self {
        self.origin = Some(origin);
        self
    }

    fn sample_gap(&mut self, activity: &ActivitySpec) -> Result<ChronoDuration> {
        let seconds = if activity.gap_std_dev_secs > 0.0 {
            let normal = Normal::new(activity.mean_gap_secs, activity.gap_std_dev_secs)
                .map_err(|err| GenerationError::InvalidModel(err.to_string()))?;
            normal.sample(&mut self.rng).max(0.0)
        } else {
            activity.mean_gap_secs
        };
        let millis = (seconds * 1000.0).round();
        if !millis.is_finite() || millis >= i64::MAX as f64 {
            return Err(GenerationError::InvalidModel(format!(
                "gap of {seconds}s before `{}` is out of range",
                activity.name
            )));
        }
        ChronoDuration::try_milliseconds(millis as i64).ok_or_else(|| {
            GenerationError::InvalidModel(format!(
                "gap of {seconds}s before `{}` is out of range",
                activity.name
            ))
        })
    }

    fn pick_resource<'m>(&mut self, model: &'m ProcessModel) -> Option<&'m str> {
        model.resources.choose(&mut self.rng).map(String::as_str)
    }
}

impl TraceGenerator for StochasticGenerator {
    type Model = ProcessModel;

    fn generate(
        &mut self,
        model: &ProcessModel,
        case_id: &str,
        params: &SimulationParameters,
    ) -> Result<Trace> {
        model.validate()?;
        let mut at = self.origin.unwrap_or_else(Utc::now);
        let mut events = Vec::with_capacity(model.activities.len());
        let last = model.activities.len() - 1;

        for (index, activity) in model.activities.iter().enumerate() {
            let keep_for_non_empty = index == last && events.is_empty();
            if !keep_for_non_empty && self.rng.gen_bool(activity.skip_probability) {
                continue;
            }
            let mut repeats = 0;
            loop {
                let gap = self.sample_gap(activity)?;
                at = at.checked_add_signed(gap).ok_or_else(|| {
                    GenerationError::InvalidModel(format!(
                        "timestamp overflow at `{}` of model `{}`",
                        activity.name, model.name
                    ))
                })?;
                let mut event = StreamEvent::new(case_id, activity.name.as_str(), at)
                    .with_attribute(LIFECYCLE_KEY, "complete");
                if let Some(resource) = self.pick_resource(model) {
                    event = event.with_attribute(RESOURCE_KEY, resource);
                }
                events.push(event);
                if repeats >= params.max_loops || !self.rng.gen_bool(activity.repeat_probability)
                {
                    break;
                }
                repeats += 1;
            }
        }

        trace!(case_id, events = events.len(), model = %model.name, "trace generated");
        Ok(Trace::new(case_id, events))
    }
}
