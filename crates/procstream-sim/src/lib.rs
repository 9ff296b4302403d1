//! ---
//! ps_section: "11-simulation"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Trace model and generator exports."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
//! Trace generation for the procstream workspace.
//!
//! A [`TraceGenerator`] turns a process model and a case identifier into one
//! complete [`Trace`]. The streamer treats it as an opaque, synchronous call.

pub mod generator;
pub mod model;
pub mod params;
pub mod pattern;
pub mod trace;

/// Result alias for generation calls.
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Reasons a generation call produced no trace.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The process model cannot be simulated.
    #[error("invalid process model: {0}")]
    InvalidModel(String),
    /// The generator was interrupted before the trace was complete.
    #[error("trace generation interrupted: {0}")]
    Interrupted(String),
}

pub use generator::{StochasticGenerator, TraceGenerator};
pub use model::{ActivitySpec, ProcessModel};
pub use params::SimulationParameters;
pub use pattern::{CaseIdPattern, PatternError};
pub use trace::{StreamEvent, Trace};
