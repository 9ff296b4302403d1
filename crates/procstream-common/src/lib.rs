//! ---
//! ps_section: "01-core-functionality"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Shared configuration and logging primitives."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
//! Shared primitives for the procstream workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the streamer daemon and its libraries.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, DriftConfig, LoadedAppConfig, LoggingConfig, ProcessConfig, SimulationConfig,
    StreamConfig,
};
pub use logging::{init_tracing, LogFormat};
