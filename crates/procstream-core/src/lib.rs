//! ---
//! ps_section: "05-stream-core"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Stream buffer, pacing, and replay scheduler exports."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
//! Buffering and paced replay of generated traces.
//!
//! [`StreamBuffer`] multiplexes in-flight trace instances into one
//! time-ordered event sequence; [`Streamer`] drains it on a background
//! thread, sleeping the scaled simulated gap between events and publishing
//! each one with its real send time.
#![warn(missing_docs)]

pub mod buffer;
pub mod pacing;
pub mod stats;
pub mod streamer;

use procstream_msg::MessagingError;

/// Result alias for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced by the stream core.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// An event was requested while no in-flight instance had one pending.
    #[error("stream buffer has no pending events")]
    EmptyBuffer,
    /// The stream configuration violates an invariant.
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),
    /// The publisher failed a state transition (connect).
    #[error("transport error: {0}")]
    Transport(#[from] MessagingError),
    /// The background loop thread could not be started.
    #[error("unable to spawn stream loop: {0}")]
    Spawn(#[source] std::io::Error),
}

pub use buffer::StreamBuffer;
pub use pacing::scaled_wait;
pub use stats::{CounterSnapshot, StatsReporter, StreamCounters, StreamStats};
pub use streamer::Streamer;
