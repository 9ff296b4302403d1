//! ---
//! ps_section: "02-messaging-wire-model"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Wire event model and transport publishers."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
//! Transport boundary of the procstream workspace.
//!
//! Events leave the streamer as [`WireEvent`]s and are handed to a
//! [`Publisher`], which owns the connection to the broker.
#![warn(missing_docs)]

pub mod metrics;
pub mod publisher;
pub mod wire;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// `send` was called while the publisher holds no connection.
    #[error("publisher `{0}` is not connected")]
    NotConnected(&'static str),
    /// Establishing the broker connection failed.
    #[error("unable to connect to {address}: {source}")]
    Connect {
        /// Broker address that was dialled.
        address: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// Wrapper for IO errors encountered while writing frames.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use metrics::{log_wire_event, PublishMetrics};
pub use publisher::{InMemoryPublisher, JsonLinesPublisher, Publisher, TcpPublisher};
pub use wire::{PublishedEvent, WireEvent};
