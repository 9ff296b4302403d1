//! ---
//! ps_section: "05-stream-core"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Conversion of simulated gaps into wall-clock waits."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Real time to wait after emitting `next`, given the previously emitted
/// original timestamp.
///
/// The simulated gap is taken at millisecond resolution and scaled by
/// `multiplier`. No previous event, a negative gap (typical right after a
/// process swap) or a non-finite product all yield [`Duration::ZERO`].
pub fn scaled_wait(
    previous: Option<DateTime<Utc>>,
    next: DateTime<Utc>,
    multiplier: f64,
) -> Duration {
    let Some(previous) = previous else {
        return Duration::ZERO;
    };
    let scaled_ms = (next - previous).num_milliseconds() as f64 * multiplier;
    if !scaled_ms.is_finite() || scaled_ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(scaled_ms / 1000.0).unwrap_or(Duration::MAX)
}
