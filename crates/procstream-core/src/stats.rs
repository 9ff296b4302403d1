//! ---
//! ps_section: "05-stream-core"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Stream counters and the periodic status reporter."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

/// Delay before the first status report after a start.
pub const REPORT_FIRST_DELAY: Duration = Duration::from_secs(1);
/// Interval between subsequent status reports.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(2_500);

/// Lifetime counters of one streamer.
///
/// Updated under the streamer lock but readable without it, so observers
/// never wait behind a pacing sleep.
#[derive(Debug, Default)]
pub struct StreamCounters {
    traces_generated: AtomicU64,
    events_streamed: AtomicU64,
    events_dropped: AtomicU64,
    pending_events: AtomicU64,
}

impl StreamCounters {
    pub(crate) fn record_trace_generated(&self) -> u64 {
        self.traces_generated.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_streamed(&self) {
        self.events_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        self.pending_events.store(pending as u64, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            traces_generated: self.traces_generated.load(Ordering::Relaxed),
            events_streamed: self.events_streamed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            pending_events: self.pending_events.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamCounters`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Generation attempts so far; also the next case-id counter value.
    pub traces_generated: u64,
    /// Events the publisher accepted.
    pub events_streamed: u64,
    /// Events the publisher rejected.
    pub events_dropped: u64,
    /// Events buffered but not yet emitted.
    pub pending_events: u64,
}

/// Consistent view of a streamer taken under its lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    /// Generation attempts so far.
    pub traces_generated: u64,
    /// Events the publisher accepted.
    pub events_streamed: u64,
    /// Events the publisher rejected.
    pub events_dropped: u64,
    /// Events buffered but not yet emitted.
    pub pending_events: usize,
    /// Trace instances currently in flight.
    pub in_flight: usize,
    /// Pacing delay applied after the most recent emission.
    pub last_wait: Option<Duration>,
}

/// Background thread logging buffer depth and throughput at debug level.
///
/// Dropping the reporter cancels the timer and joins the thread.
#[derive(Debug)]
pub struct StatsReporter {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl StatsReporter {
    /// Spawn a reporter with the standard schedule.
    pub fn spawn(counters: Arc<StreamCounters>, process_name: &str) -> io::Result<Self> {
        Self::spawn_with(counters, process_name, REPORT_FIRST_DELAY, REPORT_INTERVAL)
    }

    /// Spawn a reporter that first fires after `first_delay`, then every `interval`.
    pub fn spawn_with(
        counters: Arc<StreamCounters>,
        process_name: &str,
        first_delay: Duration,
        interval: Duration,
    ) -> io::Result<Self> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let process = process_name.to_owned();
        let handle = thread::Builder::new()
            .name(format!("procstream-report-{process}"))
            .spawn(move || {
                let mut reports = 0;
                let mut wait = first_delay;
                loop {
                    match cancelled.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            let snapshot = counters.snapshot();
                            debug!(
                                process = %process,
                                buffered_events = snapshot.pending_events,
                                traces_generated = snapshot.traces_generated,
                                events_streamed = snapshot.events_streamed,
                                "stream status"
                            );
                            reports += 1;
                            wait = interval;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                reports
            })?;
        Ok(Self {
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    /// Cancel the timer and return how many reports were emitted.
    pub fn shutdown(mut self) -> u64 {
        self.finish()
    }

    fn finish(&mut self) -> u64 {
        drop(self.cancel.take());
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(reports)) => reports,
            Some(Err(_)) => {
                warn!("stream status reporter panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn snapshot_reflects_updates() {
        let counters = StreamCounters::default();
        assert_eq!(counters.record_trace_generated(), 0);
        assert_eq!(counters.record_trace_generated(), 1);
        counters.record_streamed();
        counters.record_dropped();
        counters.set_pending(12);
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                traces_generated: 2,
                events_streamed: 1,
                events_dropped: 1,
                pending_events: 12,
            }
        );
    }

    #[test]
    fn reporter_ticks_until_cancelled() {
        let counters = Arc::new(StreamCounters::default());
        let reporter = StatsReporter::spawn_with(
            counters,
            "test",
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(120));
        assert!(reporter.shutdown() >= 2);
    }

    #[test]
    fn cancellation_does_not_wait_for_the_next_tick() {
        let counters = Arc::new(StreamCounters::default());
        let reporter = StatsReporter::spawn(counters, "test").unwrap();
        let started = Instant::now();
        assert_eq!(reporter.shutdown(), 0);
        assert!(started.elapsed() < REPORT_FIRST_DELAY);
    }
}
