//! ---
//! ps_section: "05-stream-core"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Replay scheduler pacing buffered events onto a publisher."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use procstream_common::StreamConfig;
use procstream_msg::{log_wire_event, PublishMetrics, Publisher};
use procstream_sim::{SimulationParameters, TraceGenerator};
use tracing::{debug, error, info, warn};

use crate::buffer::StreamBuffer;
use crate::pacing::scaled_wait;
use crate::stats::{CounterSnapshot, StatsReporter, StreamCounters, StreamStats};
use crate::{Result, StreamError};

/// Traces generated per unit of parallelism before the first start.
const PREPOPULATE_FACTOR: usize = 3;

/// Scheduler state; every field is guarded by the one streamer lock.
struct StreamState<G: TraceGenerator, P: Publisher> {
    config: StreamConfig,
    process_name: String,
    model: G::Model,
    params: SimulationParameters,
    generator: G,
    publisher: P,
    buffer: StreamBuffer,
    counters: Arc<StreamCounters>,
    metrics: Option<PublishMetrics>,
    reporter: Option<StatsReporter>,
    enabled: bool,
    epoch: u64,
    last_event_time: Option<DateTime<Utc>>,
    last_wait: Option<Duration>,
    last_error: Option<Arc<StreamError>>,
}

impl<G: TraceGenerator, P: Publisher> StreamState<G, P> {
    /// Generate one trace under the current model and admit it.
    fn generate_trace(&mut self) -> bool {
        let counter = self.counters.record_trace_generated();
        let case_id = self.params.case_id(counter);
        match self.generator.generate(&self.model, &case_id, &self.params) {
            Ok(trace) => self.buffer.enqueue_trace(trace),
            Err(err) => {
                warn!(
                    process = %self.process_name,
                    case_id = %case_id,
                    error = %err,
                    "trace generation failed; abandoning replenishment"
                );
                false
            }
        }
    }

    /// Top the buffer up to the parallelism target. Returns the number of
    /// traces admitted.
    fn replenish(&mut self) -> usize {
        let mut admitted = 0;
        while self.buffer.needs_more_traces() {
            if !self.generate_trace() {
                break;
            }
            admitted += 1;
        }
        self.sync_pending();
        admitted
    }

    fn prepopulate(&mut self) {
        let target = PREPOPULATE_FACTOR * self.buffer.max_parallel_instances();
        for _ in 0..target {
            self.generate_trace();
        }
        self.sync_pending();
        info!(
            process = %self.process_name,
            in_flight = self.buffer.in_flight(),
            pending_events = self.buffer.pending_event_count(),
            "stream buffer prepopulated"
        );
    }

    /// Pop, pace and publish the next event. The pacing sleep happens while
    /// the caller still holds the streamer lock.
    ///
    /// A drained buffer gets one replenishment pass first; `EmptyBuffer` is
    /// returned only when that pass admits nothing.
    fn emit_one(&mut self) -> Result<Duration> {
        if self.buffer.is_empty() {
            let admitted = self.replenish();
            debug!(process = %self.process_name, admitted, "refilled drained buffer");
        }
        let mut event = self.buffer.next_event()?;
        let wait = scaled_wait(
            self.last_event_time,
            event.timestamp(),
            self.config.time_multiplier,
        );
        self.last_event_time = Some(event.timestamp());
        event.restamp(Utc::now());

        let wire = event.to_wire(&self.process_name);
        let started = Instant::now();
        let outcome = self.publisher.send(&wire);
        if let Some(metrics) = &self.metrics {
            metrics.observe_latency(started.elapsed());
        }
        match outcome {
            Ok(()) => {
                self.counters.record_streamed();
                if let Some(metrics) = &self.metrics {
                    metrics.observe_sent();
                }
                log_wire_event(self.publisher.name(), &wire);
            }
            Err(err) => {
                self.counters.record_dropped();
                if let Some(metrics) = &self.metrics {
                    metrics.observe_dropped();
                }
                warn!(
                    publisher = self.publisher.name(),
                    case_id = %wire.case_id,
                    activity = %wire.activity,
                    error = %err,
                    "event dropped"
                );
            }
        }

        if self.buffer.needs_more_traces() {
            self.replenish();
        } else {
            self.sync_pending();
        }

        self.last_wait = Some(wait);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        Ok(wait)
    }

    fn disconnect_publisher(&mut self) {
        if let Err(err) = self.publisher.disconnect() {
            warn!(publisher = self.publisher.name(), error = %err, "publisher disconnect failed");
        }
    }

    /// End the session after a fatal loop error.
    fn halt(&mut self, err: StreamError) {
        error!(process = %self.process_name, error = %err, "stream halted");
        self.enabled = false;
        self.disconnect_publisher();
        self.reporter = None;
        self.last_error = Some(Arc::new(err));
    }

    fn sync_pending(&self) {
        self.counters.set_pending(self.buffer.pending_event_count());
    }
}

struct Worker {
    epoch: u64,
    handle: JoinHandle<()>,
}

/// Replays generated traces onto a [`Publisher`] at a time-dilated pace.
///
/// Construction prepopulates the buffer with three traces per unit of
/// parallelism. [`Streamer::start`] connects the publisher and launches a
/// background thread that emits one event at a time, sleeping the scaled
/// simulated gap in between. The loop holds the streamer lock while it
/// sleeps, so [`Streamer::update_process`], [`Streamer::stop`] and
/// [`Streamer::clear_buffer`] take effect only once the current wait has
/// elapsed.
pub struct Streamer<G, P>
where
    G: TraceGenerator + 'static,
    P: Publisher + 'static,
{
    shared: Arc<Mutex<StreamState<G, P>>>,
    counters: Arc<StreamCounters>,
    process_name: String,
    worker: Mutex<Option<Worker>>,
}

impl<G, P> Streamer<G, P>
where
    G: TraceGenerator + 'static,
    P: Publisher + 'static,
{
    /// Validate `config` and prepopulate the buffer.
    pub fn new(
        config: StreamConfig,
        process_name: impl Into<String>,
        model: G::Model,
        params: SimulationParameters,
        generator: G,
        publisher: P,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|err| StreamError::InvalidConfig(err.to_string()))?;
        let process_name = process_name.into();
        if process_name.trim().is_empty() {
            return Err(StreamError::InvalidConfig(
                "process name cannot be empty".to_owned(),
            ));
        }

        let counters = Arc::new(StreamCounters::default());
        let mut state = StreamState {
            buffer: StreamBuffer::new(config.max_parallel_instances),
            config,
            process_name: process_name.clone(),
            model,
            params,
            generator,
            publisher,
            counters: Arc::clone(&counters),
            metrics: None,
            reporter: None,
            enabled: false,
            epoch: 0,
            last_event_time: None,
            last_wait: None,
            last_error: None,
        };
        state.prepopulate();

        Ok(Self {
            shared: Arc::new(Mutex::new(state)),
            counters,
            process_name,
            worker: Mutex::new(None),
        })
    }

    /// Record publish activity into `metrics`.
    pub fn with_metrics(self, metrics: PublishMetrics) -> Self {
        self.shared.lock().metrics = Some(metrics);
        self
    }

    /// Connect the publisher and launch the background loop.
    ///
    /// A no-op while running. When the publisher cannot connect the streamer
    /// stays stopped.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        let epoch = {
            let mut state = self.shared.lock();
            if state.enabled {
                debug!(process = %self.process_name, "start ignored; already running");
                return Ok(());
            }
            state.publisher.connect()?;
            state.enabled = true;
            state.epoch += 1;
            state.last_error = None;
            let reporter = StatsReporter::spawn(Arc::clone(&self.counters), &self.process_name);
            state.reporter = match reporter {
                Ok(reporter) => Some(reporter),
                Err(err) => {
                    warn!(error = %err, "unable to start stream status reporter");
                    None
                }
            };
            state.replenish();
            state.epoch
        };

        if let Some(previous) = worker.take() {
            if previous.handle.join().is_err() {
                warn!(epoch = previous.epoch, "previous stream loop panicked");
            }
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("procstream-{}", self.process_name))
            .spawn(move || run_loop(shared, epoch));
        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { epoch, handle });
                info!(process = %self.process_name, epoch, "stream started");
                Ok(())
            }
            Err(err) => {
                let mut state = self.shared.lock();
                state.enabled = false;
                state.disconnect_publisher();
                state.reporter = None;
                Err(StreamError::Spawn(err))
            }
        }
    }

    /// Halt the loop, disconnect the publisher and cancel the status reporter.
    ///
    /// Blocks until an in-progress pacing sleep completes. A no-op while stopped.
    pub fn stop(&self) {
        let stopped_epoch = {
            let mut state = self.shared.lock();
            if !state.enabled {
                return;
            }
            state.enabled = false;
            state.disconnect_publisher();
            state.reporter = None;
            state.epoch
        };

        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| w.epoch == stopped_epoch) {
            if let Some(finished) = worker.take() {
                if finished.handle.join().is_err() {
                    warn!(epoch = finished.epoch, "stream loop panicked");
                }
            }
        }
        info!(
            process = %self.process_name,
            events_streamed = self.counters.snapshot().events_streamed,
            "stream stopped"
        );
    }

    /// Swap the generative model, discarding every in-flight instance.
    ///
    /// `None` leaves the streamer untouched. Otherwise the buffer is cleared,
    /// refilled under the new model, and the next emission does not wait.
    pub fn update_process(&self, model: Option<G::Model>) {
        let Some(model) = model else {
            return;
        };
        let mut state = self.shared.lock();
        let discarded = state.buffer.pending_event_count();
        state.model = model;
        state.buffer.clear();
        state.last_event_time = None;
        let admitted = state.replenish();
        info!(
            process = %self.process_name,
            discarded,
            admitted,
            "process model replaced"
        );
    }

    /// Drop every buffered instance, keeping the current model.
    ///
    /// While running the buffer is refilled immediately so the loop does not starve.
    pub fn clear_buffer(&self) {
        let mut state = self.shared.lock();
        let discarded = state.buffer.pending_event_count();
        state.buffer.clear();
        state.last_event_time = None;
        if state.enabled {
            state.replenish();
        } else {
            state.sync_pending();
        }
        info!(process = %self.process_name, discarded, "stream buffer cleared");
    }

    /// Whether the background loop is enabled.
    pub fn is_running(&self) -> bool {
        self.shared.lock().enabled
    }

    /// Counters and buffer occupancy, read under the streamer lock.
    pub fn stats(&self) -> StreamStats {
        let state = self.shared.lock();
        let counters = self.counters.snapshot();
        StreamStats {
            traces_generated: counters.traces_generated,
            events_streamed: counters.events_streamed,
            events_dropped: counters.events_dropped,
            pending_events: state.buffer.pending_event_count(),
            in_flight: state.buffer.in_flight(),
            last_wait: state.last_wait,
        }
    }

    /// Counter values without taking the streamer lock.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Run `f` against the buffer under the streamer lock.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&StreamBuffer) -> R) -> R {
        f(&self.shared.lock().buffer)
    }

    /// Error that halted the most recent session, if any.
    pub fn last_error(&self) -> Option<Arc<StreamError>> {
        self.shared.lock().last_error.clone()
    }

    /// Name events are published under.
    pub fn process_name(&self) -> &str {
        &self.process_name
    }
}

impl<G, P> Drop for Streamer<G, P>
where
    G: TraceGenerator + 'static,
    P: Publisher + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<G, P>(shared: Arc<Mutex<StreamState<G, P>>>, epoch: u64)
where
    G: TraceGenerator,
    P: Publisher,
{
    debug!(epoch, "stream loop running");
    loop {
        let mut state = shared.lock();
        if !state.enabled || state.epoch != epoch {
            break;
        }
        if let Err(err) = state.emit_one() {
            state.halt(err);
            break;
        }
        // Hand the lock to a caller blocked behind the pacing sleep.
        MutexGuard::unlock_fair(state);
    }
    debug!(epoch, "stream loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use procstream_msg::InMemoryPublisher;
    use procstream_sim::{CaseIdPattern, GenerationError, StreamEvent, Trace};

    struct Script {
        label: &'static str,
        offsets_ms: Vec<i64>,
        spacing_ms: i64,
    }

    struct ScriptedGenerator {
        produced: i64,
    }

    impl TraceGenerator for ScriptedGenerator {
        type Model = Script;

        fn generate(
            &mut self,
            model: &Script,
            case_id: &str,
            _params: &SimulationParameters,
        ) -> procstream_sim::Result<Trace> {
            if model.offsets_ms.is_empty() {
                return Err(GenerationError::InvalidModel("no offsets".into()));
            }
            let base = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
                + ChronoDuration::milliseconds(self.produced * model.spacing_ms);
            self.produced += 1;
            let events = model
                .offsets_ms
                .iter()
                .enumerate()
                .map(|(index, offset)| {
                    StreamEvent::new(
                        case_id,
                        format!("{}-{index}", model.label),
                        base + ChronoDuration::milliseconds(*offset),
                    )
                })
                .collect();
            Ok(Trace::new(case_id, events))
        }
    }

    fn config(max_parallel_instances: usize) -> StreamConfig {
        StreamConfig {
            max_parallel_instances,
            time_multiplier: 1.0,
            ..StreamConfig::default()
        }
    }

    fn streamer(
        max_parallel_instances: usize,
        script: Script,
    ) -> (Streamer<ScriptedGenerator, InMemoryPublisher>, InMemoryPublisher) {
        let publisher = InMemoryPublisher::new("pmcep");
        let params = SimulationParameters::new(CaseIdPattern::parse("case_{}").unwrap());
        let streamer = Streamer::new(
            config(max_parallel_instances),
            "orders",
            script,
            params,
            ScriptedGenerator { produced: 0 },
            publisher.clone(),
        )
        .unwrap();
        (streamer, publisher)
    }

    fn steady() -> Script {
        Script {
            label: "old",
            offsets_ms: vec![0, 80],
            spacing_ms: 20,
        }
    }

    /// Drive the loop body by hand so waits are observed deterministically.
    fn emit(streamer: &Streamer<ScriptedGenerator, InMemoryPublisher>) -> Duration {
        streamer.shared.lock().emit_one().unwrap()
    }

    fn connect(streamer: &Streamer<ScriptedGenerator, InMemoryPublisher>) {
        streamer.shared.lock().publisher.connect().unwrap();
    }

    #[test]
    fn construction_prepopulates_three_traces_per_slot() {
        let (streamer, publisher) = streamer(2, steady());
        let stats = streamer.stats();
        assert_eq!(stats.traces_generated, 6);
        assert_eq!(stats.in_flight, 6);
        assert_eq!(stats.pending_events, 12);
        assert!(!streamer.is_running());
        assert_eq!(publisher.connect_count(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let publisher = InMemoryPublisher::new("pmcep");
        let params = SimulationParameters::new(CaseIdPattern::parse("case_{}").unwrap());
        let result = Streamer::new(
            config(0),
            "orders",
            steady(),
            params,
            ScriptedGenerator { produced: 0 },
            publisher,
        );
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
    }

    #[test]
    fn waits_follow_original_gaps() {
        let (streamer, publisher) = streamer(2, steady());
        connect(&streamer);

        let waits: Vec<_> = (0..4).map(|_| emit(&streamer)).collect();
        assert_eq!(
            waits,
            [
                Duration::ZERO,
                Duration::from_millis(20),
                Duration::from_millis(20),
                Duration::from_millis(20),
            ]
        );
        assert_eq!(streamer.stats().events_streamed, 4);
        assert_eq!(streamer.stats().last_wait, Some(Duration::from_millis(20)));

        let first = publisher.recv().unwrap();
        assert_eq!(first.topic, "pmcep/orders/case_0/old-0");
        let sent_at: DateTime<Utc> = first.payload["event"]["time:timestamp"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(sent_at > Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn process_swap_restarts_pacing() {
        let (streamer, publisher) = streamer(2, steady());
        connect(&streamer);
        for _ in 0..5 {
            emit(&streamer);
        }
        publisher.drain();

        streamer.update_process(Some(Script {
            label: "new",
            offsets_ms: vec![0, 50],
            spacing_ms: 0,
        }));
        let stats = streamer.stats();
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.pending_events, 4);
        assert_eq!(stats.traces_generated, 8);

        assert_eq!(emit(&streamer), Duration::ZERO);
        let event = publisher.recv().unwrap();
        assert!(event.topic.ends_with("/new-0"), "{}", event.topic);
    }

    #[test]
    fn update_with_none_changes_nothing() {
        let (streamer, _publisher) = streamer(2, steady());
        let before = streamer.stats();
        streamer.update_process(None);
        assert_eq!(streamer.stats(), before);
    }

    #[test]
    fn clear_buffer_keeps_counters() {
        let (streamer, _publisher) = streamer(2, steady());
        streamer.clear_buffer();
        let stats = streamer.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.pending_events, 0);
        assert_eq!(stats.traces_generated, 6);
        assert!(streamer.with_buffer(StreamBuffer::needs_more_traces));
    }

    #[test]
    fn send_failures_drop_the_event() {
        let (streamer, publisher) = streamer(1, steady());
        let wait = emit(&streamer);
        assert_eq!(wait, Duration::ZERO);
        let counters = streamer.counters();
        assert_eq!(counters.events_streamed, 0);
        assert_eq!(counters.events_dropped, 1);
        assert_eq!(publisher.queued(), 0);
    }

    #[test]
    fn failed_generation_abandons_the_pass() {
        let (streamer, _publisher) = streamer(2, steady());
        streamer.update_process(Some(Script {
            label: "broken",
            offsets_ms: Vec::new(),
            spacing_ms: 0,
        }));
        let stats = streamer.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.traces_generated, 7);
    }

    #[test]
    fn drained_buffer_is_refilled_before_emitting() {
        let (streamer, publisher) = streamer(2, steady());
        connect(&streamer);
        streamer.clear_buffer();
        assert_eq!(streamer.stats().in_flight, 0);

        assert_eq!(emit(&streamer), Duration::ZERO);
        let stats = streamer.stats();
        assert_eq!(stats.events_streamed, 1);
        assert_eq!(stats.traces_generated, 8);
        assert!(publisher.recv().unwrap().topic.ends_with("/case_6/old-0"));
    }

    #[test]
    fn empty_buffer_halts_the_session() {
        let (streamer, publisher) = streamer(1, steady());
        streamer.start().unwrap();
        let mut state = streamer.shared.lock();
        state.model = Script {
            label: "broken",
            offsets_ms: Vec::new(),
            spacing_ms: 0,
        };
        state.buffer.clear();
        let err = state.emit_one().unwrap_err();
        state.halt(err);
        drop(state);

        assert!(!streamer.is_running());
        assert!(matches!(
            streamer.last_error().as_deref(),
            Some(StreamError::EmptyBuffer)
        ));
        assert!(!publisher.is_connected());
        streamer.stop();
        assert_eq!(publisher.disconnect_count(), 1);
    }
}
