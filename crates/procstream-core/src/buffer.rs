//! ---
//! ps_section: "05-stream-core"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "In-flight trace instances multiplexed into one event stream."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use chrono::{DateTime, Utc};
use procstream_sim::{StreamEvent, Trace};
use tracing::debug;

use crate::{Result, StreamError};

/// A trace admitted to the buffer with its not-yet-emitted events.
/// Never empty while stored in the heap.
#[derive(Debug)]
struct Instance {
    sequence: u64,
    events: VecDeque<StreamEvent>,
}

impl Instance {
    fn key(&self) -> (Option<DateTime<Utc>>, u64) {
        (self.events.front().map(StreamEvent::timestamp), self.sequence)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Instance {}

impl PartialOrd for Instance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Instance {
    // Reversed so the max-heap yields the earliest head, then the oldest admission.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Working set of in-flight trace instances served as a single event stream.
#[derive(Debug)]
pub struct StreamBuffer {
    max_parallel_instances: usize,
    instances: BinaryHeap<Instance>,
    pending_events: usize,
    next_sequence: u64,
}

impl StreamBuffer {
    /// Create an empty buffer sustaining up to `max_parallel_instances` instances.
    pub fn new(max_parallel_instances: usize) -> Self {
        Self {
            max_parallel_instances,
            instances: BinaryHeap::new(),
            pending_events: 0,
            next_sequence: 0,
        }
    }

    /// Admit `trace` as a new in-flight instance.
    ///
    /// Returns `false` when the trace carries no events; such a trace could
    /// never be retired and is dropped instead.
    pub fn enqueue_trace(&mut self, trace: Trace) -> bool {
        if trace.is_empty() {
            debug!(case_id = trace.case_id(), "ignoring empty trace");
            return false;
        }
        let events: VecDeque<_> = trace.into_events().into();
        self.pending_events += events.len();
        self.instances.push(Instance {
            sequence: self.next_sequence,
            events,
        });
        self.next_sequence += 1;
        true
    }

    /// Remove and return the earliest pending event across all instances.
    ///
    /// Ties on the original timestamp go to the instance admitted first. An
    /// instance is retired once its last event has been taken.
    pub fn next_event(&mut self) -> Result<StreamEvent> {
        let mut instance = self.instances.pop().ok_or(StreamError::EmptyBuffer)?;
        let event = instance
            .events
            .pop_front()
            .ok_or(StreamError::EmptyBuffer)?;
        self.pending_events -= 1;
        if !instance.events.is_empty() {
            self.instances.push(instance);
        }
        Ok(event)
    }

    /// Whether fewer instances are in flight than the configured maximum.
    pub fn needs_more_traces(&self) -> bool {
        self.instances.len() < self.max_parallel_instances
    }

    /// Total events still queued across all in-flight instances.
    pub fn pending_event_count(&self) -> usize {
        self.pending_events
    }

    /// Number of in-flight instances.
    pub fn in_flight(&self) -> usize {
        self.instances.len()
    }

    /// Configured parallelism target.
    pub fn max_parallel_instances(&self) -> usize {
        self.max_parallel_instances
    }

    /// Whether no event is pending.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Drop every in-flight instance and its unemitted events.
    pub fn clear(&mut self) {
        self.instances.clear();
        self.pending_events = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn trace(case_id: &str, offsets_ms: &[i64]) -> Trace {
        let events = offsets_ms
            .iter()
            .enumerate()
            .map(|(index, offset)| {
                StreamEvent::new(
                    case_id,
                    format!("step-{index}"),
                    origin() + ChronoDuration::milliseconds(*offset),
                )
            })
            .collect();
        Trace::new(case_id, events)
    }

    fn drain(buffer: &mut StreamBuffer) -> Vec<StreamEvent> {
        std::iter::from_fn(|| buffer.next_event().ok()).collect()
    }

    #[test]
    fn interleaves_instances_by_earliest_timestamp() {
        let mut buffer = StreamBuffer::new(2);
        buffer.enqueue_trace(trace("a", &[0, 30, 60]));
        buffer.enqueue_trace(trace("b", &[10, 20, 70]));

        let order: Vec<_> = drain(&mut buffer)
            .iter()
            .map(|e| format!("{}:{}", e.case_id(), e.activity()))
            .collect();
        assert_eq!(
            order,
            ["a:step-0", "b:step-0", "b:step-1", "a:step-1", "a:step-2", "b:step-2"]
        );
    }

    #[test]
    fn ties_go_to_the_earlier_admitted_instance() {
        let mut buffer = StreamBuffer::new(3);
        buffer.enqueue_trace(trace("late", &[50]));
        buffer.enqueue_trace(trace("first", &[0, 100]));
        buffer.enqueue_trace(trace("second", &[0, 100]));

        let cases: Vec<_> = drain(&mut buffer)
            .iter()
            .map(|e| e.case_id().to_owned())
            .collect();
        assert_eq!(cases, ["first", "second", "late", "first", "second"]);
    }

    #[test]
    fn exhausted_instances_are_retired() {
        let mut buffer = StreamBuffer::new(2);
        buffer.enqueue_trace(trace("a", &[0]));
        buffer.enqueue_trace(trace("b", &[5, 10]));
        assert_eq!(buffer.in_flight(), 2);
        assert!(!buffer.needs_more_traces());

        let first = buffer.next_event().unwrap();
        assert_eq!(first.case_id(), "a");
        assert_eq!(buffer.in_flight(), 1);
        assert!(buffer.needs_more_traces());
        assert_eq!(buffer.pending_event_count(), 2);
    }

    #[test]
    fn empty_buffer_is_an_error() {
        let mut buffer = StreamBuffer::new(1);
        assert!(matches!(buffer.next_event(), Err(StreamError::EmptyBuffer)));
    }

    #[test]
    fn empty_traces_are_not_admitted() {
        let mut buffer = StreamBuffer::new(1);
        assert!(!buffer.enqueue_trace(Trace::new("empty", Vec::new())));
        assert_eq!(buffer.in_flight(), 0);
        assert!(buffer.needs_more_traces());
    }

    #[test]
    fn clear_discards_everything() {
        let mut buffer = StreamBuffer::new(2);
        buffer.enqueue_trace(trace("a", &[0, 1, 2]));
        buffer.enqueue_trace(trace("b", &[0, 1]));
        buffer.next_event().unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.pending_event_count(), 0);
        assert!(buffer.needs_more_traces());
    }

    #[test]
    fn randomized_traces_preserve_order_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..25 {
            let mut buffer = StreamBuffer::new(8);
            let mut expected_counts = HashMap::new();
            for case in 0..rng.gen_range(1..8) {
                let mut at = rng.gen_range(0..500);
                let offsets: Vec<i64> = (0..rng.gen_range(1..6))
                    .map(|_| {
                        at += rng.gen_range(0..50);
                        at
                    })
                    .collect();
                let case_id = format!("case_{case}");
                expected_counts.insert(case_id.clone(), offsets.len());
                buffer.enqueue_trace(trace(&case_id, &offsets));
            }

            let total = buffer.pending_event_count();
            let mut emitted: Vec<StreamEvent> = Vec::with_capacity(total);
            while !buffer.is_empty() {
                // All traces were admitted up front, so the merge is globally non-decreasing.
                let next = buffer.next_event().unwrap();
                if let Some(previous) = emitted.last() {
                    assert!(previous.timestamp() <= next.timestamp());
                }
                emitted.push(next);
            }
            assert_eq!(emitted.len(), total);

            let mut seen: HashMap<String, Vec<String>> = HashMap::new();
            for event in &emitted {
                seen.entry(event.case_id().to_owned())
                    .or_default()
                    .push(event.activity().to_owned());
            }
            for (case_id, activities) in seen {
                let expected: Vec<_> = (0..expected_counts[&case_id])
                    .map(|index| format!("step-{index}"))
                    .collect();
                assert_eq!(activities, expected, "per-instance order for {case_id}");
            }
        }
    }
}
