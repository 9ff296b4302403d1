//! ---
//! ps_section: "02-messaging-wire-model"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Publisher contract with in-memory, JSON-lines and TCP implementations."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{MessagingError, PublishedEvent, Result, WireEvent};

/// Connect/send/disconnect contract the streamer relies on.
pub trait Publisher: Send {
    /// Establish the broker connection.
    fn connect(&mut self) -> Result<()>;
    /// Publish a single event. Fails with [`MessagingError::NotConnected`] when
    /// no connection is held.
    fn send(&mut self, event: &WireEvent) -> Result<()>;
    /// Tear down the broker connection.
    fn disconnect(&mut self) -> Result<()>;
    /// Whether a connection is currently held.
    fn is_connected(&self) -> bool;
    /// Human-readable publisher name for logging/metrics.
    fn name(&self) -> &'static str;
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn send(&mut self, event: &WireEvent) -> Result<()> {
        (**self).send(event)
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    connected: bool,
    connects: u64,
    disconnects: u64,
    events: VecDeque<PublishedEvent>,
}

/// In-memory publisher backed by a mutex protected queue.
///
/// Clones share the same queue, so a test can keep one handle while the
/// streamer owns another.
#[derive(Debug, Clone)]
pub struct InMemoryPublisher {
    topic_base: Arc<str>,
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryPublisher {
    /// Create a new in-memory publisher resolving topics under `topic_base`.
    pub fn new(topic_base: impl Into<String>) -> Self {
        Self {
            topic_base: Arc::from(topic_base.into()),
            state: Arc::new(Mutex::new(InMemoryState::default())),
        }
    }

    /// Pop the oldest published event.
    pub fn recv(&self) -> Option<PublishedEvent> {
        self.state.lock().events.pop_front()
    }

    /// Take every published event currently queued.
    pub fn drain(&self) -> Vec<PublishedEvent> {
        self.state.lock().events.drain(..).collect()
    }

    /// Number of events waiting in the queue.
    pub fn queued(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> u64 {
        self.state.lock().connects
    }

    /// Number of `disconnect` calls that closed a live connection.
    pub fn disconnect_count(&self) -> u64 {
        self.state.lock().disconnects
    }

    /// Drop the connection from the broker side, as a flaky network would.
    pub fn sever(&self) {
        self.state.lock().connected = false;
    }
}

impl Publisher for InMemoryPublisher {
    fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn send(&mut self, event: &WireEvent) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(MessagingError::NotConnected(self.name()));
        }
        state
            .events
            .push_back(PublishedEvent::new(&self.topic_base, event));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.connected {
            state.connected = false;
            state.disconnects += 1;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Publisher writing one JSON object per line to any writer (stdout, a file).
pub struct JsonLinesPublisher<W: Write + Send> {
    topic_base: String,
    writer: W,
    connected: bool,
}

impl<W: Write + Send> JsonLinesPublisher<W> {
    /// Wrap `writer`, resolving topics under `topic_base`.
    pub fn new(topic_base: impl Into<String>, writer: W) -> Self {
        Self {
            topic_base: topic_base.into(),
            writer,
            connected: false,
        }
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Publisher for JsonLinesPublisher<W> {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, event: &WireEvent) -> Result<()> {
        if !self.connected {
            return Err(MessagingError::NotConnected(self.name()));
        }
        serde_json::to_writer(&mut self.writer, &PublishedEvent::new(&self.topic_base, event))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            self.writer.flush()?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &'static str {
        "json_lines"
    }
}

/// Publisher streaming newline-delimited JSON frames to a broker over TCP.
pub struct TcpPublisher {
    address: String,
    topic_base: String,
    stream: Option<BufWriter<TcpStream>>,
}

impl TcpPublisher {
    /// Create a publisher for `address`; no connection is made until `connect`.
    pub fn new(address: impl Into<String>, topic_base: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topic_base: topic_base.into(),
            stream: None,
        }
    }
}

impl Publisher for TcpPublisher {
    fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.address).map_err(|source| MessagingError::Connect {
            address: self.address.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        info!(address = %self.address, "tcp publisher connected");
        self.stream = Some(BufWriter::new(stream));
        Ok(())
    }

    fn send(&mut self, event: &WireEvent) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(MessagingError::NotConnected("tcp"))?;
        serde_json::to_writer(&mut *stream, &PublishedEvent::new(&self.topic_base, event))?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
            if let Err(err) = stream.get_ref().shutdown(Shutdown::Both) {
                debug!(error = %err, "tcp shutdown after flush failed");
            }
            info!(address = %self.address, "tcp publisher disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
