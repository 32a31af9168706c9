//! In-memory live log capture: a bounded ring buffer of recent events that is
//! broadcast to every connected stream subscriber.

use super::*;

pub use {
    appender::{BroadcastAppender, CapturePolicy, LogSink},
    config::{ConnectionTimeout, LiveLogsConfig},
    error::{ConfigError, FilterError, PayloadError, SendError, StreamError},
    event::{Level, LogEvent},
    payload::{EventTag, Frame, Payload, PayloadFormatter, TimestampFormat},
    registry::{Backlog, StreamFilter, Subscriber, SubscriberId, SubscriberRegistry, Transport},
    ring_buffer::{Entry, RingBuffer},
    source::{LogSource, TracingSource},
};

use error::*;

mod appender;
mod config;
mod error;
mod event;
mod payload;
mod registry;
mod ring_buffer;
mod source;

/// Point-in-time view of the live log machinery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub enabled: bool,
    pub attached: bool,
    pub capacity: usize,
    pub buffered: usize,
    pub total_appended: u64,
    pub subscribers: usize,
    pub evicted_subscribers: u64,
    pub faults: u64,
    pub event_tag: String,
}

/// Owns the ring buffer, subscriber registry and broadcast appender, and
/// wires the appender into a [`LogSource`].
pub struct LiveLogs {
    config: LiveLogsConfig,
    buffer: Arc<RingBuffer>,
    registry: Arc<SubscriberRegistry>,
    appender: Arc<BroadcastAppender>,
    sink: Arc<dyn LogSink>,
    source: Arc<dyn LogSource>,
    attached: AtomicBool,
}

impl LiveLogs {
    pub fn new(config: LiveLogsConfig, source: Arc<dyn LogSource>) -> Self {
        let buffer = Arc::new(RingBuffer::new(config.max_logs_in_memory));
        let registry = Arc::new(SubscriberRegistry::default());

        let appender = Arc::new(BroadcastAppender::new(
            buffer.clone(),
            registry.clone(),
            config.formatter(),
            config.capture_policy(),
        ));

        Self {
            sink: appender.clone(),
            config,
            buffer,
            registry,
            appender,
            source,
            attached: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LiveLogsConfig {
        &self.config
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Attaches the appender to the log source. Does nothing when disabled or
    /// already attached.
    pub fn start(&self) {
        if !self.config.enabled || self.attached.swap(true, Ordering::AcqRel) {
            return;
        }

        self.source.attach(self.sink.clone());

        info!(
            capacity = self.buffer.capacity(),
            event_tag = %self.config.event_tag,
            "Live log appender attached"
        );
    }

    /// Detaches from the log source, closes every subscriber and clears the
    /// buffer.
    pub fn stop(&self) {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }

        self.source.detach(&self.sink);

        let subscribers = self.appender.quiesce(|| self.registry.drain());

        for subscriber in &subscribers {
            subscriber.close();
        }

        self.buffer.clear();

        info!(closed = subscribers.len(), "Live log appender detached");
    }

    /// Registers a new subscriber on `transport` and, when configured, replays
    /// the buffered backlog to it before any live event.
    ///
    /// Nothing is registered when live logs are disabled or the appender is
    /// not attached. Registration and replay run with appends held off, so the
    /// replay is exactly the buffer at registration and never races `stop`.
    pub fn open_stream(
        &self,
        transport: Box<dyn Transport>,
        filter: StreamFilter,
    ) -> Result<Arc<Subscriber>, StreamError> {
        snafu::ensure!(self.config.enabled, DisabledSnafu);
        snafu::ensure!(self.is_attached(), BackendUnavailableSnafu);

        let replay = self.config.send_recent_logs_on_connect;

        let mut encoded = if replay {
            self.encode(&self.buffer.snapshot(), &filter)
        } else {
            BTreeMap::new()
        };

        let subscriber = self.appender.quiesce(|| -> Result<_, StreamError> {
            snafu::ensure!(self.is_attached(), BackendUnavailableSnafu);

            let subscriber = self.registry.register_pending(transport, filter);

            let backlog = if replay {
                self.backlog(subscriber.filter(), &mut encoded)
            } else {
                Backlog::default()
            };

            if let Err(source) = subscriber.replay(backlog) {
                subscriber.close();
                self.registry.unregister(subscriber.id());
                return Err(StreamError::Replay { source });
            }

            Ok(subscriber)
        })?;

        debug!(subscriber = %subscriber.id(), "Opened live log stream");

        Ok(subscriber)
    }

    pub fn unregister(&self, id: SubscriberId) {
        if self.registry.unregister(id).is_some() {
            debug!(subscriber = %id, "Closed live log stream");
        }
    }

    fn encode(&self, entries: &[Entry], filter: &StreamFilter) -> BTreeMap<u64, Frame> {
        entries
            .iter()
            .filter(|entry| filter.matches(&entry.event))
            .filter_map(|entry| {
                let frame = self.appender.formatter().encode(entry).ok()?;
                Some((entry.seq, frame))
            })
            .collect()
    }

    /// The current buffer as frames, reusing `encoded` for entries that were
    /// already formatted. Must run with appends held off.
    fn backlog(&self, filter: &StreamFilter, encoded: &mut BTreeMap<u64, Frame>) -> Backlog {
        let snapshot = self.buffer.snapshot();

        let covers = snapshot
            .first()
            .zip(snapshot.last())
            .map(|(first, last)| first.seq..=last.seq);

        let frames = snapshot
            .iter()
            .filter(|entry| filter.matches(&entry.event))
            .filter_map(|entry| match encoded.remove(&entry.seq) {
                Some(frame) => Some(frame),
                None => self.appender.formatter().encode(entry).ok(),
            })
            .collect();

        Backlog { frames, covers }
    }

    /// The most recent `limit` buffered events matching `filter`, oldest first.
    pub fn recent(&self, filter: &StreamFilter, limit: usize) -> Vec<Payload> {
        let matching = self
            .buffer
            .snapshot()
            .into_iter()
            .filter(|entry| filter.matches(&entry.event))
            .collect::<Vec<Entry>>();

        matching[matching.len().saturating_sub(limit)..]
            .iter()
            .filter_map(|entry| self.appender.formatter().payload(&entry.event).ok())
            .collect()
    }

    pub fn status(&self) -> Status {
        Status {
            enabled: self.config.enabled,
            attached: self.is_attached(),
            capacity: self.buffer.capacity(),
            buffered: self.buffer.len(),
            total_appended: self.buffer.total_appended(),
            subscribers: self.registry.len(),
            evicted_subscribers: self.appender.evicted(),
            faults: self.appender.faults(),
            event_tag: self.config.event_tag.to_string(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;

    /// Records every frame it is given.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        frames: Arc<Mutex<Vec<Frame>>>,
        closed: Arc<AtomicBool>,
        limit: Option<usize>,
    }

    impl RecordingTransport {
        /// Accepts `limit` frames, then reports lagging.
        pub(crate) fn with_limit(limit: usize) -> Self {
            Self {
                limit: Some(limit),
                ..Default::default()
            }
        }

        pub(crate) fn frames(&self) -> Vec<Frame> {
            self.frames.lock().clone()
        }

        pub(crate) fn seqs(&self) -> Vec<u64> {
            self.frames().iter().map(|frame| frame.seq).collect()
        }

        pub(crate) fn messages(&self) -> Vec<String> {
            self.frames()
                .iter()
                .map(|frame| {
                    serde_json::from_str::<Payload>(&frame.data)
                        .unwrap()
                        .message
                })
                .collect()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, frame: Frame) -> Result<(), SendError> {
            let mut frames = self.frames.lock();

            if let Some(limit) = self.limit
                && frames.len() >= limit
            {
                return Err(SendError::Lagging { capacity: limit });
            }

            frames.push(frame);

            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) struct FailingTransport;

    impl Transport for FailingTransport {
        fn send(&self, _frame: Frame) -> Result<(), SendError> {
            Err(SendError::Disconnected)
        }

        fn close(&self) {}
    }

    pub(crate) struct PanickingTransport;

    impl Transport for PanickingTransport {
        fn send(&self, _frame: Frame) -> Result<(), SendError> {
            panic!("transport exploded")
        }

        fn close(&self) {
            panic!("close exploded")
        }
    }

    /// A log source driven by hand.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        sinks: Mutex<Vec<Arc<dyn LogSink>>>,
    }

    impl FakeSource {
        pub(crate) fn emit(&self, event: LogEvent) {
            let sinks = self.sinks.lock().clone();

            for sink in sinks {
                sink.append(event.clone());
            }
        }

        pub(crate) fn info(&self, message: &str) {
            self.emit(LogEvent::new(Level::Info, "app", message));
        }
    }

    impl LogSource for FakeSource {
        fn attach(&self, sink: Arc<dyn LogSink>) {
            self.sinks.lock().push(sink);
        }

        fn detach(&self, sink: &Arc<dyn LogSink>) {
            self.sinks
                .lock()
                .retain(|attached| !Arc::ptr_eq(attached, sink));
        }

        fn is_attached(&self) -> bool {
            !self.sinks.lock().is_empty()
        }
    }
}
