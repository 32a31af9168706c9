use {
    super::*,
    std::{
        cell::Cell,
        panic::{self, AssertUnwindSafe},
    },
};

thread_local! {
    static APPENDING: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is inside [`LogSink::append`]. Log sources
/// check this and drop events raised from within the broadcast path.
pub(crate) fn appending() -> bool {
    APPENDING.with(Cell::get)
}

struct AppendGuard;

impl AppendGuard {
    fn enter() -> Option<Self> {
        APPENDING.with(|appending| {
            if appending.get() {
                None
            } else {
                appending.set(true);
                Some(Self)
            }
        })
    }
}

impl Drop for AppendGuard {
    fn drop(&mut self) {
        APPENDING.with(|appending| appending.set(false));
    }
}

/// Receiver of captured log events. Called synchronously on the producing
/// thread and must never panic or block for long.
pub trait LogSink: Send + Sync {
    fn append(&self, event: LogEvent);
}

/// Which failure details survive capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    pub include_exceptions: bool,
    pub include_stack_traces: bool,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            include_exceptions: true,
            include_stack_traces: true,
        }
    }
}

impl CapturePolicy {
    pub fn apply(self, mut event: LogEvent) -> LogEvent {
        if !self.include_exceptions {
            event.exception = None;
        }

        if !self.include_stack_traces || event.exception.is_none() {
            event.stack_frames = None;
        }

        event
    }
}

/// Stores every event in the ring buffer and pushes it to each subscriber.
///
/// Append and fan-out run under one sequencer lock, so all subscribers see
/// events in buffer order. A subscriber whose send fails (or panics) is closed
/// and unregistered; the others are unaffected.
pub struct BroadcastAppender {
    buffer: Arc<RingBuffer>,
    registry: Arc<SubscriberRegistry>,
    formatter: PayloadFormatter,
    policy: CapturePolicy,
    sequencer: Mutex<()>,
    evicted: AtomicU64,
    faults: AtomicU64,
}

impl BroadcastAppender {
    pub fn new(
        buffer: Arc<RingBuffer>,
        registry: Arc<SubscriberRegistry>,
        formatter: PayloadFormatter,
        policy: CapturePolicy,
    ) -> Self {
        Self {
            buffer,
            registry,
            formatter,
            policy,
            sequencer: Mutex::new(()),
            evicted: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    pub fn formatter(&self) -> &PayloadFormatter {
        &self.formatter
    }

    /// Subscribers removed because a send to them failed.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Events that could not be encoded or whose processing panicked.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Runs `f` with appends held off. Events raised on this thread while `f`
    /// runs are dropped, so `f` must not rely on its own logging.
    pub fn quiesce<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = AppendGuard::enter();
        let _sequencer = self.sequencer.lock();
        f()
    }

    fn dispatch(&self, event: LogEvent) {
        let event = self.policy.apply(event);

        let _sequencer = self.sequencer.lock();

        let entry = self.buffer.append(event);

        let frame = match self.formatter.encode(&entry) {
            Ok(frame) => frame,
            Err(err) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                debug!(seq = entry.seq, "Dropping unencodable log event from broadcast: {err}");
                return;
            }
        };

        for subscriber in self.registry.active_subscribers() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                subscriber.deliver(&entry, &frame)
            }))
            .unwrap_or(Err(SendError::Panicked));

            if let Err(err) = result {
                self.evict(&subscriber, &err);
            }
        }
    }

    fn evict(&self, subscriber: &Subscriber, reason: &SendError) {
        if panic::catch_unwind(AssertUnwindSafe(|| subscriber.close())).is_err() {
            subscriber.mark_closed();
        }

        if self.registry.unregister(subscriber.id()).is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(subscriber = %subscriber.id(), "Evicted live log subscriber: {reason}");
        }
    }
}

impl LogSink for BroadcastAppender {
    fn append(&self, event: LogEvent) {
        let Some(_guard) = AppendGuard::enter() else {
            return;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(event))).is_err() {
            self.faults.fetch_add(1, Ordering::Relaxed);
        }
    }
}
