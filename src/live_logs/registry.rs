use {super::*, std::ops::RangeInclusive};

/// Push capability of one connected client.
///
/// `send` must not block: transports that cannot write immediately report
/// [`SendError::Lagging`] instead of waiting.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), SendError>;

    /// Asks the transport to shut the connection down. Must be idempotent.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriberId(u64);

impl Display for SubscriberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-subscriber event selection, applied to backlog and live events alike.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    pub min_level: Option<Level>,
    pub logger_prefix: Option<String>,
}

impl StreamFilter {
    pub fn matches(&self, event: &LogEvent) -> bool {
        self.min_level.is_none_or(|min| event.level >= min)
            && self
                .logger_prefix
                .as_deref()
                .is_none_or(|prefix| within(&event.logger, prefix))
    }

    /// Builds a filter from optional `level` and `logger` query values.
    pub fn parse(level: Option<&str>, logger: Option<&str>) -> Result<Self, FilterError> {
        let min_level = match level.map(str::trim).filter(|level| !level.is_empty()) {
            Some(level) => Some(level.parse::<Level>()?),
            None => None,
        };

        let logger_prefix = logger
            .map(str::trim)
            .filter(|logger| !logger.is_empty())
            .map(String::from);

        Ok(Self {
            min_level,
            logger_prefix,
        })
    }
}

/// Whether `logger` is `prefix` itself or nested below it, by `::` or `.`
/// segments.
fn within(logger: &str, prefix: &str) -> bool {
    let Some(rest) = logger.strip_prefix(prefix) else {
        return false;
    };

    rest.is_empty()
        || rest.starts_with("::")
        || rest.starts_with('.')
        || prefix.ends_with("::")
        || prefix.ends_with('.')
}

/// Frames the replay must send, and which sequence numbers the snapshot
/// behind them covered.
#[derive(Debug, Clone, Default)]
pub struct Backlog {
    pub frames: Vec<Frame>,
    pub covers: Option<RangeInclusive<u64>>,
}

enum Gate {
    Replaying(Vec<Frame>),
    Live,
}

pub struct Subscriber {
    id: SubscriberId,
    transport: Box<dyn Transport>,
    filter: StreamFilter,
    closed: AtomicBool,
    gate: Mutex<Gate>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn filter(&self) -> &StreamFilter {
        &self.filter
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hands one broadcast frame to this subscriber. Closed subscribers and
    /// events outside the filter are skipped. While a replay is in progress the
    /// frame is parked and sent once the backlog is out.
    pub fn deliver(&self, entry: &Entry, frame: &Frame) -> Result<(), SendError> {
        if self.is_closed() || !self.filter.matches(&entry.event) {
            return Ok(());
        }

        let mut gate = self.gate.lock();

        match &mut *gate {
            Gate::Replaying(pending) => {
                pending.push(frame.clone());
                Ok(())
            }
            Gate::Live => self.transport.send(frame.clone()),
        }
    }

    /// Sends the backlog, then everything parked since registration that the
    /// backlog did not already contain, and switches to live delivery.
    ///
    /// Parked frames older than the snapshot were evicted before it was taken
    /// and go out first, so the subscriber sees a single ordered sequence.
    pub fn replay(&self, backlog: Backlog) -> Result<(), SendError> {
        let mut gate = self.gate.lock();

        let pending = match std::mem::replace(&mut *gate, Gate::Live) {
            Gate::Replaying(pending) => pending,
            Gate::Live => Vec::new(),
        };

        let (first, last) = match &backlog.covers {
            Some(range) => (*range.start(), *range.end()),
            None => (u64::MAX, 0),
        };

        let (before, after): (Vec<Frame>, Vec<Frame>) = pending
            .into_iter()
            .filter(|frame| frame.seq < first || frame.seq > last)
            .partition(|frame| frame.seq < first);

        for frame in before.into_iter().chain(backlog.frames).chain(after) {
            self.transport.send(frame)?;
        }

        Ok(())
    }

    /// Marks the subscriber closed and shuts its transport down.
    pub fn close(&self) {
        self.mark_closed();
        self.transport.close();
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// The set of connected subscribers.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriberId, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    /// Registers a subscriber that receives broadcasts immediately.
    pub fn register(
        &self,
        transport: Box<dyn Transport>,
        filter: StreamFilter,
    ) -> Arc<Subscriber> {
        self.insert(transport, filter, Gate::Live)
    }

    /// Registers a subscriber whose broadcasts are parked until
    /// [`Subscriber::replay`] runs.
    pub fn register_pending(
        &self,
        transport: Box<dyn Transport>,
        filter: StreamFilter,
    ) -> Arc<Subscriber> {
        self.insert(transport, filter, Gate::Replaying(Vec::new()))
    }

    fn insert(
        &self,
        transport: Box<dyn Transport>,
        filter: StreamFilter,
        gate: Gate,
    ) -> Arc<Subscriber> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let subscriber = Arc::new(Subscriber {
            id,
            transport,
            filter,
            closed: AtomicBool::new(false),
            gate: Mutex::new(gate),
        });

        self.subscribers.lock().insert(id, subscriber.clone());

        subscriber
    }

    /// Removes the subscriber if it is still registered. Safe to call any
    /// number of times from any path.
    pub fn unregister(&self, id: SubscriberId) -> Option<Arc<Subscriber>> {
        let removed = self.subscribers.lock().remove(&id);

        if let Some(subscriber) = &removed {
            subscriber.mark_closed();
        }

        removed
    }

    /// Point-in-time copy of the active set, in registration order.
    pub fn active_subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Removes every subscriber, returning them so the caller can close them.
    pub fn drain(&self) -> Vec<Arc<Subscriber>> {
        let drained = std::mem::take(&mut *self.subscribers.lock());

        drained
            .into_values()
            .inspect(|subscriber| subscriber.mark_closed())
            .collect()
    }
}
