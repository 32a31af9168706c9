use {super::*, tokio::sync::mpsc::error::TrySendError};

/// Optional `level` and `logger` query parameters shared by every stream
/// route.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamQuery {
    pub(crate) level: Option<String>,
    pub(crate) logger: Option<String>,
}

impl StreamQuery {
    pub(crate) fn filter(&self) -> Result<StreamFilter, FilterError> {
        StreamFilter::parse(self.level.as_deref(), self.logger.as_deref())
    }
}

/// Bounded queue between the broadcaster and one connection task. Never
/// blocks the broadcaster: a full queue reports the subscriber as lagging.
struct ChannelTransport {
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => SendError::Lagging {
                capacity: self.tx.max_capacity(),
            },
            TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Why a connection stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Evicted by the broadcaster or closed at shutdown.
    Closed,
    TimedOut,
    ClientGone,
    WriteTimedOut,
    Failed,
}

impl Termination {
    /// Ends initiated by the server, where the transport should be closed
    /// explicitly rather than just dropped.
    pub(crate) fn server_initiated(self) -> bool {
        matches!(self, Self::Closed | Self::TimedOut)
    }
}

impl Display for Termination {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed by server",
            Self::TimedOut => "connection timeout elapsed",
            Self::ClientGone => "client disconnected",
            Self::WriteTimedOut => "write timed out",
            Self::Failed => "transport error",
        })
    }
}

/// One open stream. Unregisters its subscriber when dropped, whichever way
/// the connection ends.
pub(crate) struct Subscription {
    live: Arc<LiveLogs>,
    id: SubscriberId,
    rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    deadline: Option<Instant>,
}

impl Subscription {
    pub(crate) fn open(live: Arc<LiveLogs>, filter: StreamFilter) -> Result<Self, StreamError> {
        let (tx, rx) = mpsc::channel(live.config().queue_capacity());
        let closed = CancellationToken::new();

        let subscriber = live.open_stream(
            Box::new(ChannelTransport {
                tx,
                closed: closed.clone(),
            }),
            filter,
        )?;

        let deadline = live
            .config()
            .connection_timeout
            .duration()
            .map(|timeout| Instant::now() + timeout);

        Ok(Self {
            id: subscriber.id(),
            live,
            rx,
            closed,
            deadline,
        })
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next frame, or for the reason the stream must end.
    pub(crate) async fn next(&mut self) -> Result<Frame, Termination> {
        let deadline = self.deadline;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Termination::Closed),
            _ = expire(deadline) => Err(Termination::TimedOut),
            frame = self.rx.recv() => frame.ok_or(Termination::Closed),
        }
    }

    pub(crate) fn finish(self, termination: Termination) {
        debug!(
            subscriber = %self.id,
            "Live log stream ended: {termination}"
        );
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.cancel();
        self.rx.close();
        self.live.unregister(self.id);
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::live_logs::{ConnectionTimeout, LogEvent, fakes::FakeSource},
    };

    struct Fixture {
        source: Arc<FakeSource>,
        live: Arc<LiveLogs>,
    }

    fn fixture(config: LiveLogsConfig) -> Fixture {
        let source = Arc::new(FakeSource::default());
        let live = Arc::new(LiveLogs::new(config, source.clone()));
        live.start();
        Fixture { source, live }
    }

    fn message(frame: &Frame) -> String {
        serde_json::from_str::<Payload>(&frame.data).unwrap().message
    }

    #[tokio::test]
    async fn backlog_then_live() {
        let fixture = fixture(LiveLogsConfig::default());

        fixture.source.info("before");

        let mut subscription =
            Subscription::open(fixture.live.clone(), StreamFilter::default()).unwrap();

        fixture.source.info("after");

        assert_eq!(message(&subscription.next().await.unwrap()), "before");
        assert_eq!(message(&subscription.next().await.unwrap()), "after");
    }

    #[tokio::test]
    async fn query_filter_is_applied() {
        let fixture = fixture(LiveLogsConfig::default());

        let query = StreamQuery {
            level: Some("warn".into()),
            logger: None,
        };

        let mut subscription =
            Subscription::open(fixture.live.clone(), query.filter().unwrap()).unwrap();

        fixture.source.info("quiet");
        fixture
            .source
            .emit(LogEvent::new(Level::Error, "app", "loud"));

        assert_eq!(message(&subscription.next().await.unwrap()), "loud");
    }

    #[test]
    fn invalid_query_level() {
        let query = StreamQuery {
            level: Some("loud".into()),
            logger: None,
        };

        assert!(query.filter().is_err());
    }

    #[tokio::test]
    async fn drop_unregisters() {
        let fixture = fixture(LiveLogsConfig::default());

        let subscription =
            Subscription::open(fixture.live.clone(), StreamFilter::default()).unwrap();

        assert_eq!(fixture.live.subscriber_count(), 1);

        drop(subscription);

        assert_eq!(fixture.live.subscriber_count(), 0);

        fixture.source.info("nobody listening");
    }

    #[tokio::test(start_paused = true)]
    async fn connection_timeout_ends_stream() {
        let fixture = fixture(LiveLogsConfig {
            connection_timeout: ConnectionTimeout::After(Duration::from_secs(30)),
            ..Default::default()
        });

        let mut subscription =
            Subscription::open(fixture.live.clone(), StreamFilter::default()).unwrap();

        assert_eq!(subscription.next().await, Err(Termination::TimedOut));

        subscription.finish(Termination::TimedOut);

        assert_eq!(fixture.live.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_closed() {
        let fixture = fixture(
            LiveLogsConfig::default()
                .max_logs_in_memory(1)
                .unwrap()
                .subscriber_queue_capacity(1)
                .unwrap(),
        );

        let mut subscription =
            Subscription::open(fixture.live.clone(), StreamFilter::default()).unwrap();

        for i in 0..3 {
            fixture.source.info(&i.to_string());
        }

        assert_eq!(fixture.live.subscriber_count(), 0);
        assert_eq!(subscription.next().await, Err(Termination::Closed));
        assert_eq!(fixture.live.status().evicted_subscribers, 1);
    }

    #[tokio::test]
    async fn stop_closes_open_streams() {
        let fixture = fixture(LiveLogsConfig::default());

        let mut subscription =
            Subscription::open(fixture.live.clone(), StreamFilter::default()).unwrap();

        fixture.live.stop();

        assert_eq!(subscription.next().await, Err(Termination::Closed));
    }

    #[tokio::test]
    async fn open_fails_when_detached() {
        let fixture = fixture(LiveLogsConfig::default());

        fixture.live.stop();

        assert!(matches!(
            Subscription::open(fixture.live.clone(), StreamFilter::default()),
            Err(StreamError::BackendUnavailable)
        ));
        assert_eq!(fixture.live.subscriber_count(), 0);
    }

    #[test]
    fn server_initiated_terminations() {
        assert!(Termination::Closed.server_initiated());
        assert!(Termination::TimedOut.server_initiated());
        assert!(!Termination::ClientGone.server_initiated());
        assert!(!Termination::WriteTimedOut.server_initiated());
    }
}
