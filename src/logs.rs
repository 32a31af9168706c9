use {
    super::*,
    anyhow::Context,
    tracing_appender::non_blocking::WorkerGuard,
    tracing_subscriber::{fmt, reload},
};

pub const DEFAULT_FILTER: &str = "info";

type Reload = Box<dyn Fn(EnvFilter) -> Result<(), reload::Error> + Send + Sync>;

/// Handle on the process-wide logging setup: the live-log source layer and
/// the reloadable filter in front of it.
pub struct Logs {
    source: TracingSource,
    filter: Mutex<String>,
    reload: Reload,
}

impl Logs {
    pub fn new<S>(source: TracingSource, handle: reload::Handle<EnvFilter, S>) -> Self
    where
        S: 'static,
    {
        Self {
            source,
            filter: Mutex::new(DEFAULT_FILTER.into()),
            reload: Box::new(move |filter| handle.reload(filter)),
        }
    }

    pub fn source(&self) -> TracingSource {
        self.source.clone()
    }

    /// Directive currently applied to events reaching the live-log source.
    pub fn filter(&self) -> String {
        self.filter.lock().clone()
    }

    pub fn set_filter(&self, directive: &str) -> Result {
        let directive = directive.trim();

        let filter = EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter `{directive}`"))?;

        (self.reload)(filter).context("failed to reload live log filter")?;

        *self.filter.lock() = directive.into();

        Ok(())
    }
}

/// Installs the global subscriber: human-readable output on stderr (filtered
/// by `RUST_LOG`) and the live-log source behind a reloadable filter.
pub fn init() -> (Arc<Logs>, WorkerGuard) {
    let (writer, guard) = non_blocking(io::stderr());

    let source = TracingSource::default();

    let (filter, handle) = reload::Layer::new(EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(source.clone().with_filter(filter))
        .init();

    (Arc::new(Logs::new(source, handle)), guard)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::live_logs::{LogEvent, LogSink, LogSource},
    };

    fn logs() -> (Logs, impl tracing::Subscriber + Send + Sync) {
        let source = TracingSource::default();
        let (filter, handle) = reload::Layer::new(EnvFilter::new(DEFAULT_FILTER));

        let subscriber = tracing_subscriber::registry().with(source.clone().with_filter(filter));

        (Logs::new(source, handle), subscriber)
    }

    #[derive(Default)]
    struct Counter(AtomicU64);

    impl LogSink for Counter {
        fn append(&self, _event: LogEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn default_filter() {
        let (logs, _subscriber) = logs();
        assert_eq!(logs.filter(), "info");
    }

    #[test]
    fn set_filter_changes_what_reaches_the_source() {
        let (logs, subscriber) = logs();
        let counter = Arc::new(Counter::default());
        logs.source().attach(counter.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("hidden");
            tracing::info!("shown");

            logs.set_filter("debug").unwrap();

            tracing::debug!("now shown");
        });

        assert_eq!(logs.filter(), "debug");
        assert_eq!(counter.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let (logs, _subscriber) = logs();

        assert!(logs.set_filter("info,app=loudest").is_err());
        assert_eq!(logs.filter(), "info");
    }
}
