use {super::*, snafu::OptionExt};

/// How long a single stream may stay open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub enum ConnectionTimeout {
    #[default]
    Unbounded,
    After(Duration),
}

impl ConnectionTimeout {
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::Unbounded => None,
            Self::After(duration) => Some(duration),
        }
    }
}

impl FromStr for ConnectionTimeout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        match s.to_lowercase().as_str() {
            "unbounded" | "none" | "never" | "0" => Ok(Self::Unbounded),
            _ => s
                .parse::<u64>()
                .ok()
                .map(|millis| Self::After(Duration::from_millis(millis)))
                .context(InvalidConnectionTimeoutSnafu { value: s }),
        }
    }
}

impl Display for ConnectionTimeout {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::After(duration) => write!(f, "{}", duration.as_millis()),
        }
    }
}

/// Resolved live-log configuration. Every value here has already been validated.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveLogsConfig {
    pub enabled: bool,
    pub max_logs_in_memory: NonZeroUsize,
    pub send_recent_logs_on_connect: bool,
    pub include_exceptions: bool,
    pub include_stack_traces: bool,
    pub event_tag: EventTag,
    pub timestamp_format: TimestampFormat,
    pub connection_timeout: ConnectionTimeout,
    pub write_timeout: Duration,
    pub subscriber_queue_capacity: NonZeroUsize,
}

impl Default for LiveLogsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_logs_in_memory: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
            send_recent_logs_on_connect: true,
            include_exceptions: true,
            include_stack_traces: true,
            event_tag: EventTag::default(),
            timestamp_format: TimestampFormat::default(),
            connection_timeout: ConnectionTimeout::Unbounded,
            write_timeout: Duration::from_secs(5),
            subscriber_queue_capacity: NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl LiveLogsConfig {
    pub fn max_logs_in_memory(mut self, value: usize) -> Result<Self, ConfigError> {
        self.max_logs_in_memory = NonZeroUsize::new(value).context(InvalidCapacitySnafu)?;
        Ok(self)
    }

    pub fn subscriber_queue_capacity(mut self, value: usize) -> Result<Self, ConfigError> {
        self.subscriber_queue_capacity =
            NonZeroUsize::new(value).context(InvalidQueueCapacitySnafu)?;
        Ok(self)
    }

    pub fn write_timeout(mut self, value: Duration) -> Result<Self, ConfigError> {
        snafu::ensure!(!value.is_zero(), InvalidWriteTimeoutSnafu);
        self.write_timeout = value;
        Ok(self)
    }

    /// Per-subscriber queue length. Large enough to take a full backlog replay
    /// plus a burst of live events without the broadcaster ever blocking.
    pub fn queue_capacity(&self) -> usize {
        self.max_logs_in_memory
            .get()
            .saturating_add(self.subscriber_queue_capacity.get())
    }

    pub fn formatter(&self) -> PayloadFormatter {
        PayloadFormatter::new(self.event_tag.clone(), self.timestamp_format.clone())
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy {
            include_exceptions: self.include_exceptions,
            include_stack_traces: self.include_exceptions && self.include_stack_traces,
        }
    }
}
