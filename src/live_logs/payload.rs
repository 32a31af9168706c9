use {
    super::*,
    chrono::format::{Item, StrftimeItems},
    snafu::{OptionExt, ResultExt},
    std::fmt::Write as _,
};

/// One encoded event, ready to be written to any transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub event: Arc<str>,
    pub data: Arc<str>,
}

/// JSON body of every pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub timestamp: String,
    pub level: Level,
    pub thread: String,
    pub logger: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<String>>,
}

/// A validated strftime pattern, rendered in local time.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct TimestampFormat(String);

impl TimestampFormat {
    pub fn format(&self, timestamp: DateTime<Utc>) -> Result<String, PayloadError> {
        let mut formatted = String::new();

        write!(
            formatted,
            "{}",
            timestamp.with_timezone(&Local).format(&self.0)
        )
        .ok()
        .context(TimestampSnafu { format: &self.0 })?;

        Ok(formatted)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self("%I:%M:%S %p".into())
    }
}

impl FromStr for TimestampFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && StrftimeItems::new(s).all(|item| !matches!(item, Item::Error));

        snafu::ensure!(valid, InvalidTimestampFormatSnafu { format: s });

        Ok(Self(s.into()))
    }
}

impl Display for TimestampFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label attached to every pushed event, used by clients to route messages.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct EventTag(Arc<str>);

impl EventTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventTag {
    fn default() -> Self {
        Self("log".into())
    }
}

impl FromStr for EventTag {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        snafu::ensure!(
            !s.trim().is_empty() && !s.contains(['\r', '\n']),
            InvalidEventTagSnafu { tag: s }
        );

        Ok(Self(s.into()))
    }
}

impl Display for EventTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns retained entries into wire payloads and frames.
#[derive(Debug, Clone, Default)]
pub struct PayloadFormatter {
    event_tag: EventTag,
    timestamp_format: TimestampFormat,
}

impl PayloadFormatter {
    pub fn new(event_tag: EventTag, timestamp_format: TimestampFormat) -> Self {
        Self {
            event_tag,
            timestamp_format,
        }
    }

    pub fn event_tag(&self) -> &EventTag {
        &self.event_tag
    }

    pub fn payload(&self, event: &LogEvent) -> Result<Payload, PayloadError> {
        Ok(Payload {
            timestamp: self.timestamp_format.format(event.timestamp)?,
            level: event.level,
            thread: event.thread.clone(),
            logger: event.logger.clone(),
            message: event.message.clone(),
            exception: event.exception.clone(),
            stack_trace: event
                .exception
                .as_ref()
                .and(event.stack_frames.clone()),
        })
    }

    pub fn encode(&self, entry: &Entry) -> Result<Frame, PayloadError> {
        let payload = self.payload(&entry.event)?;

        Ok(Frame {
            seq: entry.seq,
            event: self.event_tag.0.clone(),
            data: serde_json::to_string(&payload).context(JsonSnafu)?.into(),
        })
    }
}
