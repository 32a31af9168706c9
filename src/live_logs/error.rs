use super::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("max logs in memory must be at least 1"))]
    InvalidCapacity,

    #[snafu(display("subscriber queue capacity must be at least 1"))]
    InvalidQueueCapacity,

    #[snafu(display("write timeout must be greater than zero"))]
    InvalidWriteTimeout,

    #[snafu(display("invalid timestamp format `{format}`"))]
    InvalidTimestampFormat { format: String },

    #[snafu(display("invalid event tag `{tag}`: must be non-empty and fit on one line"))]
    InvalidEventTag { tag: String },

    #[snafu(display(
        "invalid connection timeout `{value}`: expected `unbounded` or a number of milliseconds"
    ))]
    InvalidConnectionTimeout { value: String },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StreamError {
    #[snafu(display("live logs are disabled"))]
    Disabled,

    #[snafu(display("live log appender is not attached to the logging backend"))]
    BackendUnavailable,

    #[snafu(display("failed to replay recent logs: {source}"))]
    Replay { source: SendError },
}

/// Why a frame could not be handed to a subscriber's transport.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SendError {
    #[snafu(display("subscriber disconnected"))]
    Disconnected,

    #[snafu(display("subscriber fell behind by more than {capacity} events"))]
    Lagging { capacity: usize },

    #[snafu(display("transport panicked while sending"))]
    Panicked,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PayloadError {
    #[snafu(display("failed to format timestamp with `{format}`"))]
    Timestamp { format: String },

    #[snafu(display("failed to serialize payload: {source}"))]
    Json { source: serde_json::Error },
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FilterError {
    #[snafu(display("invalid log level `{value}`: expected trace, debug, info, warn or error"))]
    InvalidLevel { value: String },
}
