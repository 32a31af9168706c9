use {
    super::*,
    std::panic::{self, AssertUnwindSafe},
    tracing::field::{Field, Visit},
};

/// Attach point offered by a logging backend.
pub trait LogSource: Send + Sync {
    fn attach(&self, sink: Arc<dyn LogSink>);

    fn detach(&self, sink: &Arc<dyn LogSink>);

    fn is_attached(&self) -> bool;
}

/// `tracing` layer that captures every event it sees and forwards it to the
/// attached sinks.
#[derive(Clone, Default)]
pub struct TracingSource {
    sinks: Arc<RwLock<Vec<Arc<dyn LogSink>>>>,
}

impl LogSource for TracingSource {
    fn attach(&self, sink: Arc<dyn LogSink>) {
        let mut sinks = self.sinks.write();

        if !sinks.iter().any(|attached| Arc::ptr_eq(attached, &sink)) {
            sinks.push(sink);
        }
    }

    fn detach(&self, sink: &Arc<dyn LogSink>) {
        self.sinks
            .write()
            .retain(|attached| !Arc::ptr_eq(attached, sink));
    }

    fn is_attached(&self) -> bool {
        !self.sinks.read().is_empty()
    }
}

impl<S> Layer<S> for TracingSource
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if appender::appending() {
            return;
        }

        let sinks = self.sinks.read().clone();

        if sinks.is_empty() {
            return;
        }

        let Ok(captured) = panic::catch_unwind(AssertUnwindSafe(|| capture(event))) else {
            return;
        };

        for sink in sinks {
            sink.append(captured.clone());
        }
    }
}

fn capture(event: &tracing::Event<'_>) -> LogEvent {
    let metadata = event.metadata();

    let mut visitor = EventVisitor::default();
    event.record(&mut visitor);

    let mut message = visitor.message;

    for field in visitor.fields {
        if !message.is_empty() {
            message.push(' ');
        }
        message.push_str(&field);
    }

    let mut captured = LogEvent::new(metadata.level().into(), metadata.target(), message);

    captured.exception = visitor.exception;
    captured.stack_frames = visitor.frames;

    captured
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<String>,
    exception: Option<String>,
    frames: Option<Vec<String>>,
}

impl EventVisitor {
    fn is_exception_field(&self, field: &Field) -> bool {
        self.exception.is_none() && matches!(field.name(), "error" | "exception")
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else if self.is_exception_field(field) {
            self.exception = Some(format!("{value:?}"));
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.into();
        } else if self.is_exception_field(field) {
            self.exception = Some(value.into());
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.exception.is_some() {
            self.fields.push(format!("{}={value}", field.name()));
            return;
        }

        let mut frames = Vec::new();
        let mut source = value.source();

        while let Some(cause) = source {
            frames.push(cause.to_string());
            source = cause.source();
        }

        self.exception = Some(value.to_string());
        self.frames = Some(frames);
    }
}
