use {
    super::*,
    anyhow::Context,
    reqwest::{Url, header::ACCEPT},
    std::mem,
};

#[derive(Clone, Debug, Parser)]
pub struct Tail {
    #[arg(
        long,
        default_value = "http://127.0.0.1:8080",
        help = "Connect to the server at <URL>."
    )]
    url: String,
    #[arg(long, help = "Only show events at or above <LEVEL>.")]
    level: Option<Level>,
    #[arg(long, help = "Only show events whose logger starts with <LOGGER>.")]
    logger: Option<String>,
    #[arg(long, help = "Print raw JSON payloads.")]
    json: bool,
    #[arg(long, help = "Exit after <COUNT> events.")]
    count: Option<usize>,
}

impl Tail {
    pub(crate) fn run(self) -> Result {
        if self.count == Some(0) {
            return Ok(());
        }

        let url = self.stream_url()?;

        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Option::<Duration>::None)
            .build()?;

        let response = client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .with_context(|| format!("failed to connect to {url}"))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("{url} answered {status}: {}", body.trim());
        }

        let mut reader = BufReader::new(response);
        let mut decoder = SseDecoder::default();
        let mut stdout = io::stdout().lock();
        let mut line = String::new();
        let mut seen = 0;

        loop {
            line.clear();

            if reader
                .read_line(&mut line)
                .context("failed to read from stream")?
                == 0
            {
                break;
            }

            let Some(event) = decoder.feed(&line) else {
                continue;
            };

            if self.json {
                writeln!(stdout, "{}", event.data)?;
            } else {
                let payload = serde_json::from_str::<Payload>(&event.data)
                    .with_context(|| format!("invalid payload in event {:?}", event.id))?;
                write!(stdout, "{}", render(&payload))?;
            }

            stdout.flush()?;

            seen += 1;

            if self.count.is_some_and(|count| seen >= count) {
                break;
            }
        }

        Ok(())
    }

    fn stream_url(&self) -> Result<Url> {
        let mut params = Vec::new();

        if let Some(level) = self.level {
            params.push(("level", level.as_str().to_string()));
        }

        if let Some(logger) = &self.logger {
            params.push(("logger", logger.clone()));
        }

        Url::parse_with_params(
            &format!("{}/logs/stream", self.url.trim_end_matches('/')),
            params,
        )
        .with_context(|| format!("invalid server url `{}`", self.url))
    }
}

pub(crate) fn render(payload: &Payload) -> String {
    let mut rendered = format!(
        "{} {:<5} [{}] {}: {}\n",
        payload.timestamp, payload.level, payload.thread, payload.logger, payload.message
    );

    if let Some(exception) = &payload.exception {
        rendered.push_str(&format!("  {exception}\n"));
    }

    for frame in payload.stack_trace.iter().flatten() {
        rendered.push_str(&format!("    caused by: {frame}\n"));
    }

    rendered
}

#[derive(Debug, PartialEq)]
pub(crate) struct SseEvent {
    pub(crate) event: String,
    pub(crate) id: Option<String>,
    pub(crate) data: String,
}

/// Line-oriented `text/event-stream` parser.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds one line and returns an event once its terminating blank line
    /// arrives.
    pub(crate) fn feed(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.into()),
            "id" => self.id = Some(value.into()),
            "data" => self.data.push(value.into()),
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();

        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".into()),
            id,
            data: mem::take(&mut self.data).join("\n"),
        })
    }
}
