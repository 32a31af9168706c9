use {
    super::*,
    http_server::{AppState, HttpConfig},
};

#[derive(Clone, Debug, Default, Args)]
pub struct ServerOptions {
    #[arg(long, help = "Listen on <ADDRESS>. [default: 127.0.0.1]")]
    pub address: Option<String>,

    #[arg(long, help = "Listen on <PORT>. [default: 8080]")]
    pub port: Option<u16>,

    #[arg(
        long,
        value_name = "MS",
        help = "Log a heartbeat every <MS> milliseconds."
    )]
    pub heartbeat_interval: Option<u64>,

    #[arg(long, help = "Do not capture or serve live logs.")]
    pub disable_live_logs: bool,

    #[arg(long, help = "Keep the last <MAX_LOGS_IN_MEMORY> events. [default: 1000]")]
    pub max_logs_in_memory: Option<usize>,

    #[arg(
        long,
        value_name = "BOOL",
        help = "Replay buffered events to new subscribers. [default: true]"
    )]
    pub send_recent_logs_on_connect: Option<bool>,

    #[arg(
        long,
        value_name = "BOOL",
        help = "Include error summaries in payloads. [default: true]"
    )]
    pub include_exceptions: Option<bool>,

    #[arg(
        long,
        value_name = "BOOL",
        help = "Include error source chains in payloads. [default: true]"
    )]
    pub include_stack_traces: Option<bool>,

    #[arg(long, help = "Name pushed events <EVENT_TAG>. [default: log]")]
    pub event_tag: Option<String>,

    #[arg(
        long,
        help = "Render timestamps with strftime <TIMESTAMP_FORMAT>. [default: %I:%M:%S %p]"
    )]
    pub timestamp_format: Option<String>,

    #[arg(
        long,
        help = "Close streams after <CONNECTION_TIMEOUT> milliseconds, or `unbounded`. \
                [default: unbounded]"
    )]
    pub connection_timeout: Option<String>,

    #[arg(
        long,
        value_name = "MS",
        help = "Drop clients whose socket write takes longer than <MS>. [default: 5000]"
    )]
    pub write_timeout_ms: Option<u64>,

    #[arg(
        long,
        help = "Allow <SUBSCRIBER_QUEUE_CAPACITY> queued events beyond the backlog per client. \
                [default: 256]"
    )]
    pub subscriber_queue_capacity: Option<usize>,

    #[arg(long, help = "Capture events matching <LIVE_LOGS_FILTER>. [default: info]")]
    pub live_logs_filter: Option<String>,
}

#[derive(Clone, Debug, Parser)]
pub struct Server {
    #[command(flatten)]
    pub(crate) options: ServerOptions,
}

impl Server {
    pub async fn run(
        self,
        options: Options,
        logs: Arc<Logs>,
        cancel_token: CancellationToken,
    ) -> Result {
        let settings = Settings::load(&options, &self.options)?;

        logs.set_filter(settings.live_logs_filter())?;

        let live = Arc::new(LiveLogs::new(
            settings.live_logs_config()?,
            Arc::new(logs.source()),
        ));

        live.start();

        let mut tasks = JoinSet::new();

        let router = http_server::router(AppState {
            live: live.clone(),
            logs,
        });

        http_server::spawn(
            &HttpConfig {
                address: settings.address().into(),
                port: settings.port(),
            },
            router,
            cancel_token.clone(),
            &mut tasks,
        )?;

        if let Some(period) = settings.heartbeat_interval() {
            tasks.spawn(heartbeat(period, cancel_token.clone()));
        }

        cancel_token.cancelled().await;

        live.stop();

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                warn!("Server task failed: {err}");
            }
        }

        Ok(())
    }
}

async fn heartbeat(period: Duration, cancel_token: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut beats = 0u64;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                beats += 1;
                info!(beats, "heartbeat");
            }
        }
    }
}
