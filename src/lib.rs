use {
    anyhow::{Error, anyhow, bail},
    arguments::Arguments,
    axum::{
        Json, Router,
        extract::{Query, State},
        http::{StatusCode, header::CONTENT_TYPE},
        response::{IntoResponse, Response},
        routing::get,
    },
    axum_server::Handle,
    chrono::{DateTime, Local, Utc},
    clap::{Args, Parser},
    futures::{sink::SinkExt, stream::StreamExt},
    live_logs::{
        ConfigError, FilterError, Frame, Level, LiveLogs, LiveLogsConfig, Payload, SendError,
        StreamError, StreamFilter, SubscriberId, TracingSource, Transport,
    },
    logs::Logs,
    options::Options,
    parking_lot::{Mutex, RwLock},
    rust_embed::RustEmbed,
    serde::{Deserialize, Serialize},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    settings::Settings,
    snafu::Snafu,
    std::{
        collections::{BTreeMap, VecDeque},
        env,
        fmt::{self, Display, Formatter},
        fs,
        io::{self, BufRead, BufReader, Write},
        net::{SocketAddr, ToSocketAddrs},
        num::NonZeroUsize,
        path::PathBuf,
        process,
        str::FromStr,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
        thread,
        time::Duration,
    },
    tokio::{
        runtime::Runtime,
        sync::mpsc,
        task::{self, JoinSet},
        time::{Instant, MissedTickBehavior, interval, sleep_until, timeout},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt},
};

mod arguments;
mod http_server;
pub mod live_logs;
pub mod logs;
mod options;
pub mod settings;
mod signal;
pub mod subcommand;

pub const USER_AGENT: &str = "livelogs/0.1.0";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const CONFIG_FILE_NAME: &str = "livelogs.toml";
pub const ENV_PREFIX: &str = "LIVELOGS_";

type Result<T = (), E = Error> = std::result::Result<T, E>;

fn integration_test() -> bool {
    env::var_os("LIVELOGS_INTEGRATION_TEST").is_some()
}

pub fn main() {
    let (logs, guard) = logs::init();

    let args = Arguments::parse();

    let runtime = Runtime::new().expect("Failed to create tokio runtime");

    let code = runtime.block_on(async {
        let cancel_token = signal::setup_signal_handler();

        match args.run(logs, cancel_token).await {
            Err(err) => {
                eprintln!("error: {err}");

                for (i, cause) in err.chain().skip(1).enumerate() {
                    if i == 0 {
                        eprintln!();
                        eprintln!("because:");
                    }
                    eprintln!("- {cause}");
                }

                if env::var_os("RUST_BACKTRACE")
                    .map(|val| val == "1")
                    .unwrap_or_default()
                {
                    eprintln!();
                    eprintln!("{}", err.backtrace());
                }

                1
            }
            Ok(()) => 0,
        }
    });

    runtime.shutdown_background();

    drop(guard);

    process::exit(code);
}
