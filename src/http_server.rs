use {
    super::*,
    anyhow::Context,
    axum::extract::Path,
    error::{OptionExt, ServerError, ServerResult},
    stream::StreamQuery,
    tower_http::cors::{Any, CorsLayer},
};

mod error;
mod sse;
mod stream;
mod ws;

const DEFAULT_RECENT_LIMIT: usize = 100;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) live: Arc<LiveLogs>,
    pub(crate) logs: Arc<Logs>,
}

/// Binds the listener and spawns the server onto `tasks`. Returns the bound
/// address.
pub fn spawn(
    config: &HttpConfig,
    router: Router,
    cancel_token: CancellationToken,
    tasks: &mut JoinSet<()>,
) -> Result<SocketAddr> {
    let listener = bind_listener(config)?;
    let address = listener.local_addr()?;

    let handle = Handle::new();

    tasks.spawn({
        let handle = handle.clone();
        async move {
            cancel_token.cancelled().await;
            info!("Shutting down http server");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });

    tasks.spawn(async move {
        let result = match axum_server::from_tcp(listener) {
            Ok(server) => {
                server
                    .handle(handle)
                    .serve(router.into_make_service())
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    });

    Ok(address)
}

fn bind_listener(config: &HttpConfig) -> Result<std::net::TcpListener> {
    let addr = (config.address.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            anyhow!(
                "failed to resolve address {}:{}",
                config.address,
                config.port
            )
        })?;

    let listener = std::net::TcpListener::bind(addr)
        .with_context(|| format!("failed to bind HTTP server to {addr}"))?;

    listener.set_nonblocking(true)?;

    info!("HTTP server listening on http://{}", listener.local_addr()?);

    Ok(listener)
}

/// Status and filter routes are always mounted; everything that reads or
/// streams live logs only when they are enabled.
pub(crate) fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/logs/status", get(status))
        .route("/logs/level", get(level).put(set_level));

    if state.live.config().enabled {
        router = router
            .route("/", get(viewer))
            .route("/logs/live-sse", get(viewer))
            .route("/static/{*path}", get(static_assets))
            .route("/logs/stream", get(sse::stream))
            .route("/ws-logs", get(ws::upgrade))
            .route("/topic/logs", get(ws::upgrade))
            .route("/logs/recent", get(recent));
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(RustEmbed)]
#[folder = "static"]
struct StaticAssets;

fn asset(path: &str) -> ServerResult<Response> {
    let content = StaticAssets::get(path.strip_prefix('/').unwrap_or(path))
        .ok_or_not_found(|| format!("asset {path}"))?;

    let mime = mime_guess::from_path(path).first_or_octet_stream();

    Ok(([(CONTENT_TYPE, mime.to_string())], content.data).into_response())
}

async fn viewer() -> ServerResult<Response> {
    asset("live-logs.html")
}

async fn static_assets(Path(path): Path<String>) -> ServerResult<Response> {
    asset(&path)
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: live_logs::Status,
    filter: String,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.live.status(),
        filter: state.logs.filter(),
    })
}

async fn level(State(state): State<AppState>) -> String {
    state.logs.filter()
}

async fn set_level(State(state): State<AppState>, body: String) -> ServerResult<String> {
    state
        .logs
        .set_filter(&body)
        .map_err(|err| ServerError::BadRequest(format!("{err:#}")))?;

    let filter = state.logs.filter();

    info!(%filter, "Live log filter changed");

    Ok(filter)
}

#[derive(Debug, Default, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
    level: Option<String>,
    logger: Option<String>,
}

async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ServerResult<Json<Vec<Payload>>> {
    let filter = StreamQuery {
        level: query.level,
        logger: query.logger,
    }
    .filter()?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(state.live.config().max_logs_in_memory.get());

    Ok(Json(state.live.recent(&filter, limit)))
}
