use super::*;

pub mod server;
pub mod tail;

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
    #[command(about = "Serve live logs over SSE and WebSocket")]
    Server(server::Server),
    #[command(about = "Follow the live log stream of a running server")]
    Tail(tail::Tail),
}

impl Subcommand {
    pub(crate) async fn run(
        self,
        options: Options,
        logs: Arc<Logs>,
        cancel_token: CancellationToken,
    ) -> Result {
        match self {
            Self::Server(server) => server.run(options, logs, cancel_token).await,
            Self::Tail(tail) => {
                let mut handle = task::spawn_blocking(move || tail.run());

                tokio::select! {
                    result = &mut handle => result?,
                    _ = cancel_token.cancelled() => Ok(()),
                }
            }
        }
    }
}
