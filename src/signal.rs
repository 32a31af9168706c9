use {super::*, anyhow::Context, tokio::signal::ctrl_c};

async fn shutdown_requested() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

        tokio::select! {
            result = ctrl_c() => {
                result.context("failed to listen for SIGINT")?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await.context("failed to listen for Ctrl-C")?;
        Ok("Ctrl-C")
    }
}

/// Returns a token that is cancelled on the first SIGINT or SIGTERM.
pub(crate) fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            match shutdown_requested().await {
                Ok(signal) => {
                    info!(signal, "Shutdown requested");
                    cancel.cancel();
                }
                Err(err) => warn!("Signal handling unavailable: {err:#}"),
            }
        }
    });

    cancel
}
