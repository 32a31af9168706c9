use {
    super::*,
    axum::response::sse::{Event, KeepAlive, Sse},
    std::convert::Infallible,
    stream::{Subscription, Termination},
    tokio_stream::wrappers::ReceiverStream,
};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub(super) async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ServerResult<Response> {
    let subscription = Subscription::open(state.live.clone(), query.filter()?)?;

    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(pump(subscription, state.live.config().write_timeout, tx));

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE_INTERVAL)
                .text("keep-alive"),
        )
        .into_response())
}

fn event(frame: &Frame) -> Event {
    Event::default()
        .event(&*frame.event)
        .id(frame.seq.to_string())
        .data(&*frame.data)
}

/// Moves frames from the subscription into the response body. The body
/// channel holds a single event, so a send that cannot complete within
/// `write_timeout` means the socket is not draining.
async fn pump(
    mut subscription: Subscription,
    write_timeout: Duration,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let termination = loop {
        let frame = tokio::select! {
            next = subscription.next() => match next {
                Ok(frame) => frame,
                Err(termination) => break termination,
            },
            _ = tx.closed() => break Termination::ClientGone,
        };

        match timeout(write_timeout, tx.send(Ok(event(&frame)))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break Termination::ClientGone,
            Err(_) => break Termination::WriteTimedOut,
        }
    };

    subscription.finish(termination);
}
