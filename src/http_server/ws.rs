use {
    super::*,
    axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    stream::{Subscription, Termination},
};

/// Opens the subscription before upgrading, so a rejected stream answers
/// with a plain HTTP error and nothing is registered.
pub(super) async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> ServerResult<Response> {
    let subscription = Subscription::open(state.live.clone(), query.filter()?)?;

    let write_timeout = state.live.config().write_timeout;

    Ok(ws.on_upgrade(move |socket| serve(socket, subscription, write_timeout)))
}

async fn serve(socket: WebSocket, mut subscription: Subscription, write_timeout: Duration) {
    let (mut sink, mut incoming) = socket.split();

    let termination = loop {
        tokio::select! {
            next = subscription.next() => {
                let frame = match next {
                    Ok(frame) => frame,
                    Err(termination) => break termination,
                };

                match timeout(
                    write_timeout,
                    sink.send(Message::Text(frame.data.as_ref().into())),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break Termination::ClientGone,
                    Err(_) => break Termination::WriteTimedOut,
                }
            }
            message = incoming.next() => match message {
                None | Some(Ok(Message::Close(_))) => break Termination::ClientGone,
                Some(Err(_)) => break Termination::Failed,
                Some(Ok(_)) => {}
            },
        }
    };

    if termination.server_initiated() {
        let close = Message::Close(Some(CloseFrame {
            code: close_code::AWAY,
            reason: termination.to_string().into(),
        }));

        timeout(write_timeout, sink.send(close)).await.ok();
    }

    subscription.finish(termination);
}
