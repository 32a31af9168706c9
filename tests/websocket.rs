use {
    super::*,
    futures::StreamExt,
    tokio_tungstenite::{
        connect_async,
        tungstenite::{Error, Message},
    },
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn payload(message: Message) -> Value {
    match message {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[test]
#[ntest::timeout(30000)]
fn ws_logs_replays_backlog_then_live() {
    let server = TestServer::spawn_with_args("--heartbeat-interval 50");

    runtime().block_on(async {
        let (mut socket, _) = connect_async(server.ws_url("/ws-logs")).await.unwrap();

        let first = payload(socket.next().await.unwrap().unwrap());

        assert!(
            first["message"]
                .as_str()
                .unwrap()
                .starts_with("Live log appender attached"),
            "{first}"
        );

        loop {
            let payload = payload(socket.next().await.unwrap().unwrap());

            if payload["message"].as_str().unwrap().starts_with("heartbeat") {
                break;
            }
        }

        socket.close(None).await.unwrap();
    });

    wait_for("websocket release", || server.status()["subscribers"] == 0);
}

#[test]
fn topic_logs_is_an_alias() {
    let server = TestServer::spawn();

    runtime().block_on(async {
        let (mut socket, _) =
            connect_async(server.ws_url("/topic/logs?logger=livelogs::http_server"))
                .await
                .unwrap();

        let first = payload(socket.next().await.unwrap().unwrap());

        assert_eq!(first["logger"], "livelogs::http_server");
    });
}

#[test]
fn invalid_filter_is_rejected_before_upgrade() {
    let server = TestServer::spawn();

    runtime().block_on(async {
        match connect_async(server.ws_url("/ws-logs?level=loud")).await {
            Err(Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), StatusCode::BAD_REQUEST.as_u16());
            }
            Err(err) => panic!("expected http error, got {err}"),
            Ok(_) => panic!("upgrade unexpectedly succeeded"),
        }
    });

    assert_eq!(server.status()["subscribers"], 0);
}

#[test]
#[ntest::timeout(30000)]
fn connection_timeout_sends_close_frame() {
    let server = TestServer::spawn_with_args("--connection-timeout 300");

    runtime().block_on(async {
        let (mut socket, _) = connect_async(server.ws_url("/ws-logs")).await.unwrap();

        loop {
            match socket.next().await {
                Some(Ok(Message::Close(frame))) => {
                    let frame = frame.unwrap();
                    assert_eq!(frame.reason, "connection timeout elapsed");
                    break;
                }
                Some(Ok(_)) => {}
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    });

    wait_for("timed out websocket release", || {
        server.status()["subscribers"] == 0
    });
}
