use super::*;

#[test]
fn stream_replays_backlog_as_named_events() {
    let server = TestServer::spawn();

    let mut stream = server.sse("/logs/stream");

    let first = stream.next_event().unwrap();

    assert_eq!(first.event, "log");
    assert_eq!(first.data["level"], "INFO");
    assert_eq!(first.data["logger"], "livelogs::live_logs");
    assert!(
        first.message().starts_with("Live log appender attached"),
        "{first:?}"
    );

    let second = stream.next_event().unwrap();

    assert!(second.message().starts_with("HTTP server listening"));
    assert!(second.id > first.id);
}

#[test]
#[ntest::timeout(30000)]
fn stream_continues_with_live_events_in_order() {
    let server = TestServer::spawn_with_args("--heartbeat-interval 50");

    let mut stream = server.sse("/logs/stream");

    let mut beats = Vec::new();
    let mut last_id = 0;

    while beats.len() < 3 {
        let event = stream.next_event().unwrap();
        let id = event.id.unwrap();

        assert!(id > last_id, "{id} after {last_id}");
        last_id = id;

        if event.message().starts_with("heartbeat") {
            beats.push(event.message().to_string());
        }
    }

    let counters = beats
        .iter()
        .map(|beat| {
            beat.strip_prefix("heartbeat beats=")
                .unwrap()
                .parse::<u64>()
                .unwrap()
        })
        .collect::<Vec<_>>();

    assert!(counters.windows(2).all(|pair| pair[1] == pair[0] + 1), "{counters:?}");
}

#[test]
fn replay_can_be_disabled() {
    let server = TestServer::spawn_with_args(
        "--heartbeat-interval 50 --send-recent-logs-on-connect false",
    );

    let mut stream = server.sse("/logs/stream");

    let first = stream.next_event().unwrap();

    assert!(first.message().starts_with("heartbeat"), "{first:?}");
}

#[test]
fn event_tag_and_timestamp_format_are_configurable() {
    let server = TestServer::spawn_with_args("--event-tag app-log --timestamp-format %H:%M:%S");

    let mut stream = server.sse("/logs/stream");

    let event = stream.next_event().unwrap();

    assert_eq!(event.event, "app-log");
    assert!(
        Regex::new(r"^\d{2}:\d{2}:\d{2}$")
            .unwrap()
            .is_match(event.data["timestamp"].as_str().unwrap()),
        "{event:?}"
    );
}

#[test]
fn default_timestamp_is_twelve_hour_clock() {
    let server = TestServer::spawn();

    let event = server.sse("/logs/stream").next_event().unwrap();

    assert!(
        Regex::new(r"^\d{2}:\d{2}:\d{2} (AM|PM)$")
            .unwrap()
            .is_match(event.data["timestamp"].as_str().unwrap()),
        "{event:?}"
    );
}

#[test]
fn stream_filters_by_logger() {
    let server = TestServer::spawn();

    let mut stream = server.sse("/logs/stream?logger=livelogs::http_server");

    let event = stream.next_event().unwrap();

    assert_eq!(event.data["logger"], "livelogs::http_server");
    assert!(event.message().starts_with("HTTP server listening"));
}

#[test]
fn stream_rejects_unknown_level() {
    let server = TestServer::spawn();

    assert_eq!(
        server.get("/logs/stream?level=loud").status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(server.status()["subscribers"], 0);
}

#[test]
fn subscribers_are_tracked_and_released() {
    let server = TestServer::spawn_with_args("--heartbeat-interval 50");

    let mut first = server.sse("/logs/stream");
    let mut second = server.sse("/logs/stream");

    first.next_event().unwrap();
    second.next_event().unwrap();

    assert_eq!(server.status()["subscribers"], 2);

    drop(first);

    wait_for("subscriber release", || server.status()["subscribers"] == 1);

    second.next_matching(|event| event.message().starts_with("heartbeat"));
}

#[test]
#[ntest::timeout(30000)]
fn connection_timeout_ends_stream() {
    let server = TestServer::spawn_with_args("--connection-timeout 300");

    let mut stream = server.sse("/logs/stream");

    let started = Instant::now();

    while stream.next_event().is_some() {}

    assert!(started.elapsed() < Duration::from_secs(5));

    wait_for("timed out subscriber release", || {
        server.status()["subscribers"] == 0
    });
}
