//! Session client behaviour against an in-memory connector.

mod support;

use cabin_live::events::EventSubscription;
use cabin_live::gemini::MediaChunk;
use cabin_live::{
    FunctionResponse, LogCategory, Part, ReconnectPolicy, SessionClient, SessionConfig, SessionEvent,
    SessionStatus, ToolResponse,
};
use serde_json::json;
use std::time::Duration;
use support::{MockConnector, accept};

async fn next_event(events: &mut EventSubscription) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("bus dropped")
}

/// Skip status changes and return the next other event.
async fn next_non_status(events: &mut EventSubscription) -> SessionEvent {
    loop {
        match next_event(events).await {
            SessionEvent::StatusChanged(_) => continue,
            other => return other,
        }
    }
}

/// Wait for the first event matching `pred`, skipping the rest.
async fn wait_for(events: &mut EventSubscription, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

fn drain(events: &mut EventSubscription) -> Vec<SessionEvent> {
    std::iter::from_fn(|| events.try_recv()).collect()
}

fn fast_policy(initial_delay_ms: u64) -> ReconnectPolicy {
    ReconnectPolicy { initial_delay_ms, multiplier: 1.0, max_delay_ms: initial_delay_ms, max_attempts: 3 }
}

#[tokio::test]
async fn test_connect_writes_setup_first() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    let mut events = client.subscribe_channel();

    let config = SessionConfig::default().with_instruction("You are a co-pilot.").with_voice("Puck");
    assert!(client.connect(config).await);
    assert_eq!(client.status(), SessionStatus::Connected);
    assert!(client.session_id().is_some());

    let mut server = accept(&mut servers).await;
    let setup = server.recv().await;
    assert!(setup["setup"]["model"].as_str().unwrap().starts_with("models/"));
    assert_eq!(setup["setup"]["systemInstruction"]["parts"][0]["text"], "You are a co-pilot.");

    assert!(matches!(next_event(&mut events).await, SessionEvent::StatusChanged(SessionStatus::Connecting)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::StatusChanged(SessionStatus::Connected)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Open));
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let (connector, mut servers) = MockConnector::with_delay(Duration::from_millis(50));
    let client = SessionClient::new(connector.clone());

    let (first, second) =
        tokio::join!(client.connect(SessionConfig::default()), client.connect(SessionConfig::default()));
    assert!(first ^ second);
    assert_eq!(connector.opens(), 1);
    let _server = accept(&mut servers).await;

    assert!(!client.connect(SessionConfig::default()).await);
    assert_eq!(connector.opens(), 1);
}

#[tokio::test]
async fn test_connect_failure_reports_error() {
    let (connector, _servers) = MockConnector::new();
    connector.refuse(true);
    let client = SessionClient::new(connector);
    let mut events = client.subscribe_channel();

    assert!(!client.connect(SessionConfig::default()).await);
    assert_eq!(client.status(), SessionStatus::Disconnected);

    let SessionEvent::Error(message) = next_non_status(&mut events).await else {
        panic!("expected error event");
    };
    assert!(message.contains("connection refused"));
    assert!(!client.log().entries_for(LogCategory::Diagnostic).is_empty());
}

#[tokio::test]
async fn test_invalid_config_never_opens() {
    let (connector, _servers) = MockConnector::new();
    let client = SessionClient::new(connector.clone());

    assert!(!client.connect(SessionConfig::default().with_model("")).await);
    assert_eq!(connector.opens(), 0);
    assert_eq!(client.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_sends_while_disconnected_return_false() {
    let (connector, _servers) = MockConnector::new();
    let client = SessionClient::new(connector);

    assert!(!client.send(vec![Part::text("hello")], true).await);
    assert!(!client.send_realtime_text("hello").await);
    assert!(
        !client
            .send_realtime_input(vec![MediaChunk {
                mime_type: "audio/pcm;rate=16000".into(),
                data: "AAA=".into()
            }])
            .await
    );
    assert!(client.log().entries_for(LogCategory::ClientSend).is_empty());
}

#[tokio::test]
async fn test_outbound_frame_shapes() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let mut server = accept(&mut servers).await;
    server.recv().await;

    assert!(client.send_realtime_text("turn left").await);
    assert_eq!(server.recv().await, json!({ "realtimeInput": { "text": "turn left" } }));

    assert!(client.send(vec![Part::text("hi")], true).await);
    let content = server.recv().await;
    assert_eq!(content["clientContent"]["turns"][0]["role"], "user");
    assert_eq!(content["clientContent"]["turns"][0]["parts"][0]["text"], "hi");
    assert_eq!(content["clientContent"]["turnComplete"], true);

    assert!(!client.send_tool_response(ToolResponse::new(vec![])).await);
    let response = ToolResponse::new(vec![FunctionResponse::new("c1", "find_stations", json!({ "result": "2" }))]);
    assert!(client.send_tool_response(response).await);
    let frame = server.recv().await;
    assert_eq!(
        frame["toolResponse"]["functionResponses"][0],
        json!({ "id": "c1", "name": "find_stations", "response": { "result": "2" } })
    );
}

#[tokio::test]
async fn test_realtime_input_sends_one_frame_per_chunk() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let mut server = accept(&mut servers).await;
    server.recv().await;

    let chunk = |data: &str| MediaChunk { mime_type: "audio/pcm;rate=16000".into(), data: data.into() };
    assert!(client.send_realtime_input(vec![chunk("AAA="), chunk("AQE=")]).await);

    let first = server.recv().await;
    let second = server.recv().await;
    assert_eq!(first["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");
    assert_eq!(second["realtimeInput"]["mediaChunks"][0]["data"], "AQE=");

    let logged = client.log().entries_for(LogCategory::ClientSend);
    let last = &logged.last().unwrap().payload;
    assert_ne!(last["realtimeInput"]["mediaChunks"][0]["data"], "AQE=");
}

#[tokio::test]
async fn test_inbound_events_in_arrival_order() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let server = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    server.push(json!({ "setupComplete": {} }));
    server.push(json!({ "serverContent": { "inputTranscription": { "text": "Hel", "isFinal": false } } }));
    server.push(json!({ "serverContent": { "outputTranscription": { "text": "Hi", "finished": true } } }));
    server.push(json!({ "toolCall": { "functionCalls": [{ "id": "c1", "name": "find_stations", "args": { "radius": 5 } }] } }));
    server.push(json!({ "serverContent": { "turnComplete": true } }));

    assert!(matches!(next_event(&mut events).await, SessionEvent::SetupComplete));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::InputTranscription { ref text, is_final: false } if text == "Hel"
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::OutputTranscription { ref text, is_final: true } if text == "Hi"
    ));
    let SessionEvent::ToolCall(calls) = next_event(&mut events).await else {
        panic!("expected tool call");
    };
    assert_eq!(calls[0].name, "find_stations");
    assert_eq!(calls[0].args["radius"], 5);
    assert!(matches!(next_event(&mut events).await, SessionEvent::TurnComplete));
}

#[tokio::test]
async fn test_non_json_frame_is_skipped() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let server = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    server.push_raw("not json at all");
    server.push(json!({ "serverContent": { "turnComplete": true } }));

    assert!(matches!(next_event(&mut events).await, SessionEvent::TurnComplete));
    assert_eq!(client.status(), SessionStatus::Connected);
    assert!(!client.log().entries_for(LogCategory::Diagnostic).is_empty());
}

#[tokio::test]
async fn test_remote_close_disconnects() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let server = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    server.close(1011, "internal error");

    let SessionEvent::Close { code, reason } = next_non_status(&mut events).await else {
        panic!("expected close");
    };
    assert_eq!(code, 1011);
    assert_eq!(reason, "internal error");
    assert_eq!(client.status(), SessionStatus::Disconnected);
    assert!(!client.send_realtime_text("anyone?").await);
}

#[tokio::test]
async fn test_dropped_transport_closes_abnormally() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let server = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    drop(server);

    let SessionEvent::Close { code, .. } = next_non_status(&mut events).await else {
        panic!("expected close");
    };
    assert_eq!(code, 1006);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let _server = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    client.disconnect().await;
    client.disconnect().await;

    let SessionEvent::Close { code, .. } = next_non_status(&mut events).await else {
        panic!("expected close");
    };
    assert_eq!(code, 1000);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(events.try_recv().is_none());
    assert_eq!(client.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector.clone());

    assert!(client.connect(SessionConfig::default()).await);
    let _first = accept(&mut servers).await;
    client.disconnect().await;

    assert!(client.connect(SessionConfig::default()).await);
    let mut second = accept(&mut servers).await;
    assert!(second.recv().await.get("setup").is_some());
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn test_rejected_connect_has_no_side_effects() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::new(connector.clone());
    assert!(client.connect(SessionConfig::default()).await);
    let _server = accept(&mut servers).await;
    let diagnostics = client.log().entries_for(LogCategory::Diagnostic).len();
    let mut events = client.subscribe_channel();

    assert!(!client.connect(SessionConfig::default().with_model("")).await);
    assert!(!client.connect(SessionConfig::default()).await);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(client.log().entries_for(LogCategory::Diagnostic).len(), diagnostics);
    assert_eq!(client.status(), SessionStatus::Connected);
    assert_eq!(connector.opens(), 1);
}

#[tokio::test]
async fn test_connect_during_slow_close_keeps_one_status() {
    let (connector, mut servers) = MockConnector::with_close_delay(Duration::from_millis(100));
    let client = SessionClient::new(connector);
    assert!(client.connect(SessionConfig::default()).await);
    let _first = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    let closing = tokio::spawn({
        let client = client.clone();
        async move { client.disconnect().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(client.connect(SessionConfig::default()).await);
    let _second = accept(&mut servers).await;
    closing.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(client.status(), SessionStatus::Connected);
    assert_eq!(*client.watch_status().borrow(), SessionStatus::Connected);

    let seen = drain(&mut events);
    let open_at = seen.iter().rposition(|e| matches!(e, SessionEvent::Open)).expect("second open");
    let close_at = seen.iter().position(|e| matches!(e, SessionEvent::Close { .. })).expect("close");
    assert!(close_at < open_at);
    assert!(seen[open_at + 1..].is_empty());
    assert!(client.send_realtime_text("still here").await);
}

#[tokio::test]
async fn test_reconnects_after_remote_close() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::builder(connector.clone()).reconnect(Some(fast_policy(10))).build();
    assert!(client.connect(SessionConfig::default()).await);
    let first = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    connector.refuse(true);
    first.close(1011, "internal error");

    let SessionEvent::Close { code, .. } = wait_for(&mut events, |e| matches!(e, SessionEvent::Close { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(code, 1011);
    let SessionEvent::Error(message) = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await else {
        unreachable!()
    };
    assert!(message.contains("connection refused"));
    connector.refuse(false);

    let mut second = accept(&mut servers).await;
    assert!(second.recv().await.get("setup").is_some());
    wait_for(&mut events, |e| matches!(e, SessionEvent::Open)).await;
    assert_eq!(client.status(), SessionStatus::Connected);
    assert_eq!(connector.opens(), 3);
}

#[tokio::test]
async fn test_disconnect_during_backoff_stops_reconnecting() {
    let (connector, mut servers) = MockConnector::new();
    let client = SessionClient::builder(connector.clone()).reconnect(Some(fast_policy(100))).build();
    assert!(client.connect(SessionConfig::default()).await);
    let first = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    first.close(1011, "internal error");
    wait_for(&mut events, |e| matches!(e, SessionEvent::Close { .. })).await;
    client.disconnect().await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(connector.opens(), 1);
    assert!(servers.try_recv().is_err());
    assert_eq!(client.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_disconnect_during_reconnect_attempt_leaves_client_usable() {
    let (connector, mut servers) = MockConnector::with_delay(Duration::from_millis(50));
    let client = SessionClient::builder(connector.clone()).reconnect(Some(fast_policy(10))).build();
    assert!(client.connect(SessionConfig::default()).await);
    let first = accept(&mut servers).await;
    let mut events = client.subscribe_channel();

    first.close(1011, "internal error");
    wait_for(&mut events, |e| matches!(e, SessionEvent::StatusChanged(SessionStatus::Connecting))).await;
    client.disconnect().await;
    assert_eq!(client.status(), SessionStatus::Disconnected);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.status(), SessionStatus::Disconnected);
    assert_eq!(connector.opens(), 2);

    assert!(client.connect(SessionConfig::default()).await);
    assert_eq!(client.status(), SessionStatus::Connected);
}
