//! Integration tests for the connection lifecycle over an in-memory transport.
//!
//! Covers the handshake, outbound prompts and permission replies, the
//! receive loop, and close semantics.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use agent_tether::acp::{Connection, ConnectionOptions, ConnectionState};
use agent_tether::transport::ReplayProvider;
use agent_tether::AppError;

use super::test_helpers::{duplex_transport, RecordingHandler};

fn options() -> ConnectionOptions {
    ConnectionOptions {
        cwd: Some(std::path::PathBuf::from("/work/repo")),
        handshake_timeout: Some(Duration::from_secs(5)),
        ..ConnectionOptions::default()
    }
}

// ── Handshake ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_stores_session_id_used_by_prompts() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    agent
        .send(json!({"jsonrpc": "2.0", "id": 0, "result": {"sessionId": "s-1"}}))
        .await;

    let session_id = conn.initialize_session().await.expect("handshake");

    assert_eq!(session_id, "s-1");
    assert_eq!(conn.session_id().as_deref(), Some("s-1"));
    assert_eq!(conn.state(), ConnectionState::Initialized);

    let new_request = agent.recv().await.expect("session/new");
    assert_eq!(new_request["method"], json!("session/new"));
    assert_eq!(new_request["id"], json!(0));
    assert_eq!(new_request["params"]["cwd"], json!("/work/repo"));
    assert_eq!(new_request["params"]["mcpServers"], json!([]));

    conn.send_message("hi").await.expect("prompt");

    let prompt = agent.recv().await.expect("session/prompt");
    assert_eq!(prompt["method"], json!("session/prompt"));
    assert_eq!(prompt["id"], json!(1));
    assert_eq!(prompt["params"]["sessionId"], json!("s-1"));
    assert_eq!(prompt["params"]["prompt"], json!([{"type": "text", "text": "hi"}]));
}

#[tokio::test]
async fn error_reply_leaves_no_session() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    agent
        .send(json!({"id": 0, "error": {"code": -32603, "message": "no auth"}}))
        .await;

    let err = conn.initialize_session().await.expect_err("error reply");

    assert!(err.to_string().contains("missing result"), "{err}");
    assert_eq!(conn.session_id(), None);
    assert_eq!(conn.state(), ConnectionState::Unstarted);

    let send_err = conn.send_message("hi").await.expect_err("no session");
    assert!(matches!(send_err, AppError::Acp(_)), "{send_err}");
}

#[tokio::test]
async fn non_string_session_id_is_rejected() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    agent.send(json!({"id": 0, "result": {"sessionId": 12}})).await;

    let err = conn.initialize_session().await.expect_err("numeric id");

    assert!(err.to_string().contains("must be a string"), "{err}");
    assert_eq!(conn.session_id(), None);
}

#[tokio::test]
async fn second_handshake_is_rejected() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    agent.send(json!({"result": {"sessionId": "s-1"}})).await;
    conn.initialize_session().await.expect("first handshake");

    let err = conn.initialize_session().await.expect_err("second handshake");

    assert!(err.to_string().contains("already initialized"), "{err}");
    assert_eq!(conn.session_id().as_deref(), Some("s-1"));
}

#[tokio::test]
async fn handshake_times_out_without_reply() {
    let (provider, _agent) = duplex_transport();
    let conn = Connection::open_with(
        Box::new(provider),
        ConnectionOptions {
            handshake_timeout: Some(Duration::from_millis(50)),
            ..options()
        },
    )
    .expect("open");

    let err = conn.initialize_session().await.expect_err("timeout");

    assert!(err.to_string().contains("handshake timeout"), "{err}");
    assert_eq!(conn.session_id(), None);
}

#[tokio::test]
async fn handshake_fails_when_agent_hangs_up() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    agent.hang_up();

    let err = conn.initialize_session().await.expect_err("eof");

    assert!(err.to_string().contains("closed the stream"), "{err}");
}

#[tokio::test]
async fn handshake_skips_blank_lines_before_reply() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    agent.send_line("").await;
    agent.send_line("   ").await;
    agent.send(json!({"result": {"sessionId": "s-2"}})).await;

    assert_eq!(conn.initialize_session().await.expect("handshake"), "s-2");
}

#[tokio::test]
async fn close_during_handshake_is_not_undone_by_the_reply() {
    let (provider, mut agent) = duplex_transport();
    let conn = std::sync::Arc::new(
        Connection::open_with(
            Box::new(provider),
            ConnectionOptions {
                handshake_timeout: None,
                ..options()
            },
        )
        .expect("open"),
    );

    let handshake = tokio::spawn({
        let conn = std::sync::Arc::clone(&conn);
        async move { conn.initialize_session().await }
    });

    agent.recv().await.expect("session/new reaches the agent");
    conn.close().await.expect("close");
    agent.send(json!({"result": {"sessionId": "late"}})).await;

    let result = handshake.await.expect("handshake task");

    assert!(result.is_err(), "a late reply must not revive a closed connection");
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.session_id(), None);
}

// ── Replay connections ──────────────────────────────────────────────────────

#[tokio::test]
async fn replay_connection_refuses_handshake_but_accepts_prompts() {
    let conn = Connection::open(Box::new(ReplayProvider::from_recording(""))).expect("open");

    assert!(conn.is_replay());
    let err = conn.initialize_session().await.expect_err("no handshake on replay");
    assert!(matches!(err, AppError::Acp(_)));

    conn.send_message("ignored").await.expect("writes are inert");
    conn.send_tool_response(3_i64.into(), "allow").await.expect("writes are inert");
}

// ── Receive loop ────────────────────────────────────────────────────────────

#[tokio::test]
async fn receive_loop_routes_in_arrival_order() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    let handler = RecordingHandler::answering("allow");
    let (done_tx, mut done_rx) = mpsc::channel(1);

    agent.send(json!({"result": {"sessionId": "s-1"}})).await;
    conn.initialize_session().await.expect("handshake");
    let _ = agent.recv().await;

    agent
        .send(json!({
            "method": "session/update",
            "params": {"sessionId": "s-1", "update": {"sessionUpdate": "agent_message_chunk",
                "content": {"type": "text", "text": "working"}}}
        }))
        .await;
    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": "perm-1",
            "method": "session/request_permission",
            "params": {"sessionId": "s-1", "toolCall": {"toolCallId": "call-1"},
                "options": [{"optionId": "allow", "name": "Allow", "kind": "allow_once"}]}
        }))
        .await;
    agent
        .send(json!({"method": "session/update", "params": {"update": {"sessionUpdate": "plan"}}}))
        .await;
    agent
        .send(json!({"id": 1, "result": {"stopReason": "end_turn"}}))
        .await;
    agent.hang_up();

    conn.stream_responses(&handler, done_tx)
        .await
        .expect("stream ends cleanly at eof");

    assert_eq!(handler.updates(), ["agent_message_chunk", "plan"]);
    assert_eq!(handler.permissions(), ["call-1"]);

    let completion = done_rx.recv().await.expect("completion");
    assert_eq!(completion.stop_reason.as_deref(), Some("end_turn"));
    assert!(done_rx.recv().await.is_none(), "sender dropped after the loop");

    let reply = agent.recv().await.expect("permission reply");
    assert_eq!(
        reply,
        json!({
            "jsonrpc": "2.0",
            "id": "perm-1",
            "result": {"outcome": {"outcome": "selected", "optionId": "allow"}}
        })
    );
    assert_eq!(conn.state(), ConnectionState::Streaming);
}

#[tokio::test]
async fn unknown_methods_do_not_stop_the_loop() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    let handler = RecordingHandler::answering("allow");
    let (done_tx, mut done_rx) = mpsc::channel(1);

    agent.send(json!({"method": "fs/read_text_file", "id": 4, "params": {}})).await;
    agent.send(json!({"id": 1, "result": {}})).await;
    agent.hang_up();

    conn.stream_responses(&handler, done_tx).await.expect("stream");

    assert!(handler.updates().is_empty());
    assert!(done_rx.recv().await.is_some());
}

#[tokio::test]
async fn malformed_line_is_fatal() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    let handler = RecordingHandler::answering("allow");
    let (done_tx, _done_rx) = mpsc::channel(1);

    agent
        .send(json!({"method": "session/update", "params": {"update": {"sessionUpdate": "plan"}}}))
        .await;
    agent.send_line("{not json").await;
    agent
        .send(json!({"method": "session/update", "params": {"update": {"sessionUpdate": "late"}}}))
        .await;

    let err = conn
        .stream_responses(&handler, done_tx)
        .await
        .expect_err("malformed json ends the loop");

    assert!(err.to_string().contains("malformed json"), "{err}");
    assert_eq!(handler.updates(), ["plan"], "nothing after the bad line is routed");
}

#[tokio::test]
async fn non_object_line_is_fatal() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    let handler = RecordingHandler::answering("allow");
    let (done_tx, _done_rx) = mpsc::channel(1);

    agent.send_line("[1,2,3]").await;

    let err = conn
        .stream_responses(&handler, done_tx)
        .await
        .expect_err("arrays are not messages");
    assert!(matches!(err, AppError::Acp(_)));
}

#[tokio::test]
async fn oversized_line_is_fatal() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(
        Box::new(provider),
        ConnectionOptions {
            max_line_bytes: 32,
            ..options()
        },
    )
    .expect("open");
    let handler = RecordingHandler::answering("allow");
    let (done_tx, _done_rx) = mpsc::channel(1);

    agent.send_line(&format!("{{\"pad\":\"{}\"}}", "x".repeat(64))).await;

    let err = conn
        .stream_responses(&handler, done_tx)
        .await
        .expect_err("line over the limit");
    assert!(err.to_string().contains("line too long"), "{err}");
}

#[tokio::test]
async fn inbound_stream_can_only_be_consumed_once() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");
    let handler = RecordingHandler::answering("allow");
    agent.hang_up();

    let (tx, _rx) = mpsc::channel(1);
    conn.stream_responses(&handler, tx).await.expect("first loop");

    let (tx, _rx) = mpsc::channel(1);
    let err = conn
        .stream_responses(&handler, tx)
        .await
        .expect_err("second loop");
    assert!(err.to_string().contains("already consumed"), "{err}");
}

// ── Close ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_is_idempotent_and_closes_transport_once() {
    let (provider, _agent) = duplex_transport();
    let closes = provider.close_counter();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");

    conn.close().await.expect("first close");
    conn.close().await.expect("second close");

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn close_signals_end_of_input_to_the_agent() {
    let (provider, mut agent) = duplex_transport();
    let conn = Connection::open_with(Box::new(provider), options()).expect("open");

    conn.close().await.expect("close");

    assert!(agent.recv().await.is_none(), "agent must see its stdin close");
}

#[tokio::test]
async fn sends_after_close_fail_with_transport_error() {
    let (provider, _agent) = duplex_transport();
    let conn = Connection::open(Box::new(provider)).expect("open");
    conn.close().await.expect("close");

    let err = conn
        .send_tool_response(1_i64.into(), "allow")
        .await
        .expect_err("closed");
    assert!(matches!(err, AppError::Transport(_)), "{err}");

    let err = conn.initialize_session().await.expect_err("closed");
    assert!(err.to_string().contains("closed"), "{err}");
}
