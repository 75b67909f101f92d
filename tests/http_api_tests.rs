// Integration tests for the HTTP control API
//
// Requests go straight through the router with `tower::ServiceExt::oneshot`;
// sessions use the virtual audio host and the scripted transport.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rhino_voice::transport::{ScriptHandle, ScriptedConnector, ServerMessage};
use rhino_voice::{create_router, AppState, Config, VirtualAudioHost};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(host: VirtualAudioHost) -> (Router, AppState, ScriptHandle) {
    let (connector, script) = ScriptedConnector::new();
    let (router, state) = app_with(host, connector);
    (router, state, script)
}

fn app_with(host: VirtualAudioHost, connector: ScriptedConnector) -> (Router, AppState) {
    let state = AppState::new(Config::default(), Arc::new(host), Arc::new(connector));
    (create_router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))?;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, value))
}

async fn poll_state(app: &Router, session_id: &str, expected: &str) -> Result<()> {
    let uri = format!("/voice/sessions/{}/status", session_id);
    for _ in 0..200 {
        let (_, body) = call(app, "GET", &uri, None).await?;
        if body["state"] == expected {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("session {} never reached {}", session_id, expected)
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let (app, _, _) = app(VirtualAudioHost::new());

    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"OK");
    Ok(())
}

#[tokio::test]
async fn test_session_round_trip() -> Result<()> {
    let (app, _, script) = app(VirtualAudioHost::new());

    let (status, body) = call(&app, "POST", "/voice/sessions", Some(r#"{"session_id":"desk"}"#)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "desk");
    assert_eq!(body["state"], "connecting");

    script.open();
    poll_state(&app, "desk", "active").await?;

    script.message(ServerMessage::input_transcription("what is xrhino"));
    script.message(ServerMessage::output_transcription("a developer platform"));
    let mut lines = Value::Null;
    for _ in 0..200 {
        let (_, body) = call(&app, "GET", "/voice/sessions/desk/transcript", None).await?;
        if body["lines"].as_array().map(|l| l.len()) == Some(2) {
            lines = body["lines"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(lines[0]["label"], "You");
    assert_eq!(lines[0]["text"], "what is xrhino");
    assert_eq!(lines[1]["speaker"], "assistant");

    let (status, body) = call(&app, "POST", "/voice/sessions/desk/mute", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["muted"], true);

    let (status, body) = call(&app, "POST", "/voice/sessions/desk/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["stats"]["transcript_lines"], 2);

    // Stopping twice is not an error
    let (status, body) = call(&app, "POST", "/voice/sessions/desk/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_start_conflicts() -> Result<()> {
    let (app, _, _) = app(VirtualAudioHost::new());

    let (status, _) = call(&app, "POST", "/voice/sessions", Some(r#"{"session_id":"twice"}"#)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", "/voice/sessions", Some(r#"{"session_id":"twice"}"#)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap_or_default().contains("twice"));

    call(&app, "POST", "/voice/sessions/twice/stop", None).await?;
    Ok(())
}

#[tokio::test]
async fn test_start_conflicts_while_connecting() -> Result<()> {
    let (connector, script) = ScriptedConnector::new();
    let (app, state) = app_with(VirtualAudioHost::new(), connector.hold_connect());

    let first = {
        let app = app.clone();
        tokio::spawn(async move {
            call(&app, "POST", "/voice/sessions", Some(r#"{"session_id":"slow"}"#)).await
        })
    };
    poll_state(&app, "slow", "connecting").await?;

    let (status, _) = call(&app, "POST", "/voice/sessions", Some(r#"{"session_id":"slow"}"#)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(script.connect_attempts(), 1);

    // Stop wins over the pending connect
    let (status, body) = call(&app, "POST", "/voice/sessions/slow/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");

    let (status, _) = first.await??;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(state.sessions.read().await.contains_key("slow"));
    Ok(())
}

#[tokio::test]
async fn test_failed_start_keeps_replacement_session() -> Result<()> {
    let (connector, script) = ScriptedConnector::new();
    let connector = connector.hold_connect().fail_connect("refused");
    let (app, state) = app_with(VirtualAudioHost::new(), connector);

    let first = {
        let app = app.clone();
        tokio::spawn(async move {
            call(&app, "POST", "/voice/sessions", Some(r#"{"session_id":"swap"}"#)).await
        })
    };
    poll_state(&app, "swap", "connecting").await?;

    let replacement = Arc::new(state.new_session("swap".to_string()));
    state
        .sessions
        .write()
        .await
        .insert("swap".to_string(), Arc::clone(&replacement));

    script.release_connect();
    let (status, _) = first.await??;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let sessions = state.sessions.read().await;
    let current = sessions.get("swap").expect("replacement should stay listed");
    assert!(Arc::ptr_eq(current, &replacement));
    Ok(())
}

#[tokio::test]
async fn test_permission_denied_is_forbidden() -> Result<()> {
    let (app, state, _) = app(VirtualAudioHost::new().deny_microphone());

    let (status, body) = call(&app, "POST", "/voice/sessions", Some(r#"{"session_id":"nomic"}"#)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap_or_default().contains("permission"));

    assert!(state.sessions.read().await.is_empty());
    let (status, _) = call(&app, "GET", "/voice/sessions/nomic/status", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_generated_session_id_and_muted_start() -> Result<()> {
    let (app, _, _) = app(VirtualAudioHost::new());

    let (status, body) = call(&app, "POST", "/voice/sessions", Some(r#"{"muted":true}"#)).await?;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].as_str().unwrap_or_default().to_string();
    assert!(session_id.starts_with("voice-"));

    let (_, body) = call(&app, "GET", &format!("/voice/sessions/{}/status", session_id), None).await?;
    assert_eq!(body["muted"], true);

    call(&app, "POST", &format!("/voice/sessions/{}/stop", session_id), None).await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_not_found() -> Result<()> {
    let (app, _, _) = app(VirtualAudioHost::new());

    for (method, uri) in [
        ("POST", "/voice/sessions/ghost/stop"),
        ("POST", "/voice/sessions/ghost/mute"),
        ("GET", "/voice/sessions/ghost/status"),
        ("GET", "/voice/sessions/ghost/transcript"),
    ] {
        let (status, body) = call(&app, method, uri, None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
        assert_eq!(body["error"], "Session ghost not found");
    }
    Ok(())
}
