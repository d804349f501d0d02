//! Slack Events Webhook 路由测试
#![cfg(feature = "slack")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use bee_relay::history::InMemoryHistory;
use bee_relay::integrations::slack::{create_router, SlackState};
use bee_relay::llm::MockLlmClient;
use bee_relay::stream::{ChannelError, StreamChannel, StreamHandle, StreamTarget};
use bee_relay::Pipeline;

#[derive(Default)]
struct CountingChannel {
    opened: AtomicUsize,
}

struct NoopHandle;

#[async_trait]
impl StreamChannel for CountingChannel {
    async fn open(&self, _target: &StreamTarget) -> Result<Box<dyn StreamHandle>, ChannelError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NoopHandle))
    }

    async fn post_message(&self, _target: &StreamTarget, _text: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[async_trait]
impl StreamHandle for NoopHandle {
    async fn append(&self, _text: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

fn state(channel: Arc<CountingChannel>, token: Option<&str>) -> Arc<SlackState> {
    let pipeline = Pipeline::new(
        Arc::new(InMemoryHistory::default()),
        channel,
        Arc::new(MockLlmClient::new()),
    );
    Arc::new(SlackState::new(
        Arc::new(pipeline),
        token.map(String::from),
        100,
    ))
}

async fn post(state: Arc<SlackState>, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/slack/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = create_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn mention(event_id: &str) -> Value {
    json!({
        "type": "event_callback",
        "token": "tok",
        "team_id": "T1",
        "event_id": event_id,
        "event": {
            "type": "app_mention",
            "user": "U1",
            "text": "<@UBOT> hello",
            "ts": "10.0",
            "channel": "C1"
        }
    })
}

#[tokio::test]
async fn test_url_verification_echoes_challenge() {
    let channel = Arc::new(CountingChannel::default());
    let (status, body) = post(
        state(channel, Some("tok")),
        json!({"type": "url_verification", "token": "tok", "challenge": "abc123"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["challenge"], "abc123");
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let channel = Arc::new(CountingChannel::default());
    let (status, _) = post(
        state(channel.clone(), Some("expected")),
        mention("Ev1"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(channel.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_events_run_once() {
    let channel = Arc::new(CountingChannel::default());
    let state = state(channel.clone(), Some("tok"));

    let (status, _) = post(state.clone(), mention("Ev42")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(state.clone(), mention("Ev42")).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..100 {
        if channel.opened.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(channel.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_health() {
    let channel = Arc::new(CountingChannel::default());
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = create_router(state(channel, None)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
