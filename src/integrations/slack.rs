//! Slack 集成
//!
//! - Web API 客户端：conversations.replies 作为历史来源，chat.startStream / appendStream / stopStream
//!   作为流式通道，users.info 作为显示名解析；
//! - Events API Webhook：接收 app_mention，去重后立即返回 200，流水线在后台执行。
//!
//! 重要：Slack 要求事件回调在 **3 秒内** 返回，否则判失败并重试（重试带相同 event_id）。

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::history::{HistoryPage, HistorySource, NameResolver, ThreadMessage, ThreadRef};
use crate::pipeline::{InboundRequest, Pipeline};
use crate::stream::{ChannelError, StreamChannel, StreamHandle, StreamTarget};

/// conversations.replies 单次最多返回条数
pub const SLACK_MAX_PAGE_SIZE: usize = 1000;

/// Slack Web API 客户端
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl SlackClient {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// POST JSON 方法（chat.*）
    async fn post(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .http
            .post(self.url(method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("{method}: {e}")))?;
        read_response(method, resp).await
    }

    /// GET 查询方法（conversations.replies、users.info）
    async fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value, ChannelError> {
        let resp = self
            .http
            .get(self.url(method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("{method}: {e}")))?;
        read_response(method, resp).await
    }
}

async fn read_response(method: &str, resp: reqwest::Response) -> Result<Value, ChannelError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ChannelError::RateLimited {
            retry_after: retry_after(resp.headers()),
        });
    }
    if !status.is_success() {
        return Err(ChannelError::Platform(format!("{method}: HTTP {status}")));
    }
    let body: Value = resp
        .json()
        .await
        .map_err(|e| ChannelError::Connection(format!("{method}: invalid response body: {e}")))?;
    check_ok(method, body)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Slack 以 HTTP 200 + `ok: false` 报告业务错误
fn check_ok(method: &str, body: Value) -> Result<Value, ChannelError> {
    if body["ok"].as_bool() == Some(true) {
        return Ok(body);
    }
    let error = body["error"].as_str().unwrap_or("unknown_error");
    if error == "ratelimited" || error == "rate_limited" {
        return Err(ChannelError::RateLimited { retry_after: None });
    }
    Err(ChannelError::Platform(format!("{method}: {error}")))
}

/// conversations.replies 中的单条消息
fn parse_message(value: &Value) -> Option<ThreadMessage> {
    let ts = value["ts"].as_str()?;
    let text = value["text"].as_str().unwrap_or_default();
    let bot_id = value["bot_id"].as_str();
    let author = value["user"].as_str().or(bot_id).unwrap_or("unknown");
    let automated = bot_id.is_some() || value["subtype"].as_str() == Some("bot_message");
    Some(ThreadMessage {
        author_id: author.to_string(),
        text: text.to_string(),
        ts: ts.to_string(),
        is_automated: automated,
    })
}

fn parse_replies(body: &Value) -> HistoryPage {
    let messages = body["messages"]
        .as_array()
        .map(|msgs| msgs.iter().filter_map(parse_message).collect())
        .unwrap_or_default();
    let next_cursor = body["response_metadata"]["next_cursor"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(String::from);
    HistoryPage {
        messages,
        next_cursor,
    }
}

#[async_trait]
impl HistorySource for SlackClient {
    fn max_page_size(&self) -> usize {
        SLACK_MAX_PAGE_SIZE
    }

    async fn fetch_page(
        &self,
        thread: &ThreadRef,
        limit: usize,
        cursor: Option<&str>,
    ) -> anyhow::Result<HistoryPage> {
        let limit = limit.to_string();
        let mut query = vec![
            ("channel", thread.channel_id.as_str()),
            ("ts", thread.thread_ts.as_str()),
            ("limit", limit.as_str()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let body = self.get("conversations.replies", &query).await?;
        Ok(parse_replies(&body))
    }
}

#[async_trait]
impl NameResolver for SlackClient {
    async fn display_name(&self, user_id: &str) -> anyhow::Result<String> {
        let body = self.get("users.info", &[("user", user_id)]).await?;
        let user = &body["user"];
        let name = [
            user["profile"]["display_name"].as_str(),
            user["real_name"].as_str(),
            user["name"].as_str(),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("users.info returned no name for {user_id}"));
        name
    }
}

/// chat.startStream 打开的流式消息
struct SlackStream {
    client: SlackClient,
    channel: String,
    ts: String,
}

#[async_trait]
impl StreamChannel for SlackClient {
    async fn open(&self, target: &StreamTarget) -> Result<Box<dyn StreamHandle>, ChannelError> {
        let mut body = json!({
            "channel": target.channel_id,
            "thread_ts": target.thread_ts,
            "recipient_user_id": target.recipient_user_id,
        });
        if let Some(team) = &target.recipient_team_id {
            body["recipient_team_id"] = json!(team);
        }
        let resp = self.post("chat.startStream", &body).await?;
        let ts = resp["ts"]
            .as_str()
            .ok_or_else(|| ChannelError::Platform("chat.startStream: missing ts".into()))?;
        Ok(Box::new(SlackStream {
            client: self.clone(),
            channel: target.channel_id.clone(),
            ts: ts.to_string(),
        }))
    }

    async fn post_message(&self, target: &StreamTarget, text: &str) -> Result<(), ChannelError> {
        let body = json!({
            "channel": target.channel_id,
            "thread_ts": target.thread_ts,
            "text": text,
        });
        self.post("chat.postMessage", &body).await.map(|_| ())
    }
}

#[async_trait]
impl StreamHandle for SlackStream {
    async fn append(&self, text: &str) -> Result<(), ChannelError> {
        let body = json!({
            "channel": self.channel,
            "ts": self.ts,
            "markdown_text": text,
        });
        self.client.post("chat.appendStream", &body).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let body = json!({ "channel": self.channel, "ts": self.ts });
        self.client.post("chat.stopStream", &body).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Events API Webhook
// ---------------------------------------------------------------------------

/// 有界的 event_id 去重表：满时淘汰最早记录的 ID
#[derive(Debug)]
pub struct EventDedupe {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl EventDedupe {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 首次出现返回 true 并记录
    pub fn first_seen(&mut self, event_id: &str) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(event_id.to_string());
        self.order.push_back(event_id.to_string());
        true
    }
}

/// Webhook 服务状态
pub struct SlackState {
    pub pipeline: Arc<Pipeline>,
    pub processed_events: Mutex<EventDedupe>,
    pub verification_token: Option<String>,
}

impl SlackState {
    pub fn new(pipeline: Arc<Pipeline>, verification_token: Option<String>, dedupe_capacity: usize) -> Self {
        Self {
            pipeline,
            processed_events: Mutex::new(EventDedupe::new(dedupe_capacity)),
            verification_token,
        }
    }
}

/// 事件回调顶层（url_verification 与 event_callback 共用）
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub type_: String,
    pub token: Option<String>,
    pub challenge: Option<String>,
    pub team_id: Option<String>,
    pub event_id: Option<String>,
    pub event: Option<SlackEvent>,
}

/// event_callback 内的事件
#[derive(Debug, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub type_: String,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    pub text: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub channel: Option<String>,
    pub team: Option<String>,
}

/// 创建 Slack 路由
pub fn create_router(state: Arc<SlackState>) -> Router {
    Router::new()
        .route("/slack/events", post(events_handler))
        .route("/health", axum::routing::get(|| async { "OK" }))
        .with_state(state)
}

static MENTION_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 去掉 Slack 提及标记，如 <@U012AB3CD> 或 <@U012AB3CD|name>
pub fn strip_mentions(s: &str) -> String {
    let re = MENTION_RE.get_or_init(|| Regex::new(r"<@[A-Z0-9]+(\|[^>]*)?>\s*").ok());
    match re {
        Some(re) => re.replace_all(s, "").trim().to_string(),
        None => s.trim().to_string(),
    }
}

/// 从 app_mention 事件构造请求；机器人自己发的或字段缺失时返回 None
pub fn mention_request(envelope: &EventEnvelope) -> Option<InboundRequest> {
    let event = envelope.event.as_ref()?;
    if event.type_ != "app_mention" || event.bot_id.is_some() {
        return None;
    }
    let channel = event.channel.as_deref()?;
    let user = event.user.as_deref()?;
    let ts = event.ts.as_deref()?;
    let thread_ts = event.thread_ts.as_deref().unwrap_or(ts);

    let mut text = strip_mentions(event.text.as_deref().unwrap_or_default());
    if text.is_empty() {
        text = "hi".to_string();
    }

    let mut target = StreamTarget::new(channel, thread_ts, user);
    if let Some(team) = event.team.as_deref().or(envelope.team_id.as_deref()) {
        target = target.with_team(team);
    }
    let mut request = InboundRequest::new(target, text);
    if let Some(event_id) = &envelope.event_id {
        request = request.with_correlation_id(event_id.clone());
    }
    Some(request)
}

/// POST /slack/events - URL 校验 + 事件回调
async fn events_handler(
    State(state): State<Arc<SlackState>>,
    Json(envelope): Json<EventEnvelope>,
) -> Result<Json<Value>, StatusCode> {
    if let Some(expected) = &state.verification_token {
        if envelope.token.as_deref() != Some(expected.as_str()) {
            tracing::warn!("Slack webhook: verification token mismatch, rejecting");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    match envelope.type_.as_str() {
        "url_verification" => {
            let Some(challenge) = envelope.challenge else {
                return Err(StatusCode::BAD_REQUEST);
            };
            Ok(Json(json!({ "challenge": challenge })))
        }
        "event_callback" => {
            if let Some(event_id) = envelope.event_id.as_deref() {
                let mut processed = state.processed_events.lock().await;
                if !processed.first_seen(event_id) {
                    tracing::debug!(event_id, "Duplicate Slack event ignored");
                    return Ok(Json(json!({})));
                }
            }

            let Some(request) = mention_request(&envelope) else {
                tracing::debug!(
                    event_type = ?envelope.event.as_ref().map(|e| e.type_.as_str()),
                    "Slack event ignored"
                );
                return Ok(Json(json!({})));
            };

            tracing::info!(
                correlation_id = %request.correlation_id,
                channel_id = %request.target.channel_id,
                thread_ts = %request.target.thread_ts,
                "Slack mention accepted, spawning background task"
            );

            let pipeline = Arc::clone(&state.pipeline);
            tokio::spawn(async move {
                // 失败已在流水线内记录并回复用户
                let _ = pipeline.handle(request).await;
            });

            Ok(Json(json!({})))
        }
        other => {
            tracing::debug!(envelope_type = other, "Slack envelope ignored");
            Ok(Json(json!({})))
        }
    }
}
