//! 单次请求编排：历史窗口 → 模型流式生成 → 流式投递，整体包在硬超时里
//!
//! 唯一的错误恢复点：失败时记录完整结构化错误，只把错误码对应的用户提示发回线程；
//! 无论成功、失败还是超时，已打开且未关闭的流式会话都会被尽力 stop；
//! stop 也超时时由 ResponseStreamer 的 drop 在后台关闭会话。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::core::{with_timeout, ErrorCode, ErrorRecord, HARD_TIMEOUT};
use crate::history::{
    fetch_window, resolve_names, HistorySource, NameCache, NameResolver, ThreadRef, WindowOptions,
};
use crate::llm::LlmClient;
use crate::pipeline::build_prompt;
use crate::stream::{
    ResponseStreamer, StreamChannel, StreamMetrics, StreamTarget, StreamerConfig,
};

/// 清理路径上 stop() 的等待上限
const STOP_GRACE: Duration = Duration::from_secs(10);

/// 一条入站消息（如 Slack app_mention）
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub thread: ThreadRef,
    pub target: StreamTarget,
    pub text: String,
    pub correlation_id: String,
}

impl InboundRequest {
    pub fn new(target: StreamTarget, text: impl Into<String>) -> Self {
        Self {
            thread: ThreadRef::new(target.channel_id.clone(), target.thread_ts.clone()),
            target,
            text: text.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }
}

/// 回复流水线：持有外部协作方与各组件参数，可被多个请求并发共享
pub struct Pipeline {
    history: Arc<dyn HistorySource>,
    channel: Arc<dyn StreamChannel>,
    llm: Arc<dyn LlmClient>,
    names: Option<Arc<dyn NameResolver>>,
    name_cache: Mutex<NameCache>,
    window: WindowOptions,
    streamer: StreamerConfig,
    system_prompt: String,
    hard_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        history: Arc<dyn HistorySource>,
        channel: Arc<dyn StreamChannel>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            history,
            channel,
            llm,
            names: None,
            name_cache: Mutex::new(NameCache::default()),
            window: WindowOptions::default(),
            streamer: StreamerConfig::default(),
            system_prompt: String::new(),
            hard_timeout: HARD_TIMEOUT,
        }
    }

    /// 按配置组装各组件参数
    pub fn from_config(
        cfg: &AppConfig,
        history: Arc<dyn HistorySource>,
        channel: Arc<dyn StreamChannel>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self::new(history, channel, llm)
            .with_window_options(cfg.history.window_options())
            .with_streamer_config(cfg.stream.streamer_config())
            .with_system_prompt(cfg.app.resolve_system_prompt())
            .with_hard_timeout(cfg.pipeline.hard_timeout())
            .with_name_cache(cfg.history.name_cache())
    }

    pub fn with_name_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.names = Some(resolver);
        self
    }

    pub fn with_name_cache(mut self, cache: NameCache) -> Self {
        self.name_cache = Mutex::new(cache);
        self
    }

    pub fn with_window_options(mut self, window: WindowOptions) -> Self {
        self.window = window;
        self
    }

    pub fn with_streamer_config(mut self, streamer: StreamerConfig) -> Self {
        self.streamer = streamer;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_hard_timeout(mut self, limit: Duration) -> Self {
        self.hard_timeout = limit;
        self
    }

    /// 处理一条请求；失败时已向线程回复用户提示，返回的错误仅供调用方记录
    pub async fn handle(&self, request: InboundRequest) -> Result<StreamMetrics, ErrorRecord> {
        let started = Instant::now();
        let mut streamer = ResponseStreamer::new(self.channel.clone(), self.streamer.clone());

        let result = with_timeout(self.run(&request, &mut streamer), self.hard_timeout).await;

        if streamer.is_open() {
            match with_timeout(streamer.stop(), STOP_GRACE).await {
                Ok(_) => tracing::debug!(
                    correlation_id = %request.correlation_id,
                    "stream stopped on cleanup path"
                ),
                Err(e) => tracing::warn!(
                    correlation_id = %request.correlation_id,
                    code = %e.code(),
                    "best-effort stream stop failed: {}",
                    e.message()
                ),
            }
        }
        drop(streamer);

        match result {
            Ok(metrics) => {
                tracing::info!(
                    correlation_id = %request.correlation_id,
                    channel_id = %request.target.channel_id,
                    thread_ts = %request.target.thread_ts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    total_chars = metrics.total_chars,
                    "request completed"
                );
                Ok(metrics)
            }
            Err(err) => {
                tracing::error!(
                    correlation_id = %request.correlation_id,
                    channel_id = %request.target.channel_id,
                    thread_ts = %request.target.thread_ts,
                    code = %err.code(),
                    retry_count = err.retry_count(),
                    causes = ?err.cause_chain(),
                    detail = %err.to_json(),
                    "request failed"
                );
                if let Err(e) = self
                    .channel
                    .post_message(&request.target, err.user_message())
                    .await
                {
                    tracing::warn!(
                        correlation_id = %request.correlation_id,
                        "failed to deliver error reply: {}",
                        e
                    );
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        request: &InboundRequest,
        streamer: &mut ResponseStreamer,
    ) -> Result<StreamMetrics, ErrorRecord> {
        if request.text.trim().is_empty() {
            return Err(ErrorRecord::new(ErrorCode::InvalidInput, "empty request text"));
        }

        let options = self
            .window
            .clone()
            .with_correlation_id(request.correlation_id.clone());
        let window = fetch_window(self.history.as_ref(), &request.thread, &options).await;
        tracing::debug!(
            correlation_id = %request.correlation_id,
            context_messages = window.len(),
            "history window ready"
        );

        let names = match self.names.as_deref() {
            Some(resolver) => {
                let authors = window
                    .iter()
                    .filter(|m| !m.is_automated)
                    .map(|m| m.author_id.as_str());
                resolve_names(&self.name_cache, resolver, authors).await
            }
            None => HashMap::new(),
        };
        let prompt = build_prompt(&self.system_prompt, &window, &request.text, &names);

        streamer.start(request.target.clone()).await?;

        let mut tokens = self.llm.complete_stream(&prompt).await?;
        while let Some(token) = tokens.next().await {
            streamer.append(&token?)?;
        }

        streamer.stop().await
    }
}
