//! 流式更新通道抽象
//!
//! 推模式：open(target) 打开会话，handle.append(text) 追加文本，handle.close() 结束。
//! 通道自身限流，以可区分的 RateLimited 错误暴露给重试逻辑。

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{ErrorCode, ErrorRecord};

/// 回复投递目标：频道、线程、接收者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub channel_id: String,
    pub thread_ts: String,
    pub recipient_user_id: String,
    pub recipient_team_id: Option<String>,
}

impl StreamTarget {
    pub fn new(
        channel_id: impl Into<String>,
        thread_ts: impl Into<String>,
        recipient_user_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
            recipient_user_id: recipient_user_id.into(),
            recipient_team_id: None,
        }
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.recipient_team_id = Some(team_id.into());
        self
    }
}

/// 通道错误
#[derive(Error, Debug)]
pub enum ChannelError {
    /// 平台返回 "too many requests"
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("platform error: {0}")]
    Platform(String),
}

impl ChannelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ChannelError::RateLimited { .. })
    }
}

impl From<ChannelError> for ErrorRecord {
    fn from(err: ChannelError) -> Self {
        let (code, retry_after) = match &err {
            ChannelError::RateLimited { retry_after } => (ErrorCode::RateLimited, *retry_after),
            ChannelError::Connection(_) => (ErrorCode::UpstreamConnectionError, None),
            ChannelError::Platform(_) => (ErrorCode::ExternalPlatformError, None),
        };
        let record = ErrorRecord::new(code, err.to_string()).with_cause(err);
        match retry_after {
            Some(delay) => record.with_retry_after(delay),
            None => record,
        }
    }
}

/// 流式更新通道（Slack chat streaming、终端输出等）
#[async_trait]
pub trait StreamChannel: Send + Sync {
    /// 打开一个流式会话
    async fn open(&self, target: &StreamTarget) -> Result<Box<dyn StreamHandle>, ChannelError>;

    /// 发送一条普通消息（错误提示等非流式回复）
    async fn post_message(&self, target: &StreamTarget, text: &str) -> Result<(), ChannelError>;
}

/// 已打开的流式会话
#[async_trait]
pub trait StreamHandle: Send + Sync {
    async fn append(&self, text: &str) -> Result<(), ChannelError>;

    async fn close(&self) -> Result<(), ChannelError>;
}

/// 终端通道：直接把文本写到 stdout（本地运行用）
#[derive(Debug, Default, Clone)]
pub struct ConsoleChannel;

struct ConsoleHandle;

#[async_trait]
impl StreamChannel for ConsoleChannel {
    async fn open(&self, target: &StreamTarget) -> Result<Box<dyn StreamHandle>, ChannelError> {
        tracing::debug!(channel_id = %target.channel_id, "console stream opened");
        Ok(Box::new(ConsoleHandle))
    }

    async fn post_message(&self, _target: &StreamTarget, text: &str) -> Result<(), ChannelError> {
        println!("{text}");
        Ok(())
    }
}

#[async_trait]
impl StreamHandle for ConsoleHandle {
    async fn append(&self, text: &str) -> Result<(), ChannelError> {
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| ChannelError::Connection(e.to_string()))
    }

    async fn close(&self) -> Result<(), ChannelError> {
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_codes() {
        let rec: ErrorRecord = ChannelError::RateLimited { retry_after: None }.into();
        assert_eq!(rec.code(), ErrorCode::RateLimited);
        assert!(rec.is_recoverable());

        let rec: ErrorRecord = ChannelError::Platform("not_in_channel".into()).into();
        assert_eq!(rec.code(), ErrorCode::ExternalPlatformError);
        assert!(!rec.is_recoverable());
        assert!(rec.message().contains("not_in_channel"));

        let rec: ErrorRecord = ChannelError::Connection("reset".into()).into();
        assert_eq!(rec.code(), ErrorCode::UpstreamConnectionError);
        assert_eq!(rec.retry_after(), None);
    }

    #[test]
    fn test_retry_after_carried_into_record() {
        let rec: ErrorRecord = ChannelError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        }
        .into();
        assert_eq!(rec.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(rec.metadata()["retry_after_ms"], 3000);
    }
}
