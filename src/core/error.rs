//! 错误码与结构化错误记录
//!
//! 封闭的错误码集合（ErrorCode），每个错误码对应默认的可恢复标记与一段面向用户的固定文案；
//! ErrorRecord 携带技术信息（日志用）与用户文案（回复用），两者严格分离。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const RETRY_AFTER_KEY: &str = "retry_after_ms";

/// 封闭错误码集合；序列化名即对外稳定契约（kebab-case）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// 整个请求（Agent 单元）超出硬超时
    TimeoutAgent,
    /// 单次工具调用超时
    TimeoutTool,
    ToolExecutionFailed,
    ContextLimitExceeded,
    UpstreamConnectionError,
    /// 消息平台 API 返回错误
    ExternalPlatformError,
    ModelApiError,
    /// 平台或模型限流
    RateLimited,
    InvalidInput,
    Unknown,
    // 执行环境相关
    SandboxCreationFailed,
    SandboxTimeout,
    ExecutionFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 13] = [
        ErrorCode::TimeoutAgent,
        ErrorCode::TimeoutTool,
        ErrorCode::ToolExecutionFailed,
        ErrorCode::ContextLimitExceeded,
        ErrorCode::UpstreamConnectionError,
        ErrorCode::ExternalPlatformError,
        ErrorCode::ModelApiError,
        ErrorCode::RateLimited,
        ErrorCode::InvalidInput,
        ErrorCode::Unknown,
        ErrorCode::SandboxCreationFailed,
        ErrorCode::SandboxTimeout,
        ErrorCode::ExecutionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TimeoutAgent => "timeout-agent",
            ErrorCode::TimeoutTool => "timeout-tool",
            ErrorCode::ToolExecutionFailed => "tool-execution-failed",
            ErrorCode::ContextLimitExceeded => "context-limit-exceeded",
            ErrorCode::UpstreamConnectionError => "upstream-connection-error",
            ErrorCode::ExternalPlatformError => "external-platform-error",
            ErrorCode::ModelApiError => "model-api-error",
            ErrorCode::RateLimited => "rate-limited",
            ErrorCode::InvalidInput => "invalid-input",
            ErrorCode::Unknown => "unknown",
            ErrorCode::SandboxCreationFailed => "sandbox-creation-failed",
            ErrorCode::SandboxTimeout => "sandbox-timeout",
            ErrorCode::ExecutionFailed => "execution-failed",
        }
    }

    /// 默认可恢复性：超时、连接错误、限流为瞬时故障，其余一律视为不可恢复
    pub fn default_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TimeoutAgent
                | ErrorCode::TimeoutTool
                | ErrorCode::UpstreamConnectionError
                | ErrorCode::RateLimited
                | ErrorCode::SandboxTimeout
        )
    }

    /// 面向用户的固定文案：警告标题 + 通俗解释 + 至少两条建议
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::TimeoutAgent => {
                ":warning: *This took too long to answer*\n\
                 I couldn't finish a reply within the time limit, so I stopped rather than leave you waiting.\n\
                 You can:\n\
                 • Ask again with a narrower question\n\
                 • Split the request into smaller steps"
            }
            ErrorCode::TimeoutTool => {
                ":warning: *A step took too long*\n\
                 One of the actions I ran to answer you didn't finish in time.\n\
                 You can:\n\
                 • Try again in a moment\n\
                 • Ask for a smaller piece of work"
            }
            ErrorCode::ToolExecutionFailed => {
                ":warning: *An action I tried didn't work*\n\
                 Something I ran while preparing the answer failed.\n\
                 You can:\n\
                 • Rephrase the request\n\
                 • Ask for the answer without running anything"
            }
            ErrorCode::ContextLimitExceeded => {
                ":warning: *This conversation is too long for me*\n\
                 There's more here than I can read at once.\n\
                 You can:\n\
                 • Start a new thread with a short summary\n\
                 • Ask about one part of the conversation at a time"
            }
            ErrorCode::UpstreamConnectionError => {
                ":warning: *I couldn't reach a service I depend on*\n\
                 The connection dropped while I was working on your reply.\n\
                 You can:\n\
                 • Try again in a minute\n\
                 • Let your admin know if this keeps happening"
            }
            ErrorCode::ExternalPlatformError => {
                ":warning: *The chat platform returned an error*\n\
                 I couldn't read or post messages in this conversation.\n\
                 You can:\n\
                 • Check that I'm still invited to this channel\n\
                 • Try again in a minute"
            }
            ErrorCode::ModelApiError => {
                ":warning: *The AI service had a problem*\n\
                 The service that writes my answers didn't respond properly.\n\
                 You can:\n\
                 • Ask again in a moment\n\
                 • Shorten or simplify the question"
            }
            ErrorCode::RateLimited => {
                ":warning: *I'm getting too many requests right now*\n\
                 A service I use asked me to slow down.\n\
                 You can:\n\
                 • Wait a minute and ask again\n\
                 • Combine several questions into one message"
            }
            ErrorCode::InvalidInput => {
                ":warning: *I couldn't understand that request*\n\
                 Part of the message wasn't in a form I can work with.\n\
                 You can:\n\
                 • Rephrase the question in plain text\n\
                 • Remove attachments or formatting and try again"
            }
            ErrorCode::Unknown => {
                ":warning: *Something went wrong*\n\
                 I hit an unexpected problem while answering.\n\
                 You can:\n\
                 • Try again\n\
                 • Start a new thread if the problem persists"
            }
            ErrorCode::SandboxCreationFailed => {
                ":warning: *I couldn't set up a workspace*\n\
                 The isolated environment I use to run code didn't start.\n\
                 You can:\n\
                 • Try again in a few minutes\n\
                 • Ask for an explanation instead of running code"
            }
            ErrorCode::SandboxTimeout => {
                ":warning: *The code took too long to run*\n\
                 The workspace was stopped before the code finished.\n\
                 You can:\n\
                 • Try a smaller input\n\
                 • Ask me to explain the code instead of running it"
            }
            ErrorCode::ExecutionFailed => {
                ":warning: *The code didn't run successfully*\n\
                 Running the code produced an error.\n\
                 You can:\n\
                 • Ask me to look at the error\n\
                 • Try a simpler version of the code"
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ErrorRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| {
                ErrorRecord::new(ErrorCode::InvalidInput, format!("unknown error code: {s}"))
            })
    }
}

/// 结构化错误记录：构造后不可变；with_* 为消费式覆盖，仅在构造阶段使用
#[derive(Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct ErrorRecord {
    code: ErrorCode,
    message: String,
    user_message: String,
    recoverable: bool,
    retry_count: u32,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    metadata: HashMap<String, serde_json::Value>,
}

impl ErrorRecord {
    /// 按错误码默认值创建：用户文案与可恢复标记取自错误码
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            user_message: code.user_message().to_string(),
            recoverable: code.default_recoverable(),
            retry_count: 0,
            cause: None,
            metadata: HashMap::new(),
        }
    }

    /// 包装任意错误；若本身已是 ErrorRecord 则原样返回（幂等包装）
    pub fn wrap<E>(code: ErrorCode, err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        let err: anyhow::Error = err.into();
        match err.downcast::<ErrorRecord>() {
            Ok(record) => record,
            Err(err) => Self::new(code, format!("{err:#}")).with_cause(err),
        }
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let boxed: Box<dyn std::error::Error + Send + Sync> = cause.into();
        self.cause = Some(Arc::from(boxed));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// 上游要求的最短重试间隔（如 HTTP Retry-After），存于 metadata
    pub fn with_retry_after(self, delay: Duration) -> Self {
        self.with_metadata(RETRY_AFTER_KEY, delay.as_millis() as u64)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// 技术信息，仅用于日志
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 发给终端用户的文案
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.metadata
            .get(RETRY_AFTER_KEY)
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
    }

    /// 展开 cause 链（由近及远），供结构化日志使用
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }

    /// 结构化日志表示（字段名与对外 JSON 约定一致）
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "message": self.message,
            "userMessage": self.user_message,
            "recoverable": self.recoverable,
            "retryCount": self.retry_count,
            "causes": self.cause_chain(),
            "metadata": self.metadata,
        })
    }

    /// JSON 形状校验：四个必需字段齐全，且 code 属于封闭集合
    pub fn is_record_shape(value: &serde_json::Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        let code_ok = obj
            .get("code")
            .and_then(|c| c.as_str())
            .is_some_and(|c| c.parse::<ErrorCode>().is_ok());
        code_ok
            && obj.get("message").is_some_and(|m| m.is_string())
            && obj.get("userMessage").is_some_and(|m| m.is_string())
            && obj.get("recoverable").is_some_and(|r| r.is_boolean())
    }
}

/// 类型守卫：错误对象是否就是 ErrorRecord
pub fn is_error_record(err: &(dyn std::error::Error + 'static)) -> bool {
    err.is::<ErrorRecord>()
}
