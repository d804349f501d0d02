//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete_stream，逐块产出 Token。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::core::{ErrorCode, ErrorRecord};
use crate::llm::Message;

/// 流式完成返回的 Token 流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 模型调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("model rate limited: {0}")]
    RateLimited(String),

    #[error("model api error: {0}")]
    Api(String),

    /// 流已建立后中途失败
    #[error("model stream error: {0}")]
    Stream(String),
}

impl From<LlmError> for ErrorRecord {
    fn from(err: LlmError) -> Self {
        let code = match &err {
            LlmError::RateLimited(_) => ErrorCode::RateLimited,
            LlmError::Api(_) | LlmError::Stream(_) => ErrorCode::ModelApiError,
        };
        ErrorRecord::new(code, err.to_string()).with_cause(err)
    }
}

/// LLM 客户端 trait：流式完成，返回 Token 流
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_codes() {
        let rec: ErrorRecord = LlmError::RateLimited("429".into()).into();
        assert_eq!(rec.code(), ErrorCode::RateLimited);
        let rec: ErrorRecord = LlmError::Stream("eof".into()).into();
        assert_eq!(rec.code(), ErrorCode::ModelApiError);
        assert!(!rec.is_recoverable());
    }
}
