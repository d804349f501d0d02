//! Mock LLM 客户端（用于测试与本地运行，无需 API）
//!
//! 取最后一条 User 消息回显，并按词切分成多个 Token 流出，便于观察防抖合并。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{LlmClient, LlmError, Message, Role, TokenStream};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    chunk_delay: Duration,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每个 Token 之间的间隔
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn reply_for(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let context = messages.len().saturating_sub(1);
        format!("Echo from Mock ({context} context messages): {last_user}")
    }
}

/// 按空白切分并保留分隔符，拼接后与原文一致
fn split_tokens(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let tokens = split_tokens(&Self::reply_for(messages));
        let delay = self.chunk_delay;
        let tokens = stream::iter(tokens).then(move |token| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(token)
        });
        Ok(Box::pin(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_concatenates_to_reply() {
        let client = MockLlmClient::new();
        let messages = vec![Message::system("sys"), Message::user("hello there")];
        let full = MockLlmClient::reply_for(&messages);
        let streamed: Vec<String> = client
            .complete_stream(&messages)
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert!(streamed.len() > 1);
        assert_eq!(streamed.concat(), full);
        assert!(full.ends_with("hello there"));
    }
}
