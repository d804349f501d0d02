//! LLM 层：消息类型、客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError, TokenStream};

use std::sync::Arc;

use crate::config::LlmSection;

/// 根据配置选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let has_key = cfg.api_key.is_some() || std::env::var("OPENAI_API_KEY").is_ok();
    match cfg.provider.to_lowercase().as_str() {
        "openai" if has_key => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                cfg.api_key.as_deref(),
            ))
        }
        "openai" => {
            tracing::warn!("provider=openai but no API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!("Unknown LLM provider {:?}, using Mock LLM", other);
            Arc::new(MockLlmClient::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_unknown_provider_falls_back_to_mock() {
        let cfg = LlmSection {
            provider: "nonexistent".to_string(),
            ..LlmSection::default()
        };
        let client = create_llm_from_config(&cfg);
        let tokens: Vec<String> = client
            .complete_stream(&[Message::user("ping")])
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert!(tokens.concat().ends_with("ping"));
    }
}
