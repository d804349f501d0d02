//! Bee Relay - 上下文受限的聊天线程回复流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、有界重试、超时竞速
//! - **history**: 线程历史分页拉取与双上限窗口、显示名缓存
//! - **stream**: 带防抖、心跳与限流重试的流式投递
//! - **pipeline**: 单次请求编排（历史 → 模型 → 投递，整体硬超时）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **integrations**: Slack Web API 与 Events Webhook（feature `slack`）
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod history;
pub mod integrations;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod stream;

pub use crate::core::{ErrorCode, ErrorRecord};
pub use pipeline::{InboundRequest, Pipeline};
