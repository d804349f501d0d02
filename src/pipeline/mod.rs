//! 回复流水线：提示词组装与单次请求编排

pub mod orchestrator;
pub mod prompt;

pub use orchestrator::{InboundRequest, Pipeline};
pub use prompt::build_prompt;
