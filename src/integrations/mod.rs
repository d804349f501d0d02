//! 外部集成：Slack（需 `slack` feature 与公网 Webhook 域名）

#[cfg(feature = "slack")]
pub mod slack;
