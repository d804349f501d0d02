//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_RELAY__*` 覆盖（双下划线表示嵌套，如 `BEE_RELAY__STREAM__DEBOUNCE_MS=100`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{RetryPolicy, HARD_TIMEOUT};
use crate::history::{NameCache, WindowOptions};
use crate::stream::StreamerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub history: HistorySection,
    pub stream: StreamSection,
    pub pipeline: PipelineSection,
    pub llm: LlmSection,
    pub slack: SlackSection,
}

/// [app] 段：应用名与系统提示词
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// 提示词文件，存在时优先于 system_prompt
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            system_prompt: default_system_prompt(),
            system_prompt_path: None,
        }
    }
}

fn default_system_prompt() -> String {
    "You are Bee, a helpful assistant replying inside a team chat thread. \
     Earlier thread messages are provided as context; answer the latest message concisely."
        .to_string()
}

impl AppSection {
    /// 读取提示词：文件可读时用文件内容，否则用内联配置
    pub fn resolve_system_prompt(&self) -> String {
        self.system_prompt_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.system_prompt.clone())
    }
}

/// [history] 段：分页大小、字符预算、保留条数、名称缓存
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_keep_last_n")]
    pub keep_last_n: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_name_cache_ttl_secs")]
    pub name_cache_ttl_secs: u64,
    #[serde(default = "default_name_cache_capacity")]
    pub name_cache_capacity: usize,
}

fn default_page_size() -> usize {
    200
}

fn default_max_chars() -> usize {
    16_000
}

fn default_keep_last_n() -> usize {
    50
}

fn default_max_pages() -> usize {
    100
}

fn default_name_cache_ttl_secs() -> u64 {
    3600
}

fn default_name_cache_capacity() -> usize {
    500
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_chars: default_max_chars(),
            keep_last_n: default_keep_last_n(),
            max_pages: default_max_pages(),
            name_cache_ttl_secs: default_name_cache_ttl_secs(),
            name_cache_capacity: default_name_cache_capacity(),
        }
    }
}

impl HistorySection {
    pub fn window_options(&self) -> WindowOptions {
        WindowOptions {
            page_size: self.page_size,
            max_chars: self.max_chars,
            keep_last_n: self.keep_last_n,
            max_pages: self.max_pages,
            correlation_id: None,
        }
    }

    pub fn name_cache(&self) -> NameCache {
        NameCache::new(
            Duration::from_secs(self.name_cache_ttl_secs),
            self.name_cache_capacity,
        )
    }
}

/// [stream] 段：防抖、心跳、发送重试、首字延迟目标（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_threshold_ms: u64,
    #[serde(default = "default_flush_max_attempts")]
    pub flush_max_attempts: u32,
    #[serde(default = "default_flush_base_delay_ms")]
    pub flush_base_delay_ms: u64,
    #[serde(default = "default_first_token_target_ms")]
    pub first_token_target_ms: u64,
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

fn default_flush_max_attempts() -> u32 {
    3
}

fn default_flush_base_delay_ms() -> u64 {
    100
}

fn default_first_token_target_ms() -> u64 {
    500
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            heartbeat_interval_ms: default_heartbeat_ms(),
            heartbeat_threshold_ms: default_heartbeat_ms(),
            flush_max_attempts: default_flush_max_attempts(),
            flush_base_delay_ms: default_flush_base_delay_ms(),
            first_token_target_ms: default_first_token_target_ms(),
        }
    }
}

impl StreamSection {
    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            // interval 不接受 0
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1)),
            heartbeat_threshold: Duration::from_millis(self.heartbeat_threshold_ms),
            flush_retry: RetryPolicy::new(
                self.flush_max_attempts,
                Duration::from_millis(self.flush_base_delay_ms),
            ),
            first_token_target: Duration::from_millis(self.first_token_target_ms),
        }
    }
}

/// [pipeline] 段：单次请求的硬超时
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,
}

fn default_hard_timeout_ms() -> u64 {
    HARD_TIMEOUT.as_millis() as u64
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            hard_timeout_ms: default_hard_timeout_ms(),
        }
    }
}

impl PipelineSection {
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }
}

/// [llm] 段：后端选择（mock / openai）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点；未设置时用官方地址
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
        }
    }
}

/// [slack] 段：Bot Token、事件校验 Token、监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct SlackSection {
    pub bot_token: Option<String>,
    /// 事件回调里的 token 字段；设置后不匹配的请求一律拒绝
    pub verification_token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// event_id 去重缓存上限
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: usize,
}

fn default_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_dedupe_capacity() -> usize {
    10_000
}

impl Default for SlackSection {
    fn default() -> Self {
        Self {
            bot_token: None,
            verification_token: None,
            api_base: default_api_base(),
            bind_addr: default_bind_addr(),
            dedupe_capacity: default_dedupe_capacity(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE_RELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_RELAY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, skipping", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_RELAY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.history.page_size, 200);
        assert_eq!(cfg.history.keep_last_n, 50);
        assert_eq!(cfg.history.max_chars, 16_000);
        assert_eq!(cfg.stream.debounce_ms, 250);
        assert_eq!(cfg.pipeline.hard_timeout_ms, 240_000);
        assert_eq!(cfg.llm.provider, "mock");

        let sc = cfg.stream.streamer_config();
        assert_eq!(sc.flush_retry.max_retries, 3);
        assert_eq!(sc.flush_retry.base_delay, Duration::from_millis(100));
        assert_eq!(sc.heartbeat_threshold, Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file_keeps_unset_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[history]\nkeep_last_n = 20\n\n[stream]\ndebounce_ms = 100\n\n[llm]\nprovider = \"openai\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.history.keep_last_n, 20);
        assert_eq!(cfg.history.page_size, 200);
        assert_eq!(cfg.stream.debounce_ms, 100);
        assert_eq!(cfg.stream.heartbeat_interval_ms, 10_000);
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.history.window_options().keep_last_n, 20);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = load_config(Some(PathBuf::from("/nonexistent/bee-relay.toml"))).unwrap();
        assert_eq!(cfg.history.max_pages, 100);
    }

    #[test]
    fn test_system_prompt_file_overrides_inline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  from file  ").unwrap();
        let app = AppSection {
            system_prompt_path: Some(file.path().to_path_buf()),
            ..AppSection::default()
        };
        assert_eq!(app.resolve_system_prompt(), "from file");

        let app = AppSection {
            system_prompt_path: Some(PathBuf::from("/nonexistent/prompt.md")),
            ..AppSection::default()
        };
        assert_eq!(app.resolve_system_prompt(), default_system_prompt());
    }

    #[test]
    fn test_env_overrides_file() {
        std::env::set_var("BEE_RELAY__SLACK__BIND_ADDR", "127.0.0.1:8080");
        let cfg = load_config(None).unwrap();
        std::env::remove_var("BEE_RELAY__SLACK__BIND_ADDR");
        assert_eq!(cfg.slack.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.slack.api_base, "https://slack.com/api");
    }
}
