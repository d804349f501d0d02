//! Bee Relay 本地演示
//!
//! 入口：加载配置、初始化日志，用内存线程 + 终端通道跑通一次完整请求。
//!
//! 用法: cargo run --bin bee-relay -- [--config path/to/config.toml] [消息内容]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bee_relay::config::{load_config, AppConfig};
use bee_relay::history::{InMemoryHistory, ThreadMessage};
use bee_relay::llm::create_llm_from_config;
use bee_relay::stream::{ConsoleChannel, StreamTarget};
use bee_relay::{observability, InboundRequest, Pipeline};

const DEMO_CHANNEL: &str = "CDEMO";
const DEMO_THREAD: &str = "1712345600.000100";

/// 解析命令行：可选 --config，其余参数拼成消息
fn parse_args() -> anyhow::Result<(Option<PathBuf>, String)> {
    let mut config_path = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config requires a path")?;
            config_path = Some(PathBuf::from(path));
        } else {
            words.push(arg);
        }
    }
    let text = if words.is_empty() {
        "What did we decide about the release date?".to_string()
    } else {
        words.join(" ")
    };
    Ok((config_path, text))
}

/// 演示线程：几条历史消息 + 触发消息（窗口会丢弃最后一条）
fn demo_thread(text: &str) -> InMemoryHistory {
    let mut history = InMemoryHistory::new(vec![
        ThreadMessage::new("U01ALICE", "Kicking off the release planning thread.", "1712345600.000100"),
        ThreadMessage::new("U02BOB", "QA needs two more days for the regression pass.", "1712345660.000200"),
        ThreadMessage::automated("B01BEE", "Noted: QA regression pass needs two more days.", "1712345670.000300"),
        ThreadMessage::new("U01ALICE", "Then let's target Thursday instead of Tuesday.", "1712345720.000400"),
    ]);
    history.push(ThreadMessage::new("U03CAROL", text, "1712345780.000500"));
    history
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let (config_path, text) = parse_args()?;
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let llm = create_llm_from_config(&cfg.llm);
    let pipeline = Pipeline::from_config(
        &cfg,
        Arc::new(demo_thread(&text)),
        Arc::new(ConsoleChannel),
        llm,
    );

    let target = StreamTarget::new(DEMO_CHANNEL, DEMO_THREAD, "U03CAROL");
    match pipeline.handle(InboundRequest::new(target, text)).await {
        Ok(metrics) => {
            tracing::info!(
                elapsed_ms = metrics.elapsed.as_millis() as u64,
                total_chars = metrics.total_chars,
                flushes = metrics.flushes,
                "demo finished"
            );
        }
        Err(err) => {
            tracing::error!(code = %err.code(), "demo failed: {}", err.message());
        }
    }

    // 让终端输出与日志有序结束
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
