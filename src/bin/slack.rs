//! Bee Relay Slack 服务
//!
//! 通过 Slack Events API 接收 app_mention，在线程内流式回复。
//!
//! 配置（config/default.toml 或环境变量）:
//! - BEE_RELAY__SLACK__BOT_TOKEN: Bot Token（xoxb-...）
//! - BEE_RELAY__SLACK__VERIFICATION_TOKEN: 事件校验 Token（可选）
//! - BEE_RELAY__SLACK__BIND_ADDR: 监听地址（默认 0.0.0.0:3000）
//! - BEE_RELAY__LLM__PROVIDER=openai 与 OPENAI_API_KEY: LLM 后端
//!
//! 启动: cargo run --bin bee-relay-slack --features slack

#[cfg(feature = "slack")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use bee_relay::config::load_config;
    use bee_relay::integrations::slack::{create_router, SlackClient, SlackState};
    use bee_relay::llm::create_llm_from_config;
    use bee_relay::{observability, Pipeline};
    use tokio_util::sync::CancellationToken;

    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let token = cfg
        .slack
        .bot_token
        .clone()
        .context("slack.bot_token must be set (BEE_RELAY__SLACK__BOT_TOKEN)")?;
    if cfg.slack.verification_token.is_none() {
        tracing::warn!("slack.verification_token not set, accepting unverified event callbacks");
    }

    let slack = Arc::new(SlackClient::new(token, cfg.slack.api_base.clone()));
    let llm = create_llm_from_config(&cfg.llm);
    let pipeline = Pipeline::from_config(&cfg, slack.clone(), slack.clone(), llm)
        .with_name_resolver(slack);

    let state = Arc::new(SlackState::new(
        Arc::new(pipeline),
        cfg.slack.verification_token.clone(),
        cfg.slack.dedupe_capacity,
    ));
    let app = create_router(state);

    let addr: std::net::SocketAddr = cfg
        .slack
        .bind_addr
        .parse()
        .with_context(|| format!("invalid slack.bind_addr {:?}", cfg.slack.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Bee Relay Slack server listening on http://{}", addr);
    tracing::info!("Events URL: http://YOUR_HOST:{}/slack/events", addr.port());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, shutting down");
        }
        signal.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Slack server failed")?;

    Ok(())
}

#[cfg(not(feature = "slack"))]
fn main() {
    eprintln!("请使用 --features slack 编译: cargo run --bin bee-relay-slack --features slack");
    std::process::exit(1);
}
