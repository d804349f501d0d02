//! 流式回复投递
//!
//! 状态机 idle → active → stopping → stopped（终态）。active 期间由一个后台 flush 任务独占
//! 待发缓冲、防抖定时器与心跳定时器，会话句柄由任务与投递器共享：
//! - 防抖：append 只入队不等待；首个未发送字符到达后 debounce 时长内的追加合并为一次发送；
//!   发送前同步取走并清空缓冲，因此发送顺序与追加顺序一致。
//! - 心跳：固定间隔检查距上次成功发送的时长，超阈值仅记录日志，不做补救。
//! - 发送重试：仅限流错误按 100ms * 2^n 退避重试，耗尽后丢弃该段并继续，会话不中断。
//!
//! start / stop 的失败向调用方传播；append 层面的发送失败不传播。
//!
//! stop 可被取消：会话停留在 stopping 直到 close 执行完毕，再次调用 stop 会从断点继续；
//! 未关闭就被 drop 时中止 flush 任务，并在后台关闭会话。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::{retry_with_backoff, ErrorCode, ErrorRecord, RetryDecision, RetryPolicy};
use crate::stream::{StreamChannel, StreamHandle, StreamTarget};

/// 投递参数
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub debounce: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_threshold: Duration,
    pub flush_retry: RetryPolicy,
    /// 首字延迟目标，仅用于观测
    pub first_token_target: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_threshold: Duration::from_secs(10),
            flush_retry: RetryPolicy::new(3, Duration::from_millis(100)),
            first_token_target: Duration::from_millis(500),
        }
    }
}

/// stop() 返回的汇总指标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMetrics {
    pub elapsed: Duration,
    pub total_chars: usize,
    pub flushes: usize,
    pub dropped_chunks: usize,
}

enum State {
    Idle,
    Active(ActiveSession),
    /// stop 已开始、会话尚未关闭
    Stopping(ActiveSession),
    Stopped,
}

struct ActiveSession {
    target: StreamTarget,
    handle: Arc<dyn StreamHandle>,
    tx: Option<mpsc::UnboundedSender<String>>,
    worker: Option<JoinHandle<FlushStats>>,
    stats: FlushStats,
    worker_error: Option<ErrorRecord>,
    started_at: Instant,
    total_chars: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct FlushStats {
    flushes: usize,
    dropped_chunks: usize,
}

/// 单次请求独占的流式投递器
pub struct ResponseStreamer {
    channel: Arc<dyn StreamChannel>,
    config: StreamerConfig,
    state: State,
}

fn precondition(message: &str) -> ErrorRecord {
    ErrorRecord::new(ErrorCode::InvalidInput, message).with_metadata("kind", "precondition")
}

impl ResponseStreamer {
    pub fn new(channel: Arc<dyn StreamChannel>, config: StreamerConfig) -> Self {
        Self {
            channel,
            config,
            state: State::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, State::Stopped)
    }

    /// 外部会话已打开且尚未关闭（含 stop 进行中或被中断）
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Active(_) | State::Stopping(_))
    }

    /// 打开外部会话并启动 flush 任务（含心跳）；打开耗时按首字延迟目标记录
    pub async fn start(&mut self, target: StreamTarget) -> Result<(), ErrorRecord> {
        match self.state {
            State::Idle => {}
            State::Active(_) => return Err(precondition("stream already started")),
            State::Stopping(_) | State::Stopped => return Err(precondition("stream already stopped")),
        }

        let started_at = Instant::now();
        let handle = self.channel.open(&target).await.map_err(|e| {
            ErrorRecord::from(e)
                .with_metadata("channel_id", target.channel_id.clone())
                .with_metadata("thread_ts", target.thread_ts.clone())
        })?;
        let handle: Arc<dyn StreamHandle> = Arc::from(handle);

        let open_elapsed = started_at.elapsed();
        let open_ms = open_elapsed.as_millis() as u64;
        let target_ms = self.config.first_token_target.as_millis() as u64;
        if open_elapsed > self.config.first_token_target {
            tracing::warn!(
                channel_id = %target.channel_id,
                thread_ts = %target.thread_ts,
                open_ms,
                target_ms,
                "stream opened slower than first-token target"
            );
        } else {
            tracing::info!(
                channel_id = %target.channel_id,
                thread_ts = %target.thread_ts,
                open_ms,
                target_ms,
                "stream opened"
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = FlushWorker {
            handle: handle.clone(),
            rx,
            config: self.config.clone(),
            target: target.clone(),
            buffer: String::new(),
            last_flush: started_at,
            flushes: 0,
            dropped_chunks: 0,
        };
        let worker = tokio::spawn(worker.run());

        self.state = State::Active(ActiveSession {
            target,
            handle,
            tx: Some(tx),
            worker: Some(worker),
            stats: FlushStats::default(),
            worker_error: None,
            started_at,
            total_chars: 0,
        });
        Ok(())
    }

    /// 非阻塞追加：文本进入 flush 任务的队列，由防抖定时器决定何时发送
    pub fn append(&mut self, text: &str) -> Result<(), ErrorRecord> {
        let session = match &mut self.state {
            State::Active(session) => session,
            State::Idle => return Err(precondition("append called before start")),
            State::Stopping(_) | State::Stopped => return Err(precondition("append called after stop")),
        };
        if text.is_empty() {
            return Ok(());
        }
        let sent = session
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(text.to_string()).is_ok());
        if !sent {
            return Err(ErrorRecord::new(
                ErrorCode::Unknown,
                "stream flush task is no longer running",
            ));
        }
        session.total_chars += text.chars().count();
        Ok(())
    }

    /// 停止：取消定时器、发送剩余缓冲、关闭外部会话，返回汇总指标
    ///
    /// 被取消后可再次调用，从未完成的步骤继续。
    pub async fn stop(&mut self) -> Result<StreamMetrics, ErrorRecord> {
        if let State::Active(_) = self.state {
            if let State::Active(session) = std::mem::replace(&mut self.state, State::Stopped) {
                self.state = State::Stopping(session);
            }
        }
        let session = match &mut self.state {
            State::Stopping(session) => session,
            State::Idle => return Err(precondition("stop called before start")),
            State::Active(_) | State::Stopped => return Err(precondition("stream already stopped")),
        };

        // 关闭队列后 flush 任务会排空剩余文本、做最后一次发送并退出
        session.tx = None;
        if let Some(worker) = session.worker.as_mut() {
            let joined = worker.await;
            session.worker = None;
            match joined {
                Ok(stats) => session.stats = stats,
                Err(e) => {
                    session.worker_error = Some(ErrorRecord::new(
                        ErrorCode::Unknown,
                        format!("stream flush task failed: {e}"),
                    ))
                }
            }
        }

        let closed = session.handle.close().await;
        let target = session.target.clone();
        let worker_error = session.worker_error.take();
        let metrics = StreamMetrics {
            elapsed: session.started_at.elapsed(),
            total_chars: session.total_chars,
            flushes: session.stats.flushes,
            dropped_chunks: session.stats.dropped_chunks,
        };
        self.state = State::Stopped;

        closed.map_err(|e| {
            ErrorRecord::from(e)
                .with_metadata("channel_id", target.channel_id.clone())
                .with_metadata("thread_ts", target.thread_ts.clone())
        })?;
        if let Some(err) = worker_error {
            return Err(err);
        }

        tracing::info!(
            channel_id = %target.channel_id,
            thread_ts = %target.thread_ts,
            elapsed_ms = metrics.elapsed.as_millis() as u64,
            total_chars = metrics.total_chars,
            flushes = metrics.flushes,
            dropped_chunks = metrics.dropped_chunks,
            "stream stopped"
        );
        Ok(metrics)
    }
}

impl Drop for ResponseStreamer {
    fn drop(&mut self) {
        let session = match &mut self.state {
            State::Active(session) | State::Stopping(session) => session,
            State::Idle | State::Stopped => return,
        };
        tracing::warn!(
            channel_id = %session.target.channel_id,
            thread_ts = %session.target.thread_ts,
            "response streamer dropped before its session was closed, closing in background"
        );
        if let Some(worker) = session.worker.take() {
            worker.abort();
        }

        let handle = session.handle.clone();
        let target = session.target.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = handle.close().await {
                        tracing::warn!(
                            channel_id = %target.channel_id,
                            thread_ts = %target.thread_ts,
                            "background stream close failed: {}",
                            e
                        );
                    }
                });
            }
            Err(_) => tracing::warn!(
                channel_id = %target.channel_id,
                thread_ts = %target.thread_ts,
                "no runtime available, stream session left open"
            ),
        }
    }
}

/// 后台 flush 任务：独占缓冲与全部定时器
struct FlushWorker {
    handle: Arc<dyn StreamHandle>,
    rx: mpsc::UnboundedReceiver<String>,
    config: StreamerConfig,
    target: StreamTarget,
    buffer: String,
    last_flush: Instant,
    flushes: usize,
    dropped_chunks: usize,
}

impl FlushWorker {
    async fn run(mut self) -> FlushStats {
        let debounce = tokio::time::sleep(self.config.debounce);
        tokio::pin!(debounce);
        let mut flush_scheduled = false;

        let interval = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                incoming = self.rx.recv() => match incoming {
                    Some(text) => {
                        self.buffer.push_str(&text);
                        if !flush_scheduled {
                            debounce.as_mut().reset(Instant::now() + self.config.debounce);
                            flush_scheduled = true;
                        }
                    }
                    None => break,
                },
                () = &mut debounce, if flush_scheduled => {
                    flush_scheduled = false;
                    self.flush().await;
                }
                _ = heartbeat.tick() => self.check_heartbeat(),
            }
        }

        self.flush().await;
        FlushStats {
            flushes: self.flushes,
            dropped_chunks: self.dropped_chunks,
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        // 发送前同步取走缓冲，之后的追加进入新缓冲
        let chunk = std::mem::take(&mut self.buffer);
        let handle = self.handle.as_ref();
        let text = chunk.as_str();
        let target = &self.target;

        let result = retry_with_backoff(
            &self.config.flush_retry,
            move |_| async move { handle.append(text).await.map_err(ErrorRecord::from) },
            |err| {
                if err.code() == ErrorCode::RateLimited {
                    RetryDecision::Retry
                } else {
                    RetryDecision::FailFast
                }
            },
            |attempt, _, delay| {
                tracing::debug!(
                    thread_ts = %target.thread_ts,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "stream append rate limited, backing off"
                );
            },
        )
        .await;

        match result {
            Ok(()) => {
                self.flushes += 1;
                self.last_flush = Instant::now();
            }
            Err(err) => {
                self.dropped_chunks += 1;
                tracing::warn!(
                    channel_id = %self.target.channel_id,
                    thread_ts = %self.target.thread_ts,
                    code = %err.code(),
                    retry_count = err.retry_count(),
                    dropped_chars = chunk.chars().count(),
                    "dropping stream chunk: {}",
                    err.message()
                );
            }
        }
    }

    fn check_heartbeat(&self) {
        let silent = self.last_flush.elapsed();
        if silent > self.config.heartbeat_threshold {
            tracing::warn!(
                channel_id = %self.target.channel_id,
                thread_ts = %self.target.thread_ts,
                silent_ms = silent.as_millis() as u64,
                buffered_chars = self.buffer.chars().count(),
                "stream heartbeat: no successful update within threshold"
            );
        }
    }
}
