//! 线程历史窗口：分页拉取 + 条数 / 字符数双上限裁剪
//!
//! 每压入一条消息后依次执行两条 FIFO 淘汰规则：
//! 1. 条数超过 keep_last_n 时淘汰最旧消息；
//! 2. 字符总数超过 max_chars 时淘汰最旧消息。
//!
//! 拉取结束后丢弃最后一条（触发本次请求的消息，调用方已持有其文本）。
//! 来源出错或翻页达到上限时不向上传播：记录一次结构化错误日志，返回空窗口。
//! 翻页按时间正序进行，达到上限时手里只有最旧的消息，不能当作最近窗口使用。

use std::collections::VecDeque;

use crate::history::{HistorySource, ThreadMessage, ThreadRef};

/// 约 4 字符 ≈ 1 token
pub const CHARS_PER_TOKEN: usize = 4;

/// 窗口参数；page_size（单次拉取条数）与 keep_last_n（窗口保留条数）是两个独立设置
#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub page_size: usize,
    pub max_chars: usize,
    pub keep_last_n: usize,
    /// 分页次数上限，防止来源游标异常导致无限翻页
    pub max_pages: usize,
    /// 请求关联 ID，仅用于日志
    pub correlation_id: Option<String>,
}

impl WindowOptions {
    /// 以 token 预算设置字符上限
    pub fn with_token_budget(mut self, tokens: usize) -> Self {
        self.max_chars = tokens.saturating_mul(CHARS_PER_TOKEN);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_chars: 16_000,
            keep_last_n: 50,
            max_pages: 100,
            correlation_id: None,
        }
    }
}

/// 有界消息窗口：维护字符总数，压入后按两条规则淘汰最旧消息
#[derive(Debug, Clone)]
pub struct MessageWindow {
    messages: VecDeque<ThreadMessage>,
    total_chars: usize,
    max_chars: usize,
    keep_last_n: usize,
}

impl MessageWindow {
    pub fn new(max_chars: usize, keep_last_n: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            total_chars: 0,
            max_chars,
            keep_last_n,
        }
    }

    /// 压入一条消息，返回因字符预算（规则 2）淘汰的条数
    pub fn push(&mut self, message: ThreadMessage) -> usize {
        self.total_chars += message.char_len();
        self.messages.push_back(message);

        while self.messages.len() > self.keep_last_n {
            self.evict_oldest();
        }

        let mut evicted_for_budget = 0;
        while self.total_chars > self.max_chars {
            if !self.evict_oldest() {
                break;
            }
            evicted_for_budget += 1;
        }
        evicted_for_budget
    }

    fn evict_oldest(&mut self) -> bool {
        match self.messages.pop_front() {
            Some(old) => {
                self.total_chars -= old.char_len();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    pub fn into_vec(self) -> Vec<ThreadMessage> {
        self.messages.into()
    }
}

/// 纯裁剪：对已有序列套用双上限；对自身输出幂等
pub fn window_messages<I>(messages: I, max_chars: usize, keep_last_n: usize) -> Vec<ThreadMessage>
where
    I: IntoIterator<Item = ThreadMessage>,
{
    let mut window = MessageWindow::new(max_chars, keep_last_n);
    for message in messages {
        window.push(message);
    }
    window.into_vec()
}

/// 拉取线程历史并裁剪为窗口（不含触发消息）；任何来源错误都降级为空窗口
pub async fn fetch_window(
    source: &dyn HistorySource,
    thread: &ThreadRef,
    options: &WindowOptions,
) -> Vec<ThreadMessage> {
    let limit = options.page_size.min(source.max_page_size()).max(1);
    let mut window = MessageWindow::new(options.max_chars, options.keep_last_n);
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;
    let mut budget_logged = false;

    loop {
        let page = match source.fetch_page(thread, limit, cursor.as_deref()).await {
            Ok(page) => page,
            Err(err) => {
                tracing::error!(
                    correlation_id = ?options.correlation_id,
                    channel_id = %thread.channel_id,
                    thread_ts = %thread.thread_ts,
                    pages_fetched = pages,
                    error = %format!("{err:#}"),
                    "failed to fetch thread history, continuing without context"
                );
                return Vec::new();
            }
        };
        pages += 1;

        for message in page.messages {
            let evicted = window.push(message);
            if evicted > 0 && !budget_logged {
                budget_logged = true;
                tracing::info!(
                    correlation_id = ?options.correlation_id,
                    thread_ts = %thread.thread_ts,
                    max_chars = options.max_chars,
                    "history exceeds character budget, evicting oldest messages"
                );
            }
        }

        cursor = page.next_cursor.filter(|c| !c.is_empty());
        if cursor.is_none() {
            break;
        }
        if pages >= options.max_pages {
            tracing::error!(
                correlation_id = ?options.correlation_id,
                channel_id = %thread.channel_id,
                thread_ts = %thread.thread_ts,
                pages,
                page_size = limit,
                "history pagination hit page limit before reaching the latest message, continuing without context"
            );
            return Vec::new();
        }
    }

    let mut messages = window.into_vec();
    messages.pop();

    tracing::debug!(
        correlation_id = ?options.correlation_id,
        thread_ts = %thread.thread_ts,
        pages,
        kept = messages.len(),
        "history window built"
    );
    messages
}
