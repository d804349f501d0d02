//! 分页历史来源抽象
//!
//! 拉模式：每次调用给出单页上限（受来源自身上限约束）与可选游标，返回从旧到新的一页消息与下一页游标；
//! 游标缺失即分页结束。

use async_trait::async_trait;

use crate::history::{ThreadMessage, ThreadRef};

/// 单页结果
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<ThreadMessage>,
    pub next_cursor: Option<String>,
}

/// 分页历史来源（Slack conversations.replies、测试桩等）
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// 来源允许的单次最大条数
    fn max_page_size(&self) -> usize;

    async fn fetch_page(
        &self,
        thread: &ThreadRef,
        limit: usize,
        cursor: Option<&str>,
    ) -> anyhow::Result<HistoryPage>;
}

/// 内存历史来源：游标为下一页起始下标，供本地运行与测试使用
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    messages: Vec<ThreadMessage>,
    max_page_size: usize,
}

impl InMemoryHistory {
    pub fn new(messages: Vec<ThreadMessage>) -> Self {
        Self {
            messages,
            max_page_size: 1000,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub fn push(&mut self, message: ThreadMessage) {
        self.messages.push(message);
    }
}

#[async_trait]
impl HistorySource for InMemoryHistory {
    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    async fn fetch_page(
        &self,
        _thread: &ThreadRef,
        limit: usize,
        cursor: Option<&str>,
    ) -> anyhow::Result<HistoryPage> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("invalid cursor: {c}"))?,
            None => 0,
        };
        let end = (start + limit.min(self.max_page_size)).min(self.messages.len());
        let messages = self.messages.get(start..end).unwrap_or_default().to_vec();
        let next_cursor = (end < self.messages.len()).then(|| end.to_string());
        Ok(HistoryPage {
            messages,
            next_cursor,
        })
    }
}
