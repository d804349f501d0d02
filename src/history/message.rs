//! 线程消息与线程定位

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 线程内单条消息（由外部平台产生，只读，按时间从旧到新排列）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub author_id: String,
    pub text: String,
    /// 平台消息 ID（Slack 的 ts，形如 "1712345678.000100"）
    pub ts: String,
    /// 机器人 / 集成发出的消息
    pub is_automated: bool,
}

impl ThreadMessage {
    pub fn new(author_id: impl Into<String>, text: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            text: text.into(),
            ts: ts.into(),
            is_automated: false,
        }
    }

    pub fn automated(author_id: impl Into<String>, text: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            is_automated: true,
            ..Self::new(author_id, text, ts)
        }
    }

    /// 字符数（Unicode 标量个数，而非字节数）
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// 将 ts 解析为 UTC 时间；格式不符时返回 None
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let (secs, frac) = self.ts.split_once('.').unwrap_or((self.ts.as_str(), "0"));
        let secs: i64 = secs.parse().ok()?;
        let micros: u32 = format!("{:0<6}", frac).get(..6)?.parse().ok()?;
        DateTime::from_timestamp(secs, micros * 1_000)
    }
}

/// 线程定位：频道 + 线程根消息 ts
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef {
    pub channel_id: String,
    pub thread_ts: String,
}

impl ThreadRef {
    pub fn new(channel_id: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
        }
    }
}
