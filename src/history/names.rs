//! 作者显示名缓存
//!
//! 显式构造、按引用传递的有界缓存（容量 + 过期时间），生命周期由持有者决定，不是进程级全局表。
//! 并发共享时只在读写缓存时加锁，远程查询不持锁。

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex;

/// 用户 ID → 显示名解析（如 Slack users.info）
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn display_name(&self, user_id: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
struct CachedName {
    name: String,
    cached_at: Instant,
}

/// 显示名缓存
#[derive(Debug, Clone)]
pub struct NameCache {
    entries: HashMap<String, CachedName>,
    ttl: Duration,
    capacity: usize,
}

impl NameCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// 未过期时返回缓存的显示名
    pub fn get(&self, user_id: &str) -> Option<&str> {
        self.entries.get(user_id).and_then(|c| {
            if c.cached_at.elapsed() < self.ttl {
                Some(c.name.as_str())
            } else {
                None
            }
        })
    }

    /// 写入缓存；满时淘汰最早写入的一条
    pub fn insert(&mut self, user_id: impl Into<String>, name: impl Into<String>) {
        let user_id = user_id.into();
        if !self.entries.contains_key(&user_id) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, c)| c.cached_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            user_id,
            CachedName {
                name: name.into(),
                cached_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for NameCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 500)
    }
}

/// 批量解析显示名：命中缓存直接取，未命中的在锁外并发查询，成功结果再写回缓存。
/// 查询失败的 ID 不出现在返回值中，由调用方回退为原始 ID。
pub async fn resolve_names<'a, I>(
    cache: &Mutex<NameCache>,
    resolver: &dyn NameResolver,
    user_ids: I,
) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut resolved = HashMap::new();
    let mut misses = Vec::new();
    {
        let cache = cache.lock().await;
        let mut seen = HashSet::new();
        for id in user_ids {
            if !seen.insert(id) {
                continue;
            }
            match cache.get(id) {
                Some(name) => {
                    resolved.insert(id.to_string(), name.to_string());
                }
                None => misses.push(id),
            }
        }
    }
    if misses.is_empty() {
        return resolved;
    }

    let lookups = join_all(misses.iter().map(|id| resolver.display_name(id))).await;
    let mut fetched = Vec::new();
    for (id, result) in misses.into_iter().zip(lookups) {
        match result {
            Ok(name) => fetched.push((id.to_string(), name)),
            Err(e) => tracing::debug!(user_id = id, "display name lookup failed: {:#}", e),
        }
    }

    let mut cache = cache.lock().await;
    for (id, name) in fetched {
        cache.insert(id.clone(), name.clone());
        resolved.insert(id, name);
    }
    resolved
}
