//! 结果缓存
//!
//! 容量有界的LRU存储。`get` 和 `put` 都会刷新最近使用顺序，
//! 锁只在一次查找或修改期间持有。

pub mod fingerprint;

pub use fingerprint::{canonical_float, Fingerprint, FingerprintBuilder, Fingerprintable};

use crate::alignment::DtwResult;
use crate::types::PluginOutput;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// 命中率，没有查询时为 0
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct StoreInner<K: Hash + Eq, V> {
    entries: Option<LruCache<K, V>>,
    stats: CacheStats,
}

/// 线程安全的LRU存储
///
/// 容量为 0 时存储被禁用：`put` 直接丢弃，`get` 总是未命中。
pub struct LruStore<K: Hash + Eq, V> {
    inner: Mutex<StoreInner<K, V>>,
    capacity: usize,
}

impl<K, V> LruStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: NonZeroUsize::new(capacity).map(LruCache::new),
                stats: CacheStats {
                    capacity,
                    ..CacheStats::default()
                },
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// 查找并刷新最近使用顺序
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let found = inner.entries.as_mut().and_then(|cache| cache.get(key).cloned());
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    /// 查找但不影响淘汰顺序，也不计入统计
    pub fn peek(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        inner.entries.as_ref().and_then(|cache| cache.peek(key).cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        inner.entries.as_ref().map_or(false, |cache| cache.contains(key))
    }

    /// 插入或替换，必要时淘汰最久未使用的条目
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let StoreInner { entries, stats } = &mut *inner;
        let Some(cache) = entries.as_mut() else {
            return;
        };

        let replacing = cache.contains(&key);
        let displaced = cache.push(key, value);
        stats.insertions += 1;
        if !replacing && displaced.is_some() {
            stats.evictions += 1;
            debug!("LRU store evicted an entry (capacity {})", self.capacity);
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.entries.as_mut().and_then(|cache| cache.pop(key))
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.entries.as_ref().map_or(0, |cache| cache.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前键，最近使用的在前
    pub fn keys(&self) -> Vec<K> {
        let inner = self.inner.lock();
        inner
            .entries
            .as_ref()
            .map(|cache| cache.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    /// 清空条目，累计统计保留
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if let Some(cache) = inner.entries.as_mut() {
            cache.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            len: inner.entries.as_ref().map_or(0, |cache| cache.len()),
            ..inner.stats
        }
    }
}

/// 结果缓存中的值
#[derive(Debug, Clone)]
pub enum CachedValue {
    Alignment(Arc<DtwResult>),
    Output(Arc<PluginOutput>),
}

/// 平台结果缓存
pub type ResultCache = LruStore<Fingerprint, CachedValue>;
