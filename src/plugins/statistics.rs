//! 插件执行统计
//!
//! 按 (插件, 版本) 累积。调用次数总是增加，执行时间和峰值内存只在成功时累计。
//! 版本无法解析的请求（NotFound / NotLoaded）记在该插件的无版本桶里。

use super::execution::ExecutionResult;
use crate::error::FailureKind;
use crate::types::PluginId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use semver::Version;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// 单个插件版本的统计记录
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsRecord {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    /// 成功调用的累计执行时间
    pub total_execution_time: Duration,
    /// 成功调用的峰值内存之和
    pub cumulative_peak_memory_bytes: u64,
    pub failures_by_kind: BTreeMap<FailureKind, u64>,
    pub last_invoked_at: Option<DateTime<Utc>>,
}

impl StatisticsRecord {
    /// 成功调用的平均执行时间
    pub fn average_execution_time(&self) -> Option<Duration> {
        if self.successes == 0 {
            return None;
        }
        let divisor = u32::try_from(self.successes).unwrap_or(u32::MAX);
        Some(self.total_execution_time / divisor)
    }

    fn apply(&mut self, result: &ExecutionResult) {
        self.invocations += 1;
        self.last_invoked_at = Some(Utc::now());
        match result.failure_kind() {
            None => {
                self.successes += 1;
                if result.cache_hit() {
                    self.cache_hits += 1;
                }
                self.total_execution_time += result.usage.elapsed;
                self.cumulative_peak_memory_bytes += result.usage.peak_memory_bytes as u64;
            }
            Some(kind) => {
                self.failures += 1;
                *self.failures_by_kind.entry(kind).or_insert(0) += 1;
            }
        }
    }
}

/// 某个版本的统计快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionStatistics {
    pub plugin_id: PluginId,
    /// `None` 为版本无法解析的请求
    pub version: Option<Version>,
    pub record: StatisticsRecord,
}

type StatisticsKey = (PluginId, Option<Version>);

/// 统计簿
#[derive(Debug, Default)]
pub struct StatisticsBook {
    records: DashMap<StatisticsKey, StatisticsRecord>,
}

impl StatisticsBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次执行结果；更新在分片锁内完成，不会丢失
    pub fn record(&self, result: &ExecutionResult) {
        let key = (result.plugin_id.clone(), result.version.clone());
        self.records.entry(key).or_default().apply(result);
    }

    /// 某插件所有版本的统计，按版本排序（无版本桶在前）
    pub fn for_plugin(&self, plugin_id: &str) -> Vec<VersionStatistics> {
        let mut stats: Vec<VersionStatistics> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == plugin_id)
            .map(|entry| VersionStatistics {
                plugin_id: entry.key().0.clone(),
                version: entry.key().1.clone(),
                record: entry.value().clone(),
            })
            .collect();
        stats.sort_by(|a, b| a.version.cmp(&b.version));
        stats
    }

    pub fn for_version(&self, plugin_id: &str, version: &Version) -> Option<StatisticsRecord> {
        self.records
            .get(&(plugin_id.to_string(), Some(version.clone())))
            .map(|entry| entry.value().clone())
    }

    /// 汇总某插件所有版本
    pub fn totals(&self, plugin_id: &str) -> StatisticsRecord {
        let mut total = StatisticsRecord::default();
        for stats in self.for_plugin(plugin_id) {
            let record = stats.record;
            total.invocations += record.invocations;
            total.successes += record.successes;
            total.failures += record.failures;
            total.cache_hits += record.cache_hits;
            total.total_execution_time += record.total_execution_time;
            total.cumulative_peak_memory_bytes += record.cumulative_peak_memory_bytes;
            for (kind, count) in record.failures_by_kind {
                *total.failures_by_kind.entry(kind).or_insert(0) += count;
            }
            total.last_invoked_at = total.last_invoked_at.max(record.last_invoked_at);
        }
        total
    }

    /// 清空统计；`plugin_id` 为 `None` 时清空全部
    pub fn clear(&self, plugin_id: Option<&str>) {
        match plugin_id {
            Some(id) => self.records.retain(|key, _| key.0 != id),
            None => self.records.clear(),
        }
    }

    pub fn tracked_plugins(&self) -> Vec<PluginId> {
        let mut ids: Vec<PluginId> = self.records.iter().map(|entry| entry.key().0.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
