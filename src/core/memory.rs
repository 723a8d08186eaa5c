//! 内存记账
//!
//! 插件在分配大块工作内存之前通过 [`MemoryTracker::reserve`] 申报，
//! 守卫对象在 Drop 时归还。沙箱在执行结束后读取峰值并与上限比较。

use crate::error::SandboxError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 单次执行的内存记账器
#[derive(Debug, Default)]
pub struct MemoryTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    ceiling: Option<usize>,
}

impl MemoryTracker {
    /// 创建记账器，`ceiling` 为 `None` 表示不设上限
    pub fn new(ceiling: Option<usize>) -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> Option<usize> {
        self.ceiling
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// 申报 `bytes` 字节
    ///
    /// 超过上限时返回 `MemoryExceeded`，但尝试值仍计入峰值。
    pub fn reserve(&self, bytes: usize) -> Result<MemoryReservation<'_>, SandboxError> {
        let attempted = self.current.fetch_add(bytes, Ordering::AcqRel).saturating_add(bytes);
        self.peak.fetch_max(attempted, Ordering::AcqRel);

        if let Some(ceiling) = self.ceiling {
            if attempted > ceiling {
                self.current.fetch_sub(bytes, Ordering::AcqRel);
                return Err(SandboxError::MemoryExceeded {
                    peak_bytes: attempted,
                    ceiling_bytes: ceiling,
                });
            }
        }

        Ok(MemoryReservation {
            tracker: self,
            bytes,
        })
    }

    /// 记录一次性使用量（无需守卫）
    pub fn record(&self, bytes: usize) {
        let current = self.current();
        self.peak.fetch_max(current.saturating_add(bytes), Ordering::AcqRel);
    }

    /// 峰值是否超过上限
    pub fn exceeded(&self) -> Option<SandboxError> {
        let ceiling = self.ceiling?;
        let peak = self.peak();
        (peak > ceiling).then_some(SandboxError::MemoryExceeded {
            peak_bytes: peak,
            ceiling_bytes: ceiling,
        })
    }
}

/// 内存申报守卫
#[derive(Debug)]
pub struct MemoryReservation<'a> {
    tracker: &'a MemoryTracker,
    bytes: usize,
}

impl MemoryReservation<'_> {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryReservation<'_> {
    fn drop(&mut self) {
        self.tracker.current.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}
