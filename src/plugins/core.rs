//! 插件系统核心特征定义
//!
//! 插件以 trait 对象的形式由注册表的版本表持有。每次 load/reload 产生一个新的
//! 不可变 [`PluginBinding`]，正在执行的调用持有它们开始时拿到的那个 `Arc`。

use super::manifest::{Manifest, ResolvedConfig};
use crate::alignment::{AlignmentEngine, AlignmentObserver};
use crate::cache::ResultCache;
use crate::core::{MemoryReservation, MemoryTracker};
use crate::error::{PluginFault, SandboxError};
use crate::types::{PluginId, PluginInputs, PluginOutput};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use semver::Version;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 核心插件特征 - 所有插件必须实现
///
/// `execute` 运行在独立的阻塞任务上，应当周期性检查
/// [`ExecutionContext::is_cancelled`] 以便超时后尽快退出。
#[cfg_attr(test, mockall::automock)]
pub trait Plugin: Send + Sync {
    /// 插件清单
    fn manifest(&self) -> &Manifest;

    /// 输入预检，返回 `false` 时不会提交任何资源
    fn validate_inputs(&self, inputs: &PluginInputs) -> bool;

    /// 执行计算
    fn execute(&self, inputs: &PluginInputs, ctx: &ExecutionContext) -> Result<PluginOutput, PluginFault>;
}

/// 入口点工厂 - 把清单绑定到代码
pub trait PluginFactory: Send + Sync {
    fn create(&self, manifest: &Manifest) -> Result<Arc<dyn Plugin>, String>;
}

impl<F> PluginFactory for F
where
    F: Fn(&Manifest) -> Result<Arc<dyn Plugin>, String> + Send + Sync,
{
    fn create(&self, manifest: &Manifest) -> Result<Arc<dyn Plugin>, String> {
        self(manifest)
    }
}

/// 已绑定的插件实例
pub struct PluginBinding {
    pub manifest: Arc<Manifest>,
    pub plugin: Arc<dyn Plugin>,
    /// 绑定代次，每次 load/reload 递增
    pub generation: u64,
    pub bound_at: DateTime<Utc>,
}

impl PluginBinding {
    pub fn new(manifest: Manifest, plugin: Arc<dyn Plugin>, generation: u64) -> Self {
        Self {
            manifest: Arc::new(manifest),
            plugin,
            generation,
            bound_at: Utc::now(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &Version {
        &self.manifest.version
    }
}

impl fmt::Debug for PluginBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBinding")
            .field("plugin", &self.manifest.key())
            .field("generation", &self.generation)
            .field("bound_at", &self.bound_at)
            .finish()
    }
}

/// 插件运行时上下文
///
/// 提供合并后的配置、内存记账、协作式取消、进度上报和共享结果缓存。
pub struct ExecutionContext {
    request_id: Uuid,
    plugin_id: PluginId,
    version: Version,
    config: ResolvedConfig,
    memory: Arc<MemoryTracker>,
    cancellation: CancellationToken,
    progress: AtomicU64,
    notes: Mutex<Vec<String>>,
    cache: Option<Arc<ResultCache>>,
    cache_hit: AtomicBool,
}

impl ExecutionContext {
    pub fn new(
        request_id: Uuid,
        plugin_id: impl Into<PluginId>,
        version: Version,
        config: ResolvedConfig,
        memory_ceiling: Option<usize>,
    ) -> Self {
        Self {
            request_id,
            plugin_id: plugin_id.into(),
            version,
            config,
            memory: Arc::new(MemoryTracker::new(memory_ceiling)),
            cancellation: CancellationToken::new(),
            progress: AtomicU64::new(0f64.to_bits()),
            notes: Mutex::new(Vec::new()),
            cache: None,
            cache_hit: AtomicBool::new(false),
        }
    }

    /// 附加共享结果缓存
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    /// 申报工作内存
    pub fn reserve(&self, bytes: usize) -> Result<MemoryReservation<'_>, SandboxError> {
        self.memory.reserve(bytes)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 上报进度，取值被截断到 [0, 1]
    pub fn report_progress(&self, fraction: f64) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.progress.store(fraction.to_bits(), Ordering::Release);
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Acquire))
    }

    /// 记录诊断信息
    pub fn note(&self, message: impl Into<String>) {
        self.notes.lock().push(message.into());
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// 标记结果来自缓存
    pub fn mark_cache_hit(&self) {
        self.cache_hit.store(true, Ordering::Release);
    }

    pub fn cache_hit(&self) -> bool {
        self.cache_hit.load(Ordering::Acquire)
    }

    /// 共享此上下文缓存的对齐引擎
    pub fn alignment_engine(&self) -> AlignmentEngine {
        match &self.cache {
            Some(cache) => AlignmentEngine::with_cache(Arc::clone(cache)),
            None => AlignmentEngine::new(),
        }
    }
}

impl AlignmentObserver for ExecutionContext {
    fn should_stop(&self) -> bool {
        self.is_cancelled()
    }

    fn on_progress(&self, fraction: f64) {
        self.report_progress(fraction);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("plugin_id", &self.plugin_id)
            .field("version", &self.version)
            .field("progress", &self.progress())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(ceiling: Option<usize>) -> ExecutionContext {
        ExecutionContext::new(
            Uuid::new_v4(),
            "sampler",
            Version::new(1, 0, 0),
            ResolvedConfig::default(),
            ceiling,
        )
    }

    #[test]
    fn test_progress_is_clamped() {
        let ctx = context(None);
        assert_eq!(ctx.progress(), 0.0);
        ctx.report_progress(0.25);
        assert_eq!(ctx.progress(), 0.25);
        ctx.report_progress(4.0);
        assert_eq!(ctx.progress(), 1.0);
        ctx.report_progress(f64::NAN);
        assert_eq!(ctx.progress(), 0.0);
    }

    #[test]
    fn test_cancellation_is_observable() {
        let ctx = context(None);
        assert!(!ctx.should_stop());
        ctx.cancellation_token().cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.should_stop());
    }

    #[test]
    fn test_notes_and_memory() {
        let ctx = context(Some(64));
        ctx.note("started");
        assert_eq!(ctx.notes(), vec!["started".to_string()]);
        assert!(ctx.reserve(32).is_ok());
        assert!(ctx.reserve(128).is_err());
        assert_eq!(ctx.memory().peak(), 128);
    }

    #[test]
    fn test_engine_shares_context_cache() {
        let cache = Arc::new(ResultCache::new(4));
        let ctx = context(None).with_cache(Arc::clone(&cache));
        assert!(ctx.alignment_engine().cache().is_some());
        assert!(context(None).alignment_engine().cache().is_none());
    }
}
