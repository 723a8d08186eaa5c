//! 插件注册表
//!
//! 负责插件发现、清单校验、版本解析、生命周期（load / reload / unload）管理，
//! 并把执行请求路由到沙箱。注册表拥有结果缓存和统计簿。
//!
//! 每个版本的状态机：
//! `Discovered → Validated → Loaded → Active | Inactive → Unloaded`。
//! 同一插件最多一个版本处于 `Active`。
//!
//! 版本表由一把读写锁保护，锁只在一次查找或修改期间持有，从不跨越执行。
//! 执行开始时在读锁内增加该版本的在途计数，`unload` 在写锁内检查在途计数，
//! 因此二者互斥。同一插件的 `load` 由按插件划分的装载锁串行化。

use super::builtin::{dtw_manifest, DtwPluginFactory, DTW_ENTRY_POINT};
use super::core::{PluginBinding, PluginFactory};
use super::execution::{ExecutionRequest, ExecutionResult, ResourceUsage};
use super::manifest::{self, merge_config, validate_compatibility, Manifest, ManifestFormat, BUNDLE_FILE_NAMES};
use super::sandbox::{CapabilityPolicy, Sandbox, SandboxLimits};
use super::statistics::{StatisticsBook, StatisticsRecord, VersionStatistics};
use crate::cache::{CacheStats, CachedValue, Fingerprint, FingerprintBuilder, ResultCache};
use crate::core::{EventBus, RegistryEvent};
use crate::error::{ManifestError, RegistryError};
use crate::types::PluginId;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// 插件版本状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    /// 清单已解析
    Discovered,
    /// 通过核心版本兼容检查
    Validated,
    /// 入口点已绑定
    Loaded,
    /// 接收未指定版本的请求
    Active,
    /// 已绑定但不是活跃版本
    Inactive,
    /// 绑定已释放
    Unloaded,
}

impl VersionState {
    fn is_bound(self) -> bool {
        matches!(self, VersionState::Loaded | VersionState::Active | VersionState::Inactive)
    }
}

/// 清单来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BundleSource {
    /// 磁盘上的插件包
    Directory { manifest_path: PathBuf },
    /// 程序内注册
    Embedded,
}

/// 注册表配置
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub core_version: Version,
    pub cache_capacity: usize,
    pub default_timeout: Duration,
    pub default_memory_ceiling: Option<usize>,
    pub max_concurrent_executions: usize,
    pub policy: CapabilityPolicy,
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            core_version: crate::core_version(),
            cache_capacity: 256,
            default_timeout: Duration::from_secs(30),
            default_memory_ceiling: Some(512 * 1024 * 1024),
            max_concurrent_executions: num_cpus::get().max(1),
            policy: CapabilityPolicy::allow_all(),
            event_capacity: 256,
        }
    }
}

/// 单次发现中的失败包
#[derive(Debug, Clone)]
pub struct DiscoveryError {
    pub path: PathBuf,
    pub error: RegistryError,
}

/// 发现报告
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub discovered: Vec<(PluginId, Version)>,
    /// 来自同一清单文件且内容未变的已注册版本
    pub unchanged: Vec<(PluginId, Version)>,
    pub errors: Vec<DiscoveryError>,
}

/// 插件列表条目
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub id: PluginId,
    pub name: String,
    pub version: Version,
    pub state: VersionState,
    pub entry_point: String,
    pub produces: Vec<String>,
    pub requires: Vec<String>,
    pub source: BundleSource,
    pub generation: Option<u64>,
    pub in_flight: usize,
}

struct VersionSlot {
    manifest: Arc<Manifest>,
    source: BundleSource,
    state: VersionState,
    binding: Option<Arc<PluginBinding>>,
    in_flight: Arc<AtomicUsize>,
}

impl VersionSlot {
    fn new(manifest: Manifest, source: BundleSource) -> Self {
        Self {
            manifest: Arc::new(manifest),
            source,
            state: VersionState::Discovered,
            binding: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

type VersionTable = HashMap<PluginId, BTreeMap<Version, VersionSlot>>;

/// 单个插件包的扫描结果
enum BundleScan {
    Registered((PluginId, Version)),
    Unchanged((PluginId, Version)),
}

/// 在途执行计数守卫
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 插件注册表
pub struct PluginRegistry {
    config: RegistryConfig,
    versions: RwLock<VersionTable>,
    entry_points: RwLock<HashMap<String, Arc<dyn PluginFactory>>>,
    sandbox: Sandbox,
    cache: Arc<ResultCache>,
    statistics: StatisticsBook,
    events: EventBus,
    permits: Arc<Semaphore>,
    discovery_errors: Mutex<Vec<DiscoveryError>>,
    load_locks: DashMap<PluginId, Arc<Mutex<()>>>,
    generation: AtomicU64,
}

impl PluginRegistry {
    /// 创建空注册表
    pub fn new(config: RegistryConfig) -> Self {
        info!(
            "Creating plugin registry (core {}, cache capacity {}, {} concurrent executions)",
            config.core_version, config.cache_capacity, config.max_concurrent_executions
        );
        Self {
            sandbox: Sandbox::new(config.policy.clone()),
            cache: Arc::new(ResultCache::new(config.cache_capacity)),
            statistics: StatisticsBook::new(),
            events: EventBus::new(config.event_capacity),
            permits: Arc::new(Semaphore::new(config.max_concurrent_executions.max(1))),
            versions: RwLock::new(HashMap::new()),
            entry_points: RwLock::new(HashMap::new()),
            discovery_errors: Mutex::new(Vec::new()),
            load_locks: DashMap::new(),
            generation: AtomicU64::new(0),
            config,
        }
    }

    /// 创建注册表并装载内置DTW插件
    pub fn with_builtins(config: RegistryConfig) -> Result<Self, RegistryError> {
        let registry = Self::new(config);
        registry.register_entry_point(DTW_ENTRY_POINT, DtwPluginFactory);
        let manifest = dtw_manifest()?;
        let id = manifest.id.clone();
        registry.register_manifest(manifest)?;
        registry.load(&id, None)?;
        Ok(registry)
    }

    pub fn core_version(&self) -> &Version {
        &self.config.core_version
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 注册入口点工厂，同名覆盖
    pub fn register_entry_point(&self, name: impl Into<String>, factory: impl PluginFactory + 'static) {
        let name = name.into();
        debug!("Registered entry point '{}'", name);
        self.entry_points.write().insert(name, Arc::new(factory));
    }

    /// 注册没有磁盘插件包的清单
    pub fn register_manifest(&self, manifest: Manifest) -> Result<(), RegistryError> {
        self.insert_slot(manifest, BundleSource::Embedded)
    }

    fn insert_slot(&self, manifest: Manifest, source: BundleSource) -> Result<(), RegistryError> {
        let id = manifest.id.clone();
        let version = manifest.version.clone();
        {
            let mut table = self.versions.write();
            let slots = table.entry(id.clone()).or_default();
            if let Some(existing) = slots.get(&version) {
                if existing.state != VersionState::Unloaded {
                    return Err(RegistryError::AlreadyRegistered {
                        plugin_id: id,
                        version: version.to_string(),
                    });
                }
            }
            slots.insert(version.clone(), VersionSlot::new(manifest, source));
        }

        info!("Plugin '{}@{}' discovered", id, version);
        self.events.publish(RegistryEvent::Discovered {
            plugin_id: id,
            version,
        });
        Ok(())
    }

    /// 扫描根目录及其直接子目录中的插件包
    ///
    /// 格式错误的包记录为发现错误，扫描继续。
    pub async fn discover(&self, root: &Path) -> Result<DiscoveryReport, RegistryError> {
        let io_error = |path: &Path, e: std::io::Error| RegistryError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let mut bundle_dirs = vec![root.to_path_buf()];
        let mut entries = tokio::fs::read_dir(root).await.map_err(|e| io_error(root, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(root, e))? {
            let path = entry.path();
            if path.is_dir() {
                bundle_dirs.push(path);
            }
        }
        bundle_dirs[1..].sort();

        let mut report = DiscoveryReport::default();
        for dir in &bundle_dirs {
            let Some(manifest_path) = find_bundle_manifest(dir) else {
                continue;
            };

            match self.discover_bundle(&manifest_path).await {
                Ok(BundleScan::Registered(key)) => report.discovered.push(key),
                Ok(BundleScan::Unchanged(key)) => {
                    debug!("Bundle {:?} is already registered as {}@{}", manifest_path, key.0, key.1);
                    report.unchanged.push(key);
                }
                Err(error) => {
                    warn!("Failed to load plugin manifest from {:?}: {}", manifest_path, error);
                    self.events.publish(RegistryEvent::DiscoveryFailed {
                        path: manifest_path.display().to_string(),
                        reason: error.to_string(),
                    });
                    report.errors.push(DiscoveryError {
                        path: manifest_path,
                        error,
                    });
                }
            }
        }

        self.discovery_errors.lock().extend(report.errors.iter().cloned());
        info!(
            "Discovered {} plugin(s) under {:?} ({} unchanged, {} error(s))",
            report.discovered.len(),
            root,
            report.unchanged.len(),
            report.errors.len()
        );
        Ok(report)
    }

    async fn discover_bundle(&self, manifest_path: &Path) -> Result<BundleScan, RegistryError> {
        let manifest = read_manifest(manifest_path).await?;
        let key = (manifest.id.clone(), manifest.version.clone());
        let source = BundleSource::Directory {
            manifest_path: manifest_path.to_path_buf(),
        };

        let unchanged = self
            .versions
            .read()
            .get(&manifest.id)
            .and_then(|slots| slots.get(&manifest.version))
            .map_or(false, |slot| {
                slot.state != VersionState::Unloaded && slot.source == source && *slot.manifest == manifest
            });
        if unchanged {
            return Ok(BundleScan::Unchanged(key));
        }

        self.insert_slot(manifest, source)?;
        Ok(BundleScan::Registered(key))
    }

    /// 所有发现阶段累积的错误
    pub fn discovery_errors(&self) -> Vec<DiscoveryError> {
        self.discovery_errors.lock().clone()
    }

    /// 绑定入口点并装载版本
    ///
    /// 未指定版本时选择兼容当前核心的最高未绑定版本。
    /// 没有其他活跃版本时新版本直接成为活跃版本。
    pub fn load(&self, plugin_id: &str, version: Option<&Version>) -> Result<Version, RegistryError> {
        let load_lock = Arc::clone(self.load_locks.entry(plugin_id.to_string()).or_default().value());
        let _loading = load_lock.lock();

        let manifest = {
            let mut table = self.versions.write();
            let slots = table.get_mut(plugin_id).ok_or_else(|| not_found(plugin_id, version))?;
            let slot = match version {
                Some(v) => slots.get(v).ok_or_else(|| not_found(plugin_id, version))?,
                None => self.pick_loadable(plugin_id, slots)?,
            };
            if slot.state.is_bound() {
                return Ok(slot.manifest.version.clone());
            }
            if !validate_compatibility(&slot.manifest, &self.config.core_version) {
                return Err(RegistryError::IncompatibleCore {
                    plugin_id: plugin_id.to_string(),
                    version: slot.manifest.version.to_string(),
                    core_version: self.config.core_version.to_string(),
                });
            }
            let manifest = Arc::clone(&slot.manifest);
            if let Some(slot) = slots.get_mut(&manifest.version) {
                slot.state = VersionState::Validated;
            }
            manifest
        };
        let version = manifest.version.clone();

        let binding = self.bind(&manifest)?;
        let generation = binding.generation;

        let activated = {
            let mut table = self.versions.write();
            let slots = table
                .get_mut(plugin_id)
                .ok_or_else(|| not_found(plugin_id, Some(&version)))?;
            let has_active = slots
                .iter()
                .any(|(v, s)| v != &version && s.state == VersionState::Active);
            let slot = slots
                .get_mut(&version)
                .ok_or_else(|| not_found(plugin_id, Some(&version)))?;
            if slot.state.is_bound() {
                return Ok(version);
            }
            slot.binding = Some(binding);
            slot.state = if has_active {
                VersionState::Loaded
            } else {
                VersionState::Active
            };
            !has_active
        };

        info!("Plugin '{}@{}' loaded (generation {})", plugin_id, version, generation);
        self.events.publish(RegistryEvent::Loaded {
            plugin_id: plugin_id.to_string(),
            version: version.clone(),
        });
        if activated {
            self.publish_activated(plugin_id, &version);
        }
        Ok(version)
    }

    fn pick_loadable<'a>(&self, plugin_id: &str, slots: &'a BTreeMap<Version, VersionSlot>) -> Result<&'a VersionSlot, RegistryError> {
        if let Some(active) = slots.values().find(|s| s.state == VersionState::Active) {
            return Ok(active);
        }
        let unbound: Vec<&VersionSlot> = slots.values().rev().filter(|s| !s.state.is_bound()).collect();
        if let Some(slot) = unbound
            .iter()
            .copied()
            .find(|s| validate_compatibility(&s.manifest, &self.config.core_version))
        {
            return Ok(slot);
        }
        match unbound.first() {
            Some(newest) => Err(RegistryError::IncompatibleCore {
                plugin_id: plugin_id.to_string(),
                version: newest.manifest.version.to_string(),
                core_version: self.config.core_version.to_string(),
            }),
            None => slots
                .values()
                .next_back()
                .ok_or_else(|| not_found(plugin_id, None)),
        }
    }

    fn bind(&self, manifest: &Manifest) -> Result<Arc<PluginBinding>, RegistryError> {
        let factory = self
            .entry_points
            .read()
            .get(&manifest.entry_point)
            .cloned()
            .ok_or_else(|| RegistryError::EntryPointMissing {
                plugin_id: manifest.id.clone(),
                entry_point: manifest.entry_point.clone(),
            })?;

        let plugin = factory.create(manifest).map_err(|reason| RegistryError::BindFailed {
            plugin_id: manifest.id.clone(),
            reason,
        })?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(Arc::new(PluginBinding::new(manifest.clone(), plugin, generation)))
    }

    fn publish_activated(&self, plugin_id: &str, version: &Version) {
        info!("Plugin '{}@{}' is now active", plugin_id, version);
        self.events.publish(RegistryEvent::Activated {
            plugin_id: plugin_id.to_string(),
            version: version.clone(),
        });
    }

    /// 把已绑定的版本设为活跃版本
    pub fn activate(&self, plugin_id: &str, version: &Version) -> Result<(), RegistryError> {
        {
            let mut table = self.versions.write();
            let slots = table
                .get_mut(plugin_id)
                .ok_or_else(|| not_found(plugin_id, Some(version)))?;
            let target = slots.get(version).ok_or_else(|| not_found(plugin_id, Some(version)))?;
            if !target.state.is_bound() {
                return Err(RegistryError::NotLoaded {
                    plugin_id: plugin_id.to_string(),
                    version: version.to_string(),
                });
            }
            if target.state == VersionState::Active {
                return Ok(());
            }
            for slot in slots.values_mut() {
                if slot.state == VersionState::Active {
                    slot.state = VersionState::Inactive;
                }
            }
            if let Some(slot) = slots.get_mut(version) {
                slot.state = VersionState::Active;
            }
        }
        self.publish_activated(plugin_id, version);
        Ok(())
    }

    /// 重新解析清单并重新绑定入口点
    ///
    /// 正在执行的调用在旧绑定上完成，新的执行使用新绑定。清单版本改变时
    /// 新版本成为活跃版本，旧版本保留为 `Inactive`。
    pub async fn reload(&self, plugin_id: &str) -> Result<Version, RegistryError> {
        let (old_version, source, old_manifest) = {
            let table = self.versions.read();
            let slots = table.get(plugin_id).ok_or_else(|| not_found(plugin_id, None))?;
            let slot = slots
                .values()
                .find(|s| s.state == VersionState::Active)
                .ok_or_else(|| RegistryError::NotLoaded {
                    plugin_id: plugin_id.to_string(),
                    version: "active".to_string(),
                })?;
            (
                slot.manifest.version.clone(),
                slot.source.clone(),
                Arc::clone(&slot.manifest),
            )
        };

        let manifest = match &source {
            BundleSource::Directory { manifest_path } => read_manifest(manifest_path).await?,
            BundleSource::Embedded => (*old_manifest).clone(),
        };
        if manifest.id != plugin_id {
            return Err(RegistryError::Manifest(ManifestError::malformed(format!(
                "reloaded manifest changed id from '{}' to '{}'",
                plugin_id, manifest.id
            ))));
        }
        if !validate_compatibility(&manifest, &self.config.core_version) {
            return Err(RegistryError::IncompatibleCore {
                plugin_id: plugin_id.to_string(),
                version: manifest.version.to_string(),
                core_version: self.config.core_version.to_string(),
            });
        }

        let new_version = manifest.version.clone();
        let binding = self.bind(&manifest)?;
        let generation = binding.generation;

        {
            let mut table = self.versions.write();
            let slots = table
                .get_mut(plugin_id)
                .ok_or_else(|| not_found(plugin_id, None))?;

            if new_version == old_version {
                let slot = slots
                    .get_mut(&old_version)
                    .ok_or_else(|| not_found(plugin_id, Some(&old_version)))?;
                slot.manifest = Arc::clone(&binding.manifest);
                slot.binding = Some(binding);
            } else {
                if let Some(old) = slots.get_mut(&old_version) {
                    old.state = VersionState::Inactive;
                }
                let slot = slots
                    .entry(new_version.clone())
                    .or_insert_with(|| VersionSlot::new(manifest.clone(), source.clone()));
                slot.manifest = Arc::clone(&binding.manifest);
                slot.source = source.clone();
                slot.binding = Some(binding);
                slot.state = VersionState::Active;
            }
        }

        info!(
            "Plugin '{}' reloaded: {} -> {} (generation {})",
            plugin_id, old_version, new_version, generation
        );
        self.events.publish(RegistryEvent::Reloaded {
            plugin_id: plugin_id.to_string(),
            version: new_version.clone(),
            generation,
        });
        if new_version != old_version {
            self.publish_activated(plugin_id, &new_version);
        }
        Ok(new_version)
    }

    /// 卸载版本；该版本有执行在途时返回 `Busy`
    ///
    /// 卸载活跃版本后，最高的已绑定版本被提升为活跃版本。
    pub fn unload(&self, plugin_id: &str, version: Option<&Version>) -> Result<Version, RegistryError> {
        let (unloaded, promoted) = {
            let mut table = self.versions.write();
            let slots = table
                .get_mut(plugin_id)
                .ok_or_else(|| not_found(plugin_id, version))?;

            let target = match version {
                Some(v) => v.clone(),
                None => slots
                    .iter()
                    .find(|(_, s)| s.state == VersionState::Active)
                    .or_else(|| slots.iter().rev().find(|(_, s)| s.state.is_bound()))
                    .map(|(v, _)| v.clone())
                    .ok_or_else(|| RegistryError::NotLoaded {
                        plugin_id: plugin_id.to_string(),
                        version: "active".to_string(),
                    })?,
            };

            let slot = slots
                .get_mut(&target)
                .ok_or_else(|| not_found(plugin_id, Some(&target)))?;
            if !slot.state.is_bound() {
                return Err(RegistryError::NotLoaded {
                    plugin_id: plugin_id.to_string(),
                    version: target.to_string(),
                });
            }
            let in_flight = slot.in_flight.load(Ordering::Acquire);
            if in_flight > 0 {
                return Err(RegistryError::Busy {
                    plugin_id: plugin_id.to_string(),
                    version: target.to_string(),
                    in_flight,
                });
            }

            let was_active = slot.state == VersionState::Active;
            slot.state = VersionState::Unloaded;
            slot.binding = None;

            let promoted = if was_active {
                slots
                    .iter_mut()
                    .rev()
                    .find(|(_, s)| s.state.is_bound())
                    .map(|(v, s)| {
                        s.state = VersionState::Active;
                        v.clone()
                    })
            } else {
                None
            };
            (target, promoted)
        };

        info!("Plugin '{}@{}' unloaded", plugin_id, unloaded);
        self.events.publish(RegistryEvent::Unloaded {
            plugin_id: plugin_id.to_string(),
            version: unloaded.clone(),
        });
        if let Some(version) = promoted {
            self.publish_activated(plugin_id, &version);
        }
        Ok(unloaded)
    }

    /// 在读锁内解析目标版本并登记在途执行
    fn resolve(&self, request: &ExecutionRequest) -> Result<(Arc<PluginBinding>, InFlightGuard), RegistryError> {
        let table = self.versions.read();
        let plugin_id = request.plugin_id.as_str();
        let slots = table
            .get(plugin_id)
            .ok_or_else(|| not_found(plugin_id, request.version.as_ref()))?;

        let slot = match &request.version {
            Some(version) => slots
                .get(version)
                .ok_or_else(|| not_found(plugin_id, Some(version)))?,
            None => slots
                .values()
                .find(|s| s.state == VersionState::Active)
                .ok_or_else(|| RegistryError::NotLoaded {
                    plugin_id: plugin_id.to_string(),
                    version: "active".to_string(),
                })?,
        };

        let binding = match (&slot.binding, slot.state.is_bound()) {
            (Some(binding), true) => Arc::clone(binding),
            _ => {
                return Err(RegistryError::NotLoaded {
                    plugin_id: plugin_id.to_string(),
                    version: slot.manifest.version.to_string(),
                })
            }
        };
        slot.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok((binding, InFlightGuard(Arc::clone(&slot.in_flight))))
    }

    /// 执行请求
    ///
    /// 失败总是以执行结果的形式返回；无论结果如何都会记录统计。
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let span = info_span!(
            "execute",
            plugin_id = %request.plugin_id,
            request_id = %request.id,
            version = tracing::field::Empty
        );
        let result = self.execute_inner(&request, &span).instrument(span.clone()).await;

        self.statistics.record(&result);
        self.events.publish(RegistryEvent::ExecutionCompleted {
            request_id: result.request_id,
            plugin_id: result.plugin_id.clone(),
            version: result.version.clone(),
            success: result.is_success(),
            cache_hit: result.cache_hit(),
            elapsed_ms: result.usage.elapsed.as_millis().min(u64::MAX as u128) as u64,
        });

        let _entered = span.enter();
        match result.failure_info() {
            None => info!(
                "Execution succeeded in {:?} (peak {} bytes, cache hit: {})",
                result.usage.elapsed,
                result.usage.peak_memory_bytes,
                result.cache_hit()
            ),
            Some(failure) => warn!("Execution failed ({:?}): {}", failure.kind, failure.message),
        }
        result
    }

    async fn execute_inner(&self, request: &ExecutionRequest, span: &tracing::Span) -> ExecutionResult {
        let started = Instant::now();
        let _permit = self.permits.acquire().await.ok();

        let (binding, _in_flight) = match self.resolve(request) {
            Ok(resolved) => resolved,
            Err(error) => {
                let usage = ResourceUsage {
                    elapsed: started.elapsed(),
                    peak_memory_bytes: 0,
                };
                return ExecutionResult::failure(request, None, error, None, usage);
            }
        };
        let version = binding.version().clone();
        span.record("version", tracing::field::display(&version));

        let config = match merge_config(&binding.manifest.config_schema, &request.overrides) {
            Ok(config) => config,
            Err(error) => {
                let usage = ResourceUsage {
                    elapsed: started.elapsed(),
                    peak_memory_bytes: 0,
                };
                return ExecutionResult::failure(request, Some(version), error, None, usage);
            }
        };

        let memo_key = binding.manifest.cacheable.then(|| {
            let mut builder = FingerprintBuilder::new("output");
            builder
                .tag(&binding.manifest.id)
                .tag(&version.to_string())
                .feed(request.inputs.as_ref())
                .feed(&config);
            builder.finish()
        });
        if let Some(output) = memo_key.as_ref().and_then(|key| self.memoized(key)) {
            debug!("Serving memoized output");
            let usage = ResourceUsage {
                elapsed: started.elapsed(),
                peak_memory_bytes: 0,
            };
            return ExecutionResult::success(request, version, output, true, usage);
        }

        let limits = SandboxLimits {
            timeout: request.timeout.unwrap_or(self.config.default_timeout),
            memory_ceiling: request.memory_ceiling.or(self.config.default_memory_ceiling),
        };
        let result = self
            .sandbox
            .run(binding, request, config, limits, Some(Arc::clone(&self.cache)))
            .await;

        if let (Some(key), Some(output)) = (memo_key, result.output()) {
            self.cache.put(key, CachedValue::Output(Arc::clone(output)));
        }
        result
    }

    fn memoized(&self, key: &Fingerprint) -> Option<Arc<crate::types::PluginOutput>> {
        match self.cache.get(key) {
            Some(CachedValue::Output(output)) => Some(output),
            _ => None,
        }
    }

    /// 异步提交，返回完成通知句柄
    pub fn submit(self: &Arc<Self>, request: ExecutionRequest) -> JoinHandle<ExecutionResult> {
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.execute(request).await })
    }

    /// 并发执行一组请求，结果顺序与请求顺序一致
    pub async fn execute_all(&self, requests: Vec<ExecutionRequest>) -> Vec<ExecutionResult> {
        join_all(requests.into_iter().map(|request| self.execute(request))).await
    }

    /// 所有已知插件版本，按 id 和版本排序
    pub fn list_plugins(&self) -> Vec<PluginSummary> {
        let table = self.versions.read();
        let mut summaries: Vec<PluginSummary> = table
            .values()
            .flat_map(|slots| slots.values())
            .map(|slot| PluginSummary {
                id: slot.manifest.id.clone(),
                name: slot.manifest.name.clone(),
                version: slot.manifest.version.clone(),
                state: slot.state,
                entry_point: slot.manifest.entry_point.clone(),
                produces: slot.manifest.produces.clone(),
                requires: slot.manifest.requires.clone(),
                source: slot.source.clone(),
                generation: slot.binding.as_ref().map(|b| b.generation),
                in_flight: slot.in_flight.load(Ordering::Acquire),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.version.cmp(&b.version)));
        summaries
    }

    pub fn state_of(&self, plugin_id: &str, version: &Version) -> Option<VersionState> {
        self.versions
            .read()
            .get(plugin_id)
            .and_then(|slots| slots.get(version))
            .map(|slot| slot.state)
    }

    pub fn active_version(&self, plugin_id: &str) -> Option<Version> {
        self.versions.read().get(plugin_id).and_then(|slots| {
            slots
                .values()
                .find(|s| s.state == VersionState::Active)
                .map(|s| s.manifest.version.clone())
        })
    }

    /// 当前在途执行数
    pub fn in_flight(&self, plugin_id: &str, version: &Version) -> usize {
        self.versions
            .read()
            .get(plugin_id)
            .and_then(|slots| slots.get(version))
            .map_or(0, |slot| slot.in_flight.load(Ordering::Acquire))
    }

    /// 活跃版本来自磁盘插件包的清单路径，供热重载监控
    pub fn watched_bundles(&self) -> Vec<(PluginId, PathBuf)> {
        let table = self.versions.read();
        let mut watched: Vec<(PluginId, PathBuf)> = table
            .iter()
            .filter_map(|(id, slots)| {
                slots
                    .values()
                    .find(|s| s.state == VersionState::Active)
                    .and_then(|slot| match &slot.source {
                        BundleSource::Directory { manifest_path } => Some((id.clone(), manifest_path.clone())),
                        BundleSource::Embedded => None,
                    })
            })
            .collect();
        watched.sort();
        watched
    }

    pub fn get_statistics(&self, plugin_id: &str) -> Vec<VersionStatistics> {
        self.statistics.for_plugin(plugin_id)
    }

    pub fn get_version_statistics(&self, plugin_id: &str, version: &Version) -> Option<StatisticsRecord> {
        self.statistics.for_version(plugin_id, version)
    }

    pub fn clear_statistics(&self, plugin_id: Option<&str>) {
        self.statistics.clear(plugin_id);
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

fn not_found(plugin_id: &str, version: Option<&Version>) -> RegistryError {
    RegistryError::NotFound {
        plugin_id: plugin_id.to_string(),
        version: version.map(|v| v.to_string()),
    }
}

fn find_bundle_manifest(dir: &Path) -> Option<PathBuf> {
    BUNDLE_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

async fn read_manifest(path: &Path) -> Result<Manifest, RegistryError> {
    let format = ManifestFormat::from_path(path)?;
    let descriptor = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(manifest::parse(&descriptor, format)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionError, FailureKind, PluginFault};
    use crate::plugins::core::{ExecutionContext, Plugin};
    use crate::types::{InputValue, OutputValue, PluginInputs, PluginOutput, Series};
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn manifest(id: &str, version: &str, entry_point: &str) -> Manifest {
        manifest_with(id, version, entry_point, json!({}), false)
    }

    fn manifest_with(id: &str, version: &str, entry_point: &str, schema: serde_json::Value, cacheable: bool) -> Manifest {
        let descriptor = json!({
            "id": id,
            "version": version,
            "core": {"min": "0.1.0", "max": "1.0.0"},
            "produces": ["scalar"],
            "entry_point": entry_point,
            "config_schema": schema,
            "cacheable": cacheable
        });
        manifest::parse(&descriptor.to_string(), ManifestFormat::Json).unwrap()
    }

    /// 返回清单版本主号的插件
    struct VersionEcho {
        manifest: Manifest,
        calls: Arc<AtomicUsize>,
    }

    impl Plugin for VersionEcho {
        fn manifest(&self) -> &Manifest {
            &self.manifest
        }

        fn validate_inputs(&self, _inputs: &PluginInputs) -> bool {
            true
        }

        fn execute(&self, _inputs: &PluginInputs, ctx: &ExecutionContext) -> Result<PluginOutput, PluginFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bonus = ctx.config().get("bonus").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(PluginOutput::new(
                "scalar",
                OutputValue::Scalar(self.manifest.version.major as f64 * 10.0 + self.manifest.version.minor as f64 + bonus),
            ))
        }
    }

    /// 等待闸门打开才返回的插件
    struct Gated {
        manifest: Manifest,
        open: Arc<AtomicBool>,
        entered: Arc<AtomicBool>,
    }

    impl Plugin for Gated {
        fn manifest(&self) -> &Manifest {
            &self.manifest
        }

        fn validate_inputs(&self, _inputs: &PluginInputs) -> bool {
            true
        }

        fn execute(&self, _inputs: &PluginInputs, ctx: &ExecutionContext) -> Result<PluginOutput, PluginFault> {
            self.entered.store(true, Ordering::SeqCst);
            while !self.open.load(Ordering::SeqCst) && !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(PluginOutput::new("scalar", OutputValue::Scalar(1.0)))
        }
    }

    fn echo_registry(calls: Arc<AtomicUsize>) -> PluginRegistry {
        let registry = PluginRegistry::new(RegistryConfig::default());
        registry.register_entry_point("test:echo", move |manifest: &Manifest| -> Result<Arc<dyn Plugin>, String> {
            Ok(Arc::new(VersionEcho {
                manifest: manifest.clone(),
                calls: Arc::clone(&calls),
            }) as Arc<dyn Plugin>)
        });
        registry
    }

    fn request(id: &str) -> ExecutionRequest {
        ExecutionRequest::new(id, PluginInputs::new())
    }

    fn scalar_of(result: &ExecutionResult) -> f64 {
        match &result.output().unwrap().value {
            OutputValue::Scalar(value) => *value,
            other => panic!("unexpected output {:?}", other),
        }
    }

    async fn wait_for(flag: &AtomicBool) {
        for _ in 0..500 {
            if flag.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition was never reached");
    }

    #[tokio::test]
    async fn test_load_promotes_first_version_to_active() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        registry.register_manifest(manifest("echo", "0.1.0", "test:echo")).unwrap();
        registry.register_manifest(manifest("echo", "0.2.0", "test:echo")).unwrap();

        let v2 = Version::new(0, 2, 0);
        assert_eq!(registry.state_of("echo", &v2), Some(VersionState::Discovered));

        assert_eq!(registry.load("echo", None).unwrap(), v2);
        assert_eq!(registry.state_of("echo", &v2), Some(VersionState::Active));

        let v1 = Version::new(0, 1, 0);
        registry.load("echo", Some(&v1)).unwrap();
        assert_eq!(registry.state_of("echo", &v1), Some(VersionState::Loaded));

        let result = registry.execute(request("echo")).await;
        assert_eq!(scalar_of(&result), 2.0);

        let explicit = registry.execute(request("echo").with_version(v1.clone())).await;
        assert_eq!(scalar_of(&explicit), 1.0);
        assert_eq!(explicit.version, Some(v1));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        registry.register_manifest(manifest("echo", "0.1.0", "test:echo")).unwrap();
        let err = registry
            .register_manifest(manifest("echo", "0.1.0", "test:echo"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn test_load_errors() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));

        let mut too_new = manifest("future", "2.0.0", "test:echo");
        too_new.core.min = Version::new(5, 0, 0);
        too_new.core.max = None;
        registry.register_manifest(too_new).unwrap();
        assert!(matches!(
            registry.load("future", None).unwrap_err(),
            RegistryError::IncompatibleCore { .. }
        ));

        registry.register_manifest(manifest("ghost", "0.1.0", "test:missing")).unwrap();
        assert_eq!(
            registry.load("ghost", None).unwrap_err(),
            RegistryError::EntryPointMissing {
                plugin_id: "ghost".to_string(),
                entry_point: "test:missing".to_string()
            }
        );
        assert_eq!(
            registry.state_of("ghost", &Version::new(0, 1, 0)),
            Some(VersionState::Validated)
        );

        assert!(matches!(
            registry.load("nobody", None).unwrap_err(),
            RegistryError::NotFound { .. }
        ));
    }

    #[test]
    fn test_overlapping_loads_leave_one_active_version() {
        let registry = Arc::new(PluginRegistry::new(RegistryConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = Arc::clone(&calls);
        registry.register_entry_point("test:slow", move |manifest: &Manifest| -> Result<Arc<dyn Plugin>, String> {
            factory_calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            Ok(Arc::new(VersionEcho {
                manifest: manifest.clone(),
                calls: Arc::new(AtomicUsize::new(0)),
            }) as Arc<dyn Plugin>)
        });
        registry.register_manifest(manifest("slow", "0.1.0", "test:slow")).unwrap();

        let first = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.load("slow", None))
        };
        std::thread::sleep(Duration::from_millis(20));
        let second = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.load("slow", None))
        };

        let v1 = Version::new(0, 1, 0);
        assert_eq!(first.join().unwrap(), Ok(v1.clone()));
        assert_eq!(second.join().unwrap(), Ok(v1.clone()));
        assert_eq!(registry.state_of("slow", &v1), Some(VersionState::Active));
        assert_eq!(registry.active_version("slow"), Some(v1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_not_found_and_not_loaded() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        let missing = registry.execute(request("nobody")).await;
        assert_eq!(missing.failure_kind(), Some(FailureKind::NotFound));

        registry.register_manifest(manifest("echo", "0.1.0", "test:echo")).unwrap();
        let unloaded = registry.execute(request("echo")).await;
        assert_eq!(unloaded.failure_kind(), Some(FailureKind::NotLoaded));

        let wrong_version = registry
            .execute(request("echo").with_version(Version::new(9, 9, 9)))
            .await;
        assert_eq!(
            wrong_version.error(),
            Some(&ExecutionError::Registry(RegistryError::NotFound {
                plugin_id: "echo".to_string(),
                version: Some("9.9.9".to_string())
            }))
        );

        let stats = registry.get_statistics("echo");
        assert_eq!(stats.iter().map(|s| s.record.invocations).sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn test_unload_busy_while_in_flight() {
        let open = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(PluginRegistry::new(RegistryConfig::default()));
        {
            let open = Arc::clone(&open);
            let entered = Arc::clone(&entered);
            registry.register_entry_point("test:gated", move |manifest: &Manifest| -> Result<Arc<dyn Plugin>, String> {
                Ok(Arc::new(Gated {
                    manifest: manifest.clone(),
                    open: Arc::clone(&open),
                    entered: Arc::clone(&entered),
                }) as Arc<dyn Plugin>)
            });
        }
        registry.register_manifest(manifest("gated", "0.1.0", "test:gated")).unwrap();
        let version = registry.load("gated", None).unwrap();

        let handle = registry.submit(request("gated"));
        wait_for(&entered).await;

        assert_eq!(registry.in_flight("gated", &version), 1);
        assert_eq!(
            registry.unload("gated", None).unwrap_err(),
            RegistryError::Busy {
                plugin_id: "gated".to_string(),
                version: "0.1.0".to_string(),
                in_flight: 1
            }
        );

        open.store(true, Ordering::SeqCst);
        let result = handle.await.unwrap();
        assert!(result.is_success());
        assert_eq!(registry.in_flight("gated", &version), 0);

        assert_eq!(registry.unload("gated", None).unwrap(), version);
        assert_eq!(registry.state_of("gated", &version), Some(VersionState::Unloaded));
        assert_eq!(
            registry.execute(request("gated")).await.failure_kind(),
            Some(FailureKind::NotLoaded)
        );
    }

    #[tokio::test]
    async fn test_unload_active_promotes_highest_bound() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        for v in ["0.1.0", "0.2.0", "0.3.0"] {
            registry.register_manifest(manifest("echo", v, "test:echo")).unwrap();
        }
        registry.load("echo", Some(&Version::new(0, 3, 0))).unwrap();
        registry.load("echo", Some(&Version::new(0, 1, 0))).unwrap();
        registry.load("echo", Some(&Version::new(0, 2, 0))).unwrap();

        registry.unload("echo", None).unwrap();
        assert_eq!(registry.active_version("echo"), Some(Version::new(0, 2, 0)));

        registry.activate("echo", &Version::new(0, 1, 0)).unwrap();
        assert_eq!(registry.active_version("echo"), Some(Version::new(0, 1, 0)));
        assert_eq!(
            registry.state_of("echo", &Version::new(0, 2, 0)),
            Some(VersionState::Inactive)
        );
        assert!(matches!(
            registry.activate("echo", &Version::new(0, 3, 0)).unwrap_err(),
            RegistryError::NotLoaded { .. }
        ));
    }

    #[tokio::test]
    async fn test_discovery_collects_errors_and_continues() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good");
        let bad = dir.path().join("bad");
        let toml_dir = dir.path().join("toml");
        std::fs::create_dir_all(&good).unwrap();
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::create_dir_all(&toml_dir).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        std::fs::write(
            good.join("plugin.yaml"),
            "id: echo\nversion: 0.1.0\ncore:\n  min: 0.1.0\nproduces: [scalar]\nentry_point: test:echo\n",
        )
        .unwrap();
        std::fs::write(bad.join("plugin.json"), "{ not json").unwrap();
        std::fs::write(
            toml_dir.join("plugin.toml"),
            "id = \"other\"\nversion = \"1.0\"\nproduces = [\"scalar\"]\nentry_point = \"test:echo\"\n[core]\nmin = \"0.1.0\"\n",
        )
        .unwrap();

        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        let mut events = registry.subscribe();
        let report = registry.discover(dir.path()).await.unwrap();

        assert_eq!(report.discovered, vec![("echo".to_string(), Version::new(0, 1, 0))]);
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e.error, RegistryError::Manifest(ManifestError::Malformed { .. }))));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e.error, RegistryError::Manifest(ManifestError::VersionInvalid { .. }))));
        assert_eq!(registry.discovery_errors().len(), 2);

        let mut discovered_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RegistryEvent::Discovered { .. }) {
                discovered_events += 1;
            }
        }
        assert_eq!(discovered_events, 1);

        registry.load("echo", None).unwrap();
        assert_eq!(registry.watched_bundles().len(), 1);

        let rescan = registry.discover(dir.path()).await.unwrap();
        assert!(rescan.discovered.is_empty());
        assert_eq!(rescan.unchanged, vec![("echo".to_string(), Version::new(0, 1, 0))]);
        assert_eq!(rescan.errors.len(), 2);
        assert!(!rescan
            .errors
            .iter()
            .any(|e| matches!(e.error, RegistryError::AlreadyRegistered { .. })));
        assert_eq!(
            registry.state_of("echo", &Version::new(0, 1, 0)),
            Some(VersionState::Active)
        );

        std::fs::write(
            good.join("plugin.yaml"),
            "id: echo\nversion: 0.1.0\ncore:\n  min: 0.1.0\nproduces: [scalar, extra]\nentry_point: test:echo\n",
        )
        .unwrap();
        let edited = registry.discover(dir.path()).await.unwrap();
        assert!(edited
            .errors
            .iter()
            .any(|e| matches!(e.error, RegistryError::AlreadyRegistered { .. })));
    }

    #[tokio::test]
    async fn test_discover_missing_root() {
        let registry = PluginRegistry::new(RegistryConfig::default());
        let err = registry
            .discover(Path::new("/definitely/not/a/plugin/root"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Io { .. }));
    }

    #[tokio::test]
    async fn test_reload_swaps_binding_and_version() {
        let dir = TempDir::new().unwrap();
        let bundle = dir.path().join("echo");
        std::fs::create_dir_all(&bundle).unwrap();
        let path = bundle.join("plugin.json");
        let write = |version: &str| {
            let descriptor = json!({
                "id": "echo",
                "version": version,
                "core": {"min": "0.1.0"},
                "produces": ["scalar"],
                "entry_point": "test:echo"
            });
            std::fs::write(&path, descriptor.to_string()).unwrap();
        };
        write("0.1.0");

        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        registry.discover(dir.path()).await.unwrap();
        registry.load("echo", None).unwrap();
        let first_generation = registry.list_plugins()[0].generation.unwrap();

        // 同版本：原地换绑定
        assert_eq!(registry.reload("echo").await.unwrap(), Version::new(0, 1, 0));
        let summary = &registry.list_plugins()[0];
        assert!(summary.generation.unwrap() > first_generation);
        assert_eq!(summary.state, VersionState::Active);

        // 新版本：成为活跃版本，旧版本保留为 Inactive
        write("0.4.0");
        assert_eq!(registry.reload("echo").await.unwrap(), Version::new(0, 4, 0));
        assert_eq!(registry.active_version("echo"), Some(Version::new(0, 4, 0)));
        assert_eq!(
            registry.state_of("echo", &Version::new(0, 1, 0)),
            Some(VersionState::Inactive)
        );

        assert_eq!(scalar_of(&registry.execute(request("echo")).await), 4.0);
        let old = registry
            .execute(request("echo").with_version(Version::new(0, 1, 0)))
            .await;
        assert_eq!(scalar_of(&old), 1.0);
    }

    #[tokio::test]
    async fn test_in_flight_execution_finishes_on_old_binding() {
        let open = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicBool::new(false));
        let generation_seen = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(PluginRegistry::new(RegistryConfig::default()));
        {
            let open = Arc::clone(&open);
            let entered = Arc::clone(&entered);
            let generation_seen = Arc::clone(&generation_seen);
            registry.register_entry_point("test:gated", move |manifest: &Manifest| -> Result<Arc<dyn Plugin>, String> {
                generation_seen.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Gated {
                    manifest: manifest.clone(),
                    open: Arc::clone(&open),
                    entered: Arc::clone(&entered),
                }) as Arc<dyn Plugin>)
            });
        }
        registry.register_manifest(manifest("gated", "0.1.0", "test:gated")).unwrap();
        registry.load("gated", None).unwrap();

        let handle = registry.submit(request("gated"));
        wait_for(&entered).await;
        registry.reload("gated").await.unwrap();
        assert_eq!(generation_seen.load(Ordering::SeqCst), 2);

        open.store(true, Ordering::SeqCst);
        assert!(handle.await.unwrap().is_success());
        assert!(registry.execute(request("gated")).await.is_success());
    }

    #[tokio::test]
    async fn test_invalid_config_override() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        registry
            .register_manifest(manifest_with(
                "echo",
                "0.1.0",
                "test:echo",
                json!({"bonus": {"type": "float", "default": 0.0}}),
                false,
            ))
            .unwrap();
        registry.load("echo", None).unwrap();

        let ok = registry
            .execute(request("echo").with_override("bonus", json!(0.5)))
            .await;
        assert_eq!(scalar_of(&ok), 1.5);

        let unknown = registry
            .execute(request("echo").with_override("malus", json!(1)))
            .await;
        assert_eq!(unknown.failure_kind(), Some(FailureKind::InvalidConfig));

        let mistyped = registry
            .execute(request("echo").with_override("bonus", json!("lots")))
            .await;
        assert_eq!(mistyped.failure_kind(), Some(FailureKind::InvalidConfig));
    }

    #[tokio::test]
    async fn test_cacheable_plugin_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = echo_registry(Arc::clone(&calls));
        registry
            .register_manifest(manifest_with(
                "echo",
                "0.1.0",
                "test:echo",
                json!({"bonus": {"type": "float", "default": 0.0}}),
                true,
            ))
            .unwrap();
        registry.load("echo", None).unwrap();

        let first = registry.execute(request("echo")).await;
        let second = registry.execute(request("echo")).await;
        assert!(!first.cache_hit());
        assert!(second.cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scalar_of(&first), scalar_of(&second));

        let different = registry
            .execute(request("echo").with_override("bonus", json!(1.0)))
            .await;
        assert!(!different.cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let record = registry
            .get_version_statistics("echo", &Version::new(0, 1, 0))
            .unwrap();
        assert_eq!(record.invocations, 3);
        assert_eq!(record.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_builtin_dtw_through_registry() {
        let registry = PluginRegistry::with_builtins(RegistryConfig::default()).unwrap();
        assert_eq!(registry.active_version("dtw"), Some(Version::new(1, 0, 0)));

        let inputs = PluginInputs::new()
            .with("series_a", InputValue::Sequence(Series::scalar(vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0])))
            .with("series_b", InputValue::Sequence(Series::scalar(vec![0.0, 1.0, 1.0, 2.0, 2.0])));

        let first = registry
            .execute(ExecutionRequest::new("dtw", inputs.clone()).with_override("return_path", json!(true)))
            .await;
        let second = registry
            .execute(ExecutionRequest::new("dtw", inputs).with_override("return_path", json!(true)))
            .await;

        let result = first.output().unwrap().as_alignment().unwrap().clone();
        assert_eq!(result.distance, 0.0);
        assert!(!first.cache_hit());
        assert!(second.cache_hit());
        assert_eq!(second.output().unwrap().as_alignment().unwrap().as_ref(), result.as_ref());
        assert!(registry.cache_stats().hits >= 1);

        let too_narrow = registry
            .execute(
                ExecutionRequest::new(
                    "dtw",
                    PluginInputs::new()
                        .with("series_a", InputValue::Sequence(Series::scalar(vec![1.0, 2.0, 3.0])))
                        .with("series_b", InputValue::Sequence(Series::scalar(vec![1.0]))),
                )
                .with_override("window_size", json!(0)),
            )
            .await;
        assert_eq!(too_narrow.failure_kind(), Some(FailureKind::Alignment));
    }

    #[tokio::test]
    async fn test_execute_all_and_events() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        registry.register_manifest(manifest("echo", "0.1.0", "test:echo")).unwrap();
        registry.load("echo", None).unwrap();
        let mut events = registry.subscribe();

        let results = registry
            .execute_all(vec![request("echo"), request("echo"), request("nobody")])
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success() && results[1].is_success());
        assert!(!results[2].is_success());

        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            if let RegistryEvent::ExecutionCompleted { .. } = event {
                completed += 1;
            }
        }
        assert_eq!(completed, 3);

        registry.clear_statistics(Some("echo"));
        assert!(registry.get_statistics("echo").is_empty());
    }
}
