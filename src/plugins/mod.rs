//! 插件系统
//!
//! 清单解析、注册表、沙箱执行、统计与热重载。内置DTW插件也在这里注册。

pub mod builtin;
pub mod core;
pub mod execution;
pub mod hot_reload;
pub mod manifest;
pub mod registry;
pub mod sandbox;
pub mod statistics;

// 重新导出核心组件
pub use builtin::{dtw_manifest, DtwPlugin, DtwPluginFactory, DTW_ENTRY_POINT};
pub use self::core::{ExecutionContext, Plugin, PluginBinding, PluginFactory};
pub use execution::{Diagnostics, ExecutionFailure, ExecutionOutcome, ExecutionRequest, ExecutionResult, ResourceUsage};
pub use hot_reload::{HotReloadMonitor, ReloadSweep, ReloadWatcher};
pub use manifest::{merge_config, validate_compatibility, ConfigSchema, Manifest, ManifestFormat, ParamSpec, ParamType, ResolvedConfig};
pub use registry::{BundleSource, DiscoveryError, DiscoveryReport, PluginRegistry, PluginSummary, RegistryConfig, VersionState};
pub use sandbox::{CapabilityPolicy, Sandbox, SandboxLimits};
pub use statistics::{StatisticsBook, StatisticsRecord, VersionStatistics};
