//! SignalLab - 可插拔信号分析平台
//!
//! 插件以清单描述，由注册表发现、版本解析并在受限沙箱中执行。
//! 平台自带一个DTW（动态时间规整）对齐引擎作为参考插件。
//!
//! # 架构分层
//!
//! - **插件层**: 清单、注册表、沙箱、统计、热重载
//! - **对齐引擎**: 带窗口约束的DTW、批量距离矩阵
//! - **基础设施**: 指纹缓存、内存追踪、生命周期事件
//! - **宿主协作**: 配置管理、表格加载与数据校验
//!
//! # 示例
//!
//! ```no_run
//! use signal_lab::{ExecutionRequest, InputValue, PluginInputs, PluginRegistry, RegistryConfig, Series};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PluginRegistry::with_builtins(RegistryConfig::default())?;
//! let inputs = PluginInputs::new()
//!     .with("series_a", InputValue::Sequence(Series::scalar(vec![0.0, 1.0, 2.0])))
//!     .with("series_b", InputValue::Sequence(Series::scalar(vec![0.0, 2.0])));
//! let result = registry.execute(ExecutionRequest::new("dtw", inputs)).await;
//! let output = result.into_result()?;
//! println!("{:?}", output.as_alignment().map(|a| a.distance));
//! # Ok(())
//! # }
//! ```

pub mod alignment;
pub mod cache;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod plugins;
pub mod types;

// 重新导出核心类型
pub use alignment::{AlignmentEngine, DistanceMetric, DtwConfig, DtwResult, StepPattern};
pub use cache::{CacheStats, Fingerprint, FingerprintBuilder, LruStore, ResultCache};
pub use error::*;
pub use plugins::{
    ExecutionContext, ExecutionRequest, ExecutionResult, Manifest, Plugin, PluginFactory, PluginRegistry,
    RegistryConfig,
};
pub use types::*;

/// 平台信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PLATFORM_NAME: &str = "SignalLab";

/// 宿主核心版本
pub fn core_version() -> semver::Version {
    semver::Version::parse(VERSION).unwrap_or_else(|_| semver::Version::new(0, 0, 0))
}

/// 快速启动函数
pub async fn initialize() -> Result<()> {
    config::init_logging(&config::LoggingConfig::default());

    tracing::info!("🚀 Initializing {} v{}", PLATFORM_NAME, VERSION);
    tracing::info!("🧩 Plugins: manifest discovery, versioned registry, sandboxed execution");
    tracing::info!("📈 Built-in: DTW alignment engine");

    Ok(())
}
