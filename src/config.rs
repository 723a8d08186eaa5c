//! SignalLab 配置管理系统
//!
//! YAML配置文件驱动注册表、沙箱限制、热重载和日志。

use crate::error::PlatformError;
use crate::plugins::{CapabilityPolicy, RegistryConfig};
use crate::Result;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 平台配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// 宿主核心版本，用于清单兼容检查
    pub core_version: String,
    /// 插件包根目录
    pub plugin_roots: Vec<PathBuf>,
    /// 结果缓存容量，0 表示禁用
    pub cache_capacity: usize,
    pub default_timeout_ms: u64,
    /// `None` 表示不限制
    pub default_memory_ceiling_bytes: Option<usize>,
    pub max_concurrent_executions: usize,
    /// 能力白名单/黑名单
    pub sandbox: CapabilityPolicy,
    pub hot_reload: HotReloadConfig,
    pub logging: LoggingConfig,
}

/// 热重载配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 5_000,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// 是否输出模块路径
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            show_target: false,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            core_version: crate::VERSION.to_string(),
            plugin_roots: vec![PathBuf::from("plugins")],
            cache_capacity: 256,
            default_timeout_ms: 30_000,
            default_memory_ceiling_bytes: Some(512 * 1024 * 1024),
            max_concurrent_executions: num_cpus::get().max(1),
            sandbox: CapabilityPolicy::allow_all(),
            hot_reload: HotReloadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// 转换为注册表配置
    pub fn registry_config(&self) -> Result<RegistryConfig> {
        let core_version = Version::parse(&self.core_version)
            .map_err(|e| PlatformError::config(&format!("Invalid core_version '{}': {}", self.core_version, e)))?;
        Ok(RegistryConfig {
            core_version,
            cache_capacity: self.cache_capacity,
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            default_memory_ceiling: self.default_memory_ceiling_bytes,
            max_concurrent_executions: self.max_concurrent_executions,
            policy: self.sandbox.clone(),
            ..RegistryConfig::default()
        })
    }

    pub fn hot_reload_interval(&self) -> Duration {
        Duration::from_millis(self.hot_reload.interval_ms)
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: PlatformConfig,
}

impl ConfigManager {
    /// 从文件加载配置
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PlatformError::config(&format!("Failed to read config file: {}", e)))?;

        let config: PlatformConfig = serde_yaml::from_str(&content)
            .map_err(|e| PlatformError::config(&format!("Failed to parse config file: {}", e)))?;

        Ok(Self { config })
    }

    /// 创建默认配置
    pub fn new_default() -> Self {
        Self {
            config: PlatformConfig::default(),
        }
    }

    /// 保存配置到文件
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self.config)
            .map_err(|e| PlatformError::config(&format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| PlatformError::config(&format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// 获取配置
    pub fn get_config(&self) -> &PlatformConfig {
        &self.config
    }

    /// 获取可变配置
    pub fn get_config_mut(&mut self) -> &mut PlatformConfig {
        &mut self.config
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let config = &self.config;

        if Version::parse(&config.core_version).is_err() {
            return Err(PlatformError::config(&format!(
                "core_version '{}' is not a semantic version",
                config.core_version
            )));
        }

        if config.default_timeout_ms == 0 {
            return Err(PlatformError::config("default_timeout_ms must be positive"));
        }

        if config.default_memory_ceiling_bytes == Some(0) {
            return Err(PlatformError::config("default_memory_ceiling_bytes must be positive"));
        }

        if config.max_concurrent_executions == 0 {
            return Err(PlatformError::config("max_concurrent_executions must be positive"));
        }

        if let Some(allow) = &config.sandbox.allow {
            if let Some(module) = allow.intersection(&config.sandbox.deny).next() {
                return Err(PlatformError::config(&format!(
                    "Module '{}' is both allowed and denied",
                    module
                )));
            }
        }

        if config.hot_reload.enabled && config.hot_reload.interval_ms == 0 {
            return Err(PlatformError::config("hot_reload.interval_ms must be positive"));
        }

        tracing::info!("Configuration validation passed");
        Ok(())
    }
}

/// 生成默认配置文件
pub async fn generate_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let config_manager = ConfigManager::new_default();
    config_manager.save_to_file(path).await?;
    Ok(())
}

/// 初始化日志；重复调用时保留已有的订阅者
pub fn init_logging(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.level))
        .with_target(config.show_target)
        .try_init()
        .is_ok()
}
