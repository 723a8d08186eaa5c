//! SignalLab 错误处理系统
//!
//! 统一的错误类型和错误处理机制。每个子系统拥有自己的错误枚举，
//! `PlatformError` 负责在crate边界上聚合它们。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 插件清单解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Malformed manifest: {reason}")]
    Malformed { reason: String },

    #[error("Invalid semantic version in '{field}': {value}")]
    VersionInvalid { field: String, value: String },

    #[error("Invalid core version range: min {min} is above max {max}")]
    InvalidRange { min: String, max: String },

    #[error("Unsupported manifest format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Invalid config schema for parameter '{parameter}': {reason}")]
    InvalidSchema { parameter: String, reason: String },
}

impl ManifestError {
    /// 创建结构错误
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }
}

/// 插件配置合并错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown configuration parameter '{parameter}'")]
    UnknownParameter { parameter: String },

    #[error("Type mismatch for parameter '{parameter}': expected {expected}, found {found}")]
    TypeMismatch {
        parameter: String,
        expected: String,
        found: String,
    },

    #[error("Value {value} is not allowed for parameter '{parameter}'")]
    NotAllowed { parameter: String, value: String },

    #[error("Invalid value for parameter '{parameter}': {reason}")]
    InvalidValue { parameter: String, reason: String },
}

/// 插件注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Plugin not found: {plugin_id}{}", version_suffix(.version))]
    NotFound {
        plugin_id: String,
        version: Option<String>,
    },

    #[error("Plugin {plugin_id}@{version} is not loaded")]
    NotLoaded { plugin_id: String, version: String },

    #[error("Plugin {plugin_id}@{version} is busy ({in_flight} execution(s) in flight)")]
    Busy {
        plugin_id: String,
        version: String,
        in_flight: usize,
    },

    #[error("Plugin {plugin_id}@{version} is incompatible with core {core_version}")]
    IncompatibleCore {
        plugin_id: String,
        version: String,
        core_version: String,
    },

    #[error("Entry point '{entry_point}' of plugin {plugin_id} is not registered")]
    EntryPointMissing {
        plugin_id: String,
        entry_point: String,
    },

    #[error("Failed to bind plugin {plugin_id}: {reason}")]
    BindFailed { plugin_id: String, reason: String },

    #[error("Plugin {plugin_id}@{version} is already registered")]
    AlreadyRegistered { plugin_id: String, version: String },

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },
}

fn version_suffix(version: &Option<String>) -> String {
    version.as_ref().map(|v| format!("@{}", v)).unwrap_or_default()
}

/// 沙箱执行错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Inputs rejected by plugin {plugin_id}")]
    InvalidInput { plugin_id: String },

    #[error("Capability denied: module '{module}' is not permitted")]
    CapabilityDenied { module: String },

    #[error("Execution exceeded wall-clock limit of {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    #[error("Peak memory {peak_bytes} bytes exceeded ceiling of {ceiling_bytes} bytes")]
    MemoryExceeded { peak_bytes: usize, ceiling_bytes: usize },

    #[error("Plugin failed: {message}")]
    PluginFailed { message: String },

    #[error("Plugin panicked: {message}")]
    Panicked { message: String },

    #[error("Plugin produced undeclared result kind '{kind}'")]
    UndeclaredOutput { kind: String },
}

/// DTW计算错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DtwError {
    #[error("Input series {index} is empty")]
    EmptyInput { index: usize },

    #[error("Window {window} cannot connect series of length {len_a} and {len_b}")]
    WindowTooNarrow {
        window: usize,
        len_a: usize,
        len_b: usize,
    },

    #[error("Sample dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Series {index} has a non-finite sample at position {position}")]
    NonFinite { index: usize, position: usize },

    #[error("Alignment cancelled")]
    Cancelled,
}

/// 插件内部故障 - 插件 `execute` 的错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginFault {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Alignment(#[from] DtwError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Message(String),
}

impl PluginFault {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// 执行失败的种类标签，用于统计聚合
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    NotLoaded,
    Busy,
    IncompatibleCore,
    EntryPointMissing,
    InvalidConfig,
    InvalidInput,
    CapabilityDenied,
    Timeout,
    MemoryExceeded,
    PluginFailed,
    Panicked,
    UndeclaredOutput,
    Alignment,
    Registry,
}

/// 执行结果中的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Alignment(#[from] DtwError),
}

impl ExecutionError {
    /// 稳定的失败种类
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::Registry(e) => match e {
                RegistryError::NotFound { .. } => FailureKind::NotFound,
                RegistryError::NotLoaded { .. } => FailureKind::NotLoaded,
                RegistryError::Busy { .. } => FailureKind::Busy,
                RegistryError::IncompatibleCore { .. } => FailureKind::IncompatibleCore,
                RegistryError::EntryPointMissing { .. } => FailureKind::EntryPointMissing,
                _ => FailureKind::Registry,
            },
            ExecutionError::Config(_) => FailureKind::InvalidConfig,
            ExecutionError::Sandbox(e) => match e {
                SandboxError::InvalidInput { .. } => FailureKind::InvalidInput,
                SandboxError::CapabilityDenied { .. } => FailureKind::CapabilityDenied,
                SandboxError::Timeout { .. } => FailureKind::Timeout,
                SandboxError::MemoryExceeded { .. } => FailureKind::MemoryExceeded,
                SandboxError::PluginFailed { .. } => FailureKind::PluginFailed,
                SandboxError::Panicked { .. } => FailureKind::Panicked,
                SandboxError::UndeclaredOutput { .. } => FailureKind::UndeclaredOutput,
            },
            ExecutionError::Alignment(_) => FailureKind::Alignment,
        }
    }
}

/// 平台统一错误类型
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Alignment error: {0}")]
    Alignment(#[from] DtwError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Data error: {message}")]
    Data { message: String },
}

impl PlatformError {
    /// 创建配置相关错误
    pub fn config(message: &str) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    /// 创建数据相关错误
    pub fn data(message: &str) -> Self {
        Self::Data {
            message: message.to_string(),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, PlatformError>;
