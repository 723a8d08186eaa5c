//! 执行请求与执行结果
//!
//! 结果要么是成功载荷，要么是失败描述，二者不会同时出现；
//! 两种情况都附带资源使用量。

use crate::error::{ExecutionError, FailureKind};
use crate::types::{PluginId, PluginInputs, PluginOutput};
use semver::Version;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 执行请求，提交后不可变
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub plugin_id: PluginId,
    /// 显式版本，`None` 表示使用活跃版本
    pub version: Option<Version>,
    pub inputs: Arc<PluginInputs>,
    /// 稀疏配置覆盖
    pub overrides: BTreeMap<String, Value>,
    /// 墙钟超时，`None` 使用注册表默认值
    pub timeout: Option<Duration>,
    /// 内存上限（字节），`None` 使用注册表默认值
    pub memory_ceiling: Option<usize>,
}

impl ExecutionRequest {
    pub fn new(plugin_id: impl Into<PluginId>, inputs: PluginInputs) -> Self {
        Self {
            id: Uuid::new_v4(),
            plugin_id: plugin_id.into(),
            version: None,
            inputs: Arc::new(inputs),
            overrides: BTreeMap::new(),
            timeout: None,
            memory_ceiling: None,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_override(mut self, name: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(name.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_memory_ceiling(mut self, bytes: usize) -> Self {
        self.memory_ceiling = Some(bytes);
        self
    }
}

/// 资源使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    pub elapsed: Duration,
    pub peak_memory_bytes: usize,
}

/// 失败时的部分诊断信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    /// 失败前最后上报的进度
    pub progress: f64,
    pub notes: Vec<String>,
}

/// 失败描述
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip)]
    pub error: ExecutionError,
    pub diagnostics: Option<Diagnostics>,
}

impl ExecutionFailure {
    pub fn new(error: ExecutionError, diagnostics: Option<Diagnostics>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            error,
            diagnostics,
        }
    }
}

/// 执行结局
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        output: Arc<PluginOutput>,
        cache_hit: bool,
    },
    Failure(ExecutionFailure),
}

/// 执行结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub request_id: Uuid,
    pub plugin_id: PluginId,
    /// 实际执行的版本，解析失败时为 `None`
    pub version: Option<Version>,
    pub outcome: ExecutionOutcome,
    pub usage: ResourceUsage,
}

impl ExecutionResult {
    pub fn success(
        request: &ExecutionRequest,
        version: Version,
        output: Arc<PluginOutput>,
        cache_hit: bool,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            request_id: request.id,
            plugin_id: request.plugin_id.clone(),
            version: Some(version),
            outcome: ExecutionOutcome::Success { output, cache_hit },
            usage,
        }
    }

    pub fn failure(
        request: &ExecutionRequest,
        version: Option<Version>,
        error: impl Into<ExecutionError>,
        diagnostics: Option<Diagnostics>,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            request_id: request.id,
            plugin_id: request.plugin_id.clone(),
            version,
            outcome: ExecutionOutcome::Failure(ExecutionFailure::new(error.into(), diagnostics)),
            usage,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Success { .. })
    }

    pub fn output(&self) -> Option<&Arc<PluginOutput>> {
        match &self.outcome {
            ExecutionOutcome::Success { output, .. } => Some(output),
            ExecutionOutcome::Failure(_) => None,
        }
    }

    pub fn failure_info(&self) -> Option<&ExecutionFailure> {
        match &self.outcome {
            ExecutionOutcome::Failure(failure) => Some(failure),
            ExecutionOutcome::Success { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.failure_info().map(|failure| &failure.error)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_info().map(|failure| failure.kind)
    }

    pub fn cache_hit(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Success { cache_hit: true, .. })
    }

    pub fn into_result(self) -> Result<Arc<PluginOutput>, ExecutionError> {
        match self.outcome {
            ExecutionOutcome::Success { output, .. } => Ok(output),
            ExecutionOutcome::Failure(failure) => Err(failure.error),
        }
    }
}
