//! 执行沙箱
//!
//! 包装一次插件调用：输入预检、能力检查、墙钟超时、内存上限，并总是报告
//! 资源使用量。这是运行隔离而不是安全边界：超时后通过 `CancellationToken`
//! 协作式取消，被放弃的调用产生的任何输出都会被丢弃。

use super::core::{ExecutionContext, PluginBinding};
use super::execution::{Diagnostics, ExecutionRequest, ExecutionResult, ResourceUsage};
use super::manifest::ResolvedConfig;
use crate::cache::ResultCache;
use crate::error::{ExecutionError, PluginFault, SandboxError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 模块能力白名单/黑名单
///
/// 黑名单优先；白名单为 `None` 时允许所有未被拒绝的模块。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPolicy {
    #[serde(default)]
    pub allow: Option<BTreeSet<String>>,
    #[serde(default)]
    pub deny: BTreeSet<String>,
}

impl CapabilityPolicy {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn new<A, D, S>(allow: Option<A>, deny: D) -> Self
    where
        A: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: allow.map(|modules| modules.into_iter().map(Into::into).collect()),
            deny: deny.into_iter().map(Into::into).collect(),
        }
    }

    pub fn permits(&self, module: &str) -> bool {
        if self.deny.contains(module) {
            return false;
        }
        self.allow
            .as_ref()
            .map_or(true, |allow| allow.contains(module))
    }

    /// 第一个被拒绝的模块（按声明顺序）
    pub fn first_denied<'a>(&self, modules: &'a [String]) -> Option<&'a String> {
        modules.iter().find(|module| !self.permits(module))
    }
}

/// 单次调用的资源限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub memory_ceiling: Option<usize>,
}

/// 执行沙箱
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    policy: CapabilityPolicy,
}

impl Sandbox {
    pub fn new(policy: CapabilityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    /// 运行一次隔离调用
    ///
    /// 检查顺序：输入预检 → 能力检查 → 超时 → 内存上限 → 输出种类。
    pub async fn run(
        &self,
        binding: Arc<PluginBinding>,
        request: &ExecutionRequest,
        config: ResolvedConfig,
        limits: SandboxLimits,
        cache: Option<Arc<ResultCache>>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let version = binding.version().clone();
        let early_usage = |started: Instant| ResourceUsage {
            elapsed: started.elapsed(),
            peak_memory_bytes: 0,
        };

        if !binding.plugin.validate_inputs(&request.inputs) {
            debug!("Inputs rejected by {}", binding.manifest.key());
            return ExecutionResult::failure(
                request,
                Some(version),
                SandboxError::InvalidInput {
                    plugin_id: request.plugin_id.clone(),
                },
                None,
                early_usage(started),
            );
        }

        if let Some(module) = self.policy.first_denied(&binding.manifest.requires) {
            warn!(
                "Capability '{}' denied for plugin {}",
                module,
                binding.manifest.key()
            );
            return ExecutionResult::failure(
                request,
                Some(version),
                SandboxError::CapabilityDenied {
                    module: module.clone(),
                },
                None,
                early_usage(started),
            );
        }

        let mut ctx = ExecutionContext::new(
            request.id,
            request.plugin_id.clone(),
            version.clone(),
            config,
            limits.memory_ceiling,
        );
        if let Some(cache) = cache {
            ctx = ctx.with_cache(cache);
        }
        let ctx = Arc::new(ctx);

        let task = {
            let ctx = Arc::clone(&ctx);
            let plugin = Arc::clone(&binding.plugin);
            let inputs = Arc::clone(&request.inputs);
            tokio::task::spawn_blocking(move || plugin.execute(&inputs, &ctx))
        };

        let joined = tokio::time::timeout(limits.timeout, task).await;
        let usage = ResourceUsage {
            elapsed: started.elapsed(),
            peak_memory_bytes: ctx.memory().peak(),
        };
        let diagnostics = || {
            Some(Diagnostics {
                progress: ctx.progress(),
                notes: ctx.notes(),
            })
        };

        let output = match joined {
            Err(_) => {
                ctx.cancellation_token().cancel();
                let limit_ms = limits.timeout.as_millis().min(u64::MAX as u128) as u64;
                warn!(
                    "Plugin {} timed out after {} ms, cancellation requested",
                    binding.manifest.key(),
                    limit_ms
                );
                return ExecutionResult::failure(
                    request,
                    Some(version),
                    SandboxError::Timeout { limit_ms },
                    diagnostics(),
                    usage,
                );
            }
            Ok(Err(join_error)) => {
                let error = if join_error.is_panic() {
                    SandboxError::Panicked {
                        message: panic_message(join_error.into_panic()),
                    }
                } else {
                    SandboxError::PluginFailed {
                        message: "execution task was cancelled".to_string(),
                    }
                };
                warn!("Plugin {} aborted: {}", binding.manifest.key(), error);
                return ExecutionResult::failure(request, Some(version), error, diagnostics(), usage);
            }
            Ok(Ok(Err(fault))) => {
                let error = fault_to_error(fault);
                warn!("Plugin {} failed: {}", binding.manifest.key(), error);
                return ExecutionResult::failure(request, Some(version), error, diagnostics(), usage);
            }
            Ok(Ok(Ok(output))) => output,
        };

        // 计算成功也要检查峰值
        if let Some(exceeded) = ctx.memory().exceeded() {
            warn!("Plugin {} exceeded its memory ceiling", binding.manifest.key());
            return ExecutionResult::failure(request, Some(version), exceeded, diagnostics(), usage);
        }

        if !binding.manifest.produces_kind(&output.kind) {
            return ExecutionResult::failure(
                request,
                Some(version),
                SandboxError::UndeclaredOutput { kind: output.kind },
                diagnostics(),
                usage,
            );
        }

        ExecutionResult::success(request, version, Arc::new(output), ctx.cache_hit(), usage)
    }
}

fn fault_to_error(fault: PluginFault) -> ExecutionError {
    match fault {
        PluginFault::Sandbox(error) => ExecutionError::Sandbox(error),
        PluginFault::Config(error) => ExecutionError::Config(error),
        PluginFault::Alignment(error) => ExecutionError::Alignment(error),
        other => ExecutionError::Sandbox(SandboxError::PluginFailed {
            message: other.to_string(),
        }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
