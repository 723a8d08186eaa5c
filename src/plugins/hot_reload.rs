//! 插件包热重载监控
//!
//! 周期性检查活跃版本清单文件的修改时间，变化时调用 `PluginRegistry::reload`。
//! 重载失败只记录日志，旧绑定继续服务。

use super::registry::PluginRegistry;
use crate::types::PluginId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 单轮检查的结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReloadSweep {
    pub reloaded: Vec<PluginId>,
    pub failed: Vec<(PluginId, String)>,
}

/// 记录清单修改时间并触发重载
pub struct ReloadWatcher {
    registry: Arc<PluginRegistry>,
    seen: HashMap<PathBuf, SystemTime>,
}

impl ReloadWatcher {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            seen: HashMap::new(),
        }
    }

    /// 检查一轮；首次见到的文件只记录时间，不触发重载
    pub async fn poll(&mut self) -> ReloadSweep {
        let mut sweep = ReloadSweep::default();

        for (plugin_id, path) in self.registry.watched_bundles() {
            let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!("Cannot stat {:?}: {}", path, e);
                    continue;
                }
            };

            let previous = self.seen.insert(path.clone(), modified);
            if previous.map_or(true, |last| last == modified) {
                continue;
            }

            info!("Detected manifest change for '{}': {:?}", plugin_id, path);
            match self.registry.reload(&plugin_id).await {
                Ok(version) => {
                    info!("Hot reloaded '{}' at version {}", plugin_id, version);
                    sweep.reloaded.push(plugin_id);
                }
                Err(e) => {
                    error!("Failed to hot reload '{}': {}", plugin_id, e);
                    sweep.failed.push((plugin_id, e.to_string()));
                }
            }
        }

        sweep
    }
}

/// 后台热重载任务
pub struct HotReloadMonitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HotReloadMonitor {
    /// 启动监控任务
    pub fn spawn(registry: Arc<PluginRegistry>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let mut watcher = ReloadWatcher::new(registry);

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = timer.tick() => {
                        watcher.poll().await;
                    }
                }
            }
            debug!("Hot reload loop exited");
        });

        info!("Hot reload monitor started (interval {:?})", interval);
        Self { token, handle }
    }

    /// 停止监控并等待任务退出
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!("Hot reload task ended abnormally: {}", e);
        }
        info!("Hot reload monitor stopped");
    }
}
