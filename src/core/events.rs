//! 注册表生命周期事件
//!
//! 基于 `tokio::sync::broadcast` 的发布/订阅。没有订阅者时发布是空操作，
//! 慢订阅者会丢失最旧的事件而不是阻塞发布方。

use crate::types::PluginId;
use semver::Version;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// 注册表事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    Discovered {
        plugin_id: PluginId,
        version: Version,
    },
    DiscoveryFailed {
        path: String,
        reason: String,
    },
    Loaded {
        plugin_id: PluginId,
        version: Version,
    },
    Activated {
        plugin_id: PluginId,
        version: Version,
    },
    Reloaded {
        plugin_id: PluginId,
        version: Version,
        generation: u64,
    },
    Unloaded {
        plugin_id: PluginId,
        version: Version,
    },
    ExecutionCompleted {
        request_id: Uuid,
        plugin_id: PluginId,
        version: Option<Version>,
        success: bool,
        cache_hit: bool,
        elapsed_ms: u64,
    },
}

impl RegistryEvent {
    /// 事件类型名称
    pub fn name(&self) -> &'static str {
        match self {
            RegistryEvent::Discovered { .. } => "discovered",
            RegistryEvent::DiscoveryFailed { .. } => "discovery_failed",
            RegistryEvent::Loaded { .. } => "loaded",
            RegistryEvent::Activated { .. } => "activated",
            RegistryEvent::Reloaded { .. } => "reloaded",
            RegistryEvent::Unloaded { .. } => "unloaded",
            RegistryEvent::ExecutionCompleted { .. } => "execution_completed",
        }
    }
}

/// 事件总线
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 发布事件，返回收到事件的订阅者数量
    pub fn publish(&self, event: RegistryEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => {
                trace!("Published {} event to {} subscriber(s)", name, receivers);
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();

        let event = RegistryEvent::Loaded {
            plugin_id: "dtw".to_string(),
            version: Version::new(1, 0, 0),
        };
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(receiver.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        let delivered = bus.publish(RegistryEvent::DiscoveryFailed {
            path: "/tmp/x".to_string(),
            reason: "bad".to_string(),
        });
        assert_eq!(delivered, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = RegistryEvent::Unloaded {
            plugin_id: "dtw".to_string(),
            version: Version::new(1, 2, 0),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "unloaded");
        assert_eq!(json["version"], "1.2.0");
    }
}
