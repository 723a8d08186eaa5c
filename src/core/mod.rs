//! 核心基础层模块
//!
//! 提供平台的运行时基础设施：生命周期事件总线和执行期内存记账

pub mod events;
pub mod memory;

// 重新导出核心组件
pub use events::{EventBus, RegistryEvent};
pub use memory::{MemoryReservation, MemoryTracker};
