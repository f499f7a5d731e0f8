//! 调度核心
//!
//! 节点注册表、有界任务队列、调度器、心跳监控和状态恢复，
//! 由 [`Coordinator`] 组合成协调进程对外的接口。

pub mod coordinator;
pub mod dispatcher;
pub mod heartbeat_monitor;
pub mod node_registry;
pub mod recovery_service;
pub mod retry_policy;
pub mod strategies;
pub mod task_queue;

pub use coordinator::{ClusterStats, Coordinator};
pub use dispatcher::{CycleReport, Dispatcher, DispatcherSettings, DispatcherStats, NodeLostHandler};
pub use heartbeat_monitor::{HeartbeatMonitor, SweepReport};
pub use node_registry::{NodeCounts, NodeRegistry};
pub use recovery_service::{RecoveryReport, RecoveryService};
pub use retry_policy::*;
pub use strategies::*;
pub use task_queue::{QueueSlot, TaskQueue};
