pub mod heartbeat_manager;
pub mod task_execution;

pub use heartbeat_manager::HeartbeatManager;
pub use task_execution::TaskExecutionManager;
