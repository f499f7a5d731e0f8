pub mod clock;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use errors::*;
pub use models::{
    Node, NodeEvent, NodeHeartbeat, NodeRegistration, NodeRole, NodeStatus, Task, TaskFilter,
    TaskOutcome, TaskPriority, TaskStatus, TaskSubmission, TaskType,
};
pub use traits::{
    CoordinatorApi, NodeClient, NodeRepository, ScanContext, ScanError, ScanWorker,
    ScanWorkerRegistry, TaskRepository,
};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
