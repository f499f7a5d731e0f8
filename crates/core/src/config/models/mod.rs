pub mod app_config;
pub mod database;
pub mod dispatcher_worker;
pub mod node_task;
pub mod observability;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_worker::{DispatcherConfig, WorkerConfig};
pub use node_task::{NodeConfig, TaskConfig};
pub use observability::ObservabilityConfig;
