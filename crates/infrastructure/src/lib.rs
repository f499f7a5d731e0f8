pub mod database;
pub mod metrics_collector;

pub use database::*;
pub use metrics_collector::SchedulerMetrics;
