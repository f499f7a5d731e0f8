//! 配置管理
//!
//! 所有配置段都提供默认值，TOML 文件只需要覆盖关心的字段。
//! 环境变量以 `RECON_` 为前缀，段和字段之间用双下划线分隔，
//! 例如 `RECON_NODE__HEARTBEAT_TIMEOUT=120`。

pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, DispatcherConfig, NodeConfig, ObservabilityConfig, TaskConfig,
    WorkerConfig,
};
