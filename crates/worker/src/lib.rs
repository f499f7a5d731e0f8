//! 执行节点
//!
//! 节点代理负责注册、心跳和任务执行，扫描逻辑由注册的 [`recon_core::ScanWorker`] 提供。

pub mod components;
pub mod local_client;
pub mod node_agent;
pub mod scanners;

pub use components::{HeartbeatManager, TaskExecutionManager};
pub use local_client::LocalNodeClient;
pub use node_agent::NodeAgent;
pub use scanners::{PortScanParams, TcpPortScanner};

use std::sync::Arc;

use recon_core::ScanWorkerRegistry;

/// 内置扫描引擎
pub fn default_scanners() -> ScanWorkerRegistry {
    let mut registry = ScanWorkerRegistry::new();
    registry.register(Arc::new(TcpPortScanner::new()));
    registry
}
