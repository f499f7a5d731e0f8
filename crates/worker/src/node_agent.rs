use std::sync::Arc;
use std::time::Duration;

use recon_core::config::WorkerConfig;
use recon_core::{
    Clock, CoordinatorApi, NodeRegistration, NodeRole, ScanWorkerRegistry, SchedulerError,
    SchedulerResult, Task,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::components::{HeartbeatManager, TaskExecutionManager};

/// 执行节点
///
/// 启动时向协调进程注册，随后定期发送心跳，执行协调进程下发的扫描任务。
pub struct NodeAgent {
    name: String,
    heartbeat_manager: Arc<HeartbeatManager>,
    executions: Arc<TaskExecutionManager>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
}

impl NodeAgent {
    pub fn new(
        config: &WorkerConfig,
        heartbeat_interval: Duration,
        coordinator: Arc<dyn CoordinatorApi>,
        scanners: ScanWorkerRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registration = NodeRegistration::new(
            config.node_name.clone(),
            config.address.clone(),
            config.max_concurrent_tasks,
        )
        .with_capabilities(scanners.supported_types());
        let heartbeat_manager = Arc::new(HeartbeatManager::new(
            Arc::clone(&coordinator),
            Arc::clone(&clock),
            registration,
            heartbeat_interval,
        ));
        let executions = Arc::new(TaskExecutionManager::new(
            scanners,
            coordinator,
            clock,
            config.max_concurrent_tasks as usize,
        ));

        Self {
            name: config.node_name.clone(),
            heartbeat_manager,
            executions,
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn node_id(&self) -> Option<String> {
        self.heartbeat_manager.node_id().await
    }

    pub fn executions(&self) -> &Arc<TaskExecutionManager> {
        &self.executions
    }

    pub async fn is_running(&self) -> bool {
        self.shutdown_tx.read().await.is_some()
    }

    /// 注册节点并启动心跳，返回节点ID和角色
    pub async fn start(&self) -> SchedulerResult<(String, NodeRole)> {
        let mut shutdown_tx = self.shutdown_tx.write().await;
        if shutdown_tx.is_some() {
            return Err(SchedulerError::Internal(format!(
                "节点 {} 已在运行",
                self.name
            )));
        }

        info!(
            "启动执行节点: {}, 支持的任务类型: {:?}",
            self.name,
            self.executions.supported_task_types()
        );
        let registered = self.heartbeat_manager.register().await?;

        let (tx, rx) = broadcast::channel(1);
        self.heartbeat_manager
            .start_heartbeat_task(rx, Arc::clone(&self.executions));
        *shutdown_tx = Some(tx);
        Ok(registered)
    }

    /// 停止心跳并中止执行中的任务
    ///
    /// 中止的任务由协调进程在节点离线后重新分配。
    pub async fn stop(&self) {
        let Some(tx) = self.shutdown_tx.write().await.take() else {
            return;
        };
        info!("停止执行节点: {}", self.name);
        let _ = tx.send(());

        let aborted = self.executions.cancel_all().await;
        if aborted > 0 {
            warn!("节点 {} 停止时中止了 {} 个任务", self.name, aborted);
        }
    }

    pub async fn handle_dispatch(&self, task: Task) -> SchedulerResult<()> {
        let node_id = self
            .node_id()
            .await
            .ok_or_else(|| SchedulerError::Internal(format!("节点 {} 尚未注册", self.name)))?;
        self.executions.handle_task_execution(&node_id, task).await
    }

    pub async fn handle_abort(&self, task_id: &str) -> bool {
        self.executions.cancel_task(task_id).await
    }
}
