use std::sync::Arc;
use std::time::Duration;

use recon_core::{
    Clock, CoordinatorApi, NodeHeartbeat, NodeRegistration, NodeRole, SchedulerError,
    SchedulerResult,
};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::TaskExecutionManager;

/// 节点注册与心跳
///
/// 协调进程已移除本节点时（心跳返回 `NodeNotFound`），自动重新注册。
pub struct HeartbeatManager {
    coordinator: Arc<dyn CoordinatorApi>,
    clock: Arc<dyn Clock>,
    registration: NodeRegistration,
    node_id: RwLock<Option<String>>,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        coordinator: Arc<dyn CoordinatorApi>,
        clock: Arc<dyn Clock>,
        registration: NodeRegistration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            clock,
            registration,
            node_id: RwLock::new(None),
            heartbeat_interval,
        }
    }

    pub async fn node_id(&self) -> Option<String> {
        self.node_id.read().await.clone()
    }

    pub async fn register(&self) -> SchedulerResult<(String, NodeRole)> {
        let (node_id, role) = self
            .coordinator
            .register_node(self.registration.clone())
            .await?;
        info!(
            "节点 {} 注册成功: {} (角色: {:?})",
            self.registration.name, node_id, role
        );
        *self.node_id.write().await = Some(node_id.clone());
        Ok((node_id, role))
    }

    /// 发送一次心跳，节点被移除时重新注册
    pub async fn send_heartbeat(&self, active_task_count: u32) -> SchedulerResult<()> {
        let Some(node_id) = self.node_id().await else {
            self.register().await?;
            return Ok(());
        };

        let heartbeat = NodeHeartbeat {
            node_id: node_id.clone(),
            active_task_count,
            sent_at: self.clock.now(),
        };
        match self.coordinator.send_heartbeat(heartbeat).await {
            Ok(()) => {
                debug!("节点 {} 心跳已发送, 活跃任务: {}", node_id, active_task_count);
                Ok(())
            }
            Err(SchedulerError::NodeNotFound { .. }) => {
                warn!("协调进程不认识节点 {}，重新注册", node_id);
                self.register().await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 启动心跳循环，收到关闭信号后退出
    pub fn start_heartbeat_task(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
        executions: Arc<TaskExecutionManager>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut heartbeat_interval = interval(self.heartbeat_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        let active = executions.current_task_count().await as u32;
                        if let Err(e) = manager.send_heartbeat(active).await {
                            error!("发送心跳失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("心跳任务退出");
                        break;
                    }
                }
            }
        })
    }
}
