use std::sync::Arc;

use async_trait::async_trait;
use recon_core::config::AppConfig;
use recon_core::{
    Clock, CoordinatorApi, Node, NodeClient, NodeHeartbeat, NodeRegistration, NodeRole,
    SchedulerResult, Task, TaskFilter, TaskOutcome, TaskSubmission,
};
use recon_infrastructure::Repositories;
use tracing::info;

use crate::dispatcher::{Dispatcher, DispatcherSettings, DispatcherStats};
use crate::heartbeat_monitor::HeartbeatMonitor;
use crate::node_registry::{NodeCounts, NodeRegistry};
use crate::recovery_service::{RecoveryReport, RecoveryService};

/// 集群概览
#[derive(Debug, Clone, Default)]
pub struct ClusterStats {
    pub tasks: DispatcherStats,
    pub nodes: NodeCounts,
    pub master_node_id: Option<String>,
}

/// 协调进程门面
///
/// 组合节点注册表、调度器和心跳监控，对节点实现 [`CoordinatorApi`]，
/// 对提交方提供任务提交、取消和查询接口。
pub struct Coordinator {
    registry: Arc<NodeRegistry>,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<HeartbeatMonitor>,
}

impl Coordinator {
    pub fn new(
        config: &AppConfig,
        repositories: Repositories,
        node_client: Arc<dyn NodeClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(NodeRegistry::new(
            repositories.nodes,
            clock.clone(),
            config.node.master_node_name.clone(),
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(
                repositories.tasks,
                registry.clone(),
                node_client,
                clock,
                DispatcherSettings::from_config(&config.task, &config.dispatcher),
            )
            .with_config(&config.dispatcher),
        );
        let monitor = Arc::new(HeartbeatMonitor::from_config(
            registry.clone(),
            dispatcher.clone(),
            &config.node,
        ));

        Self {
            registry,
            dispatcher,
            monitor,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }

    /// 从持久化存储恢复节点和队列
    pub async fn recover(&self) -> SchedulerResult<RecoveryReport> {
        RecoveryService::new(self.dispatcher.clone()).recover().await
    }

    pub async fn submit_task(&self, submission: TaskSubmission) -> SchedulerResult<Task> {
        self.dispatcher.submit(submission).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> SchedulerResult<Task> {
        self.dispatcher.cancel(task_id).await
    }

    pub async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        self.dispatcher.get_task(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        self.dispatcher.list_tasks(filter).await
    }

    pub async fn list_nodes(&self) -> Vec<Node> {
        self.registry.list().await
    }

    pub async fn stats(&self) -> SchedulerResult<ClusterStats> {
        Ok(ClusterStats {
            tasks: self.dispatcher.stats().await?,
            nodes: self.registry.node_counts().await,
            master_node_id: self.registry.master().await.map(|n| n.id),
        })
    }

    /// 节点主动退出，其在途任务立即重新分配
    pub async fn unregister_node(&self, node_id: &str) -> SchedulerResult<usize> {
        self.registry.unregister(node_id).await?;
        self.dispatcher.on_node_lost(node_id).await
    }

    /// 在后台运行调度循环和心跳监控
    pub fn spawn_background(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let dispatcher = self.dispatcher.clone();
        let monitor = self.monitor.clone();
        vec![
            tokio::spawn(async move { dispatcher.start().await }),
            tokio::spawn(async move { monitor.start().await }),
        ]
    }

    pub async fn shutdown(&self) {
        info!("停止协调进程后台任务");
        self.dispatcher.stop().await;
        self.monitor.stop().await;
    }
}

#[async_trait]
impl CoordinatorApi for Coordinator {
    async fn register_node(
        &self,
        registration: NodeRegistration,
    ) -> SchedulerResult<(String, NodeRole)> {
        let (node, role) = self.registry.register(registration).await?;
        self.dispatcher.notify();
        Ok((node.id, role))
    }

    async fn send_heartbeat(&self, heartbeat: NodeHeartbeat) -> SchedulerResult<()> {
        let before = self.registry.get(&heartbeat.node_id).await;
        let node = self.registry.heartbeat(heartbeat).await?;

        // 节点恢复在线或空出槽位时立即调度
        let changed = before.map_or(true, |before| {
            before.status != node.status || before.active_task_count != node.active_task_count
        });
        if changed && node.is_eligible() {
            self.dispatcher.notify();
        }
        Ok(())
    }

    async fn acknowledge_task(&self, task_id: &str, node_id: &str) -> SchedulerResult<()> {
        self.dispatcher.acknowledge(task_id, node_id).await
    }

    async fn report_task_result(
        &self,
        task_id: &str,
        node_id: &str,
        outcome: TaskOutcome,
    ) -> SchedulerResult<()> {
        self.dispatcher
            .report_result(task_id, node_id, outcome)
            .await
    }
}
