use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use recon_core::{Node, NodeClient, SchedulerError, SchedulerResult, Task};
use tokio::sync::RwLock;
use tracing::debug;

use crate::node_agent::NodeAgent;

/// 进程内的节点客户端
///
/// 协调进程和执行节点运行在同一进程时，直接调用已挂载的 [`NodeAgent`]。
#[derive(Default)]
pub struct LocalNodeClient {
    agents: RwLock<HashMap<String, Arc<NodeAgent>>>,
}

impl LocalNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂载已注册的节点
    pub async fn attach(&self, agent: Arc<NodeAgent>) -> SchedulerResult<()> {
        let node_id = agent.node_id().await.ok_or_else(|| {
            SchedulerError::Internal(format!("节点 {} 尚未注册，无法挂载", agent.name()))
        })?;
        debug!("挂载本地节点 {} ({})", agent.name(), node_id);
        self.agents.write().await.insert(node_id, agent);
        Ok(())
    }

    pub async fn detach(&self, node_id: &str) -> Option<Arc<NodeAgent>> {
        self.agents.write().await.remove(node_id)
    }

    async fn agent(&self, node_id: &str) -> SchedulerResult<Arc<NodeAgent>> {
        self.agents
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| SchedulerError::NodeUnreachable {
                node_id: node_id.to_string(),
                message: "节点不在本进程内".to_string(),
            })
    }
}

#[async_trait]
impl NodeClient for LocalNodeClient {
    async fn dispatch(&self, node: &Node, task: &Task) -> SchedulerResult<()> {
        self.agent(&node.id)
            .await?
            .handle_dispatch(task.clone())
            .await
    }

    async fn abort(&self, node_id: &str, task_id: &str) -> SchedulerResult<()> {
        self.agent(node_id).await?.handle_abort(task_id).await;
        Ok(())
    }
}
