use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use recon_core::{Node, NodeRepository, SchedulerError, SchedulerResult};
use tokio::sync::RwLock;

/// 进程内节点存储
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeRepository {
    nodes: Arc<RwLock<HashMap<String, Node>>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn upsert(&self, node: &Node) -> SchedulerResult<()> {
        self.nodes
            .write()
            .await
            .insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Node>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn delete(&self, id: &str) -> SchedulerResult<()> {
        self.nodes
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::node_not_found(id))
    }
}
