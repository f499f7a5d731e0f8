//! Mock implementations of the coordinator-to-node channel
//!
//! Repositories need no mocks here: the in-memory implementations from
//! `recon-infrastructure` serve as test doubles.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recon_core::{Node, NodeClient, SchedulerError, SchedulerResult, Task};

/// 记录所有下发和中止请求的节点客户端
#[derive(Debug, Clone, Default)]
pub struct MockNodeClient {
    dispatched: Arc<Mutex<Vec<(String, String)>>>,
    aborted: Arc<Mutex<Vec<(String, String)>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
}

impl MockNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后所有发往该节点的下发请求都会失败
    pub fn set_unreachable(&self, node_id: &str, unreachable: bool) {
        let mut nodes = self.unreachable.lock().unwrap();
        if unreachable {
            nodes.insert(node_id.to_string());
        } else {
            nodes.remove(node_id);
        }
    }

    /// (node_id, task_id) 按下发顺序排列
    pub fn dispatched(&self) -> Vec<(String, String)> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatched_to(&self, node_id: &str) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .filter(|(node, _)| node == node_id)
            .map(|(_, task)| task.clone())
            .collect()
    }

    pub fn aborted(&self) -> Vec<(String, String)> {
        self.aborted.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.dispatched.lock().unwrap().clear();
        self.aborted.lock().unwrap().clear();
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn dispatch(&self, node: &Node, task: &Task) -> SchedulerResult<()> {
        if self.unreachable.lock().unwrap().contains(&node.id) {
            return Err(SchedulerError::NodeUnreachable {
                node_id: node.id.clone(),
                message: "mock: connection refused".to_string(),
            });
        }
        self.dispatched
            .lock()
            .unwrap()
            .push((node.id.clone(), task.id.clone()));
        Ok(())
    }

    async fn abort(&self, node_id: &str, task_id: &str) -> SchedulerResult<()> {
        self.aborted
            .lock()
            .unwrap()
            .push((node_id.to_string(), task_id.to_string()));
        Ok(())
    }
}
