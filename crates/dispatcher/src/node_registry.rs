//! 节点注册表
//!
//! 维护所有执行节点的内存视图，并写穿到 [`NodeRepository`]。
//! 映射表本身由读写锁保护，每个节点记录单独加锁，心跳之间互不阻塞。
//! 状态变化通过广播通道以 [`NodeEvent`] 的形式通知订阅者。

use std::collections::HashMap;
use std::sync::Arc;

use recon_core::models::{assess_liveness, LivenessThresholds};
use recon_core::{
    Clock, Node, NodeEvent, NodeHeartbeat, NodeRegistration, NodeRepository, NodeRole,
    NodeStatus, SchedulerError, SchedulerResult, TaskType,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

type NodeHandle = Arc<Mutex<Node>>;

/// 各状态节点数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub online: usize,
    pub suspect: usize,
    pub offline: usize,
}

pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, NodeHandle>>,
    /// 保证同名节点并发注册时只创建一条记录
    registration_lock: Mutex<()>,
    repository: Arc<dyn NodeRepository>,
    clock: Arc<dyn Clock>,
    master_node_name: Option<String>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeRegistry {
    pub fn new(
        repository: Arc<dyn NodeRepository>,
        clock: Arc<dyn Clock>,
        master_node_name: Option<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(HashMap::new()),
            registration_lock: Mutex::new(()),
            repository,
            clock,
            master_node_name,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: NodeEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(event);
    }

    async fn handle(&self, node_id: &str) -> SchedulerResult<NodeHandle> {
        self.nodes
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| SchedulerError::node_not_found(node_id))
    }

    async fn snapshots(&self) -> Vec<Node> {
        let handles: Vec<NodeHandle> = self.nodes.read().await.values().cloned().collect();
        let mut nodes = Vec::with_capacity(handles.len());
        for handle in handles {
            nodes.push(handle.lock().await.clone());
        }
        nodes.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    /// 从持久化存储重建注册表，用于协调进程重启
    ///
    /// 节点保持存储中的状态和最后心跳时间，由心跳监控按实际静默时长重新判定。
    pub async fn load_from_store(&self) -> SchedulerResult<usize> {
        let stored = self.repository.list().await?;
        let mut loaded = 0;
        {
            let mut nodes = self.nodes.write().await;
            for node in stored {
                if node.status == NodeStatus::Removed {
                    continue;
                }
                nodes.insert(node.id.clone(), Arc::new(Mutex::new(node)));
                loaded += 1;
            }
        }
        self.ensure_master().await?;
        info!("从存储恢复了 {} 个节点", loaded);
        Ok(loaded)
    }

    /// 注册节点
    ///
    /// 同名节点已存在时刷新原记录并沿用其ID，否则创建新记录。
    pub async fn register(&self, registration: NodeRegistration) -> SchedulerResult<(Node, NodeRole)> {
        if registration.name.trim().is_empty() {
            return Err(SchedulerError::InvalidRegistration(
                "节点名称不能为空".to_string(),
            ));
        }
        if registration.max_concurrent_tasks == 0 {
            return Err(SchedulerError::InvalidRegistration(format!(
                "节点 {} 的最大并发任务数必须大于0",
                registration.name
            )));
        }

        let _guard = self.registration_lock.lock().await;
        let now = self.clock.now();

        let existing = self
            .snapshots()
            .await
            .into_iter()
            .find(|n| n.name == registration.name);

        let node_id = match existing {
            Some(existing) => {
                let handle = self.handle(&existing.id).await?;
                let mut node = handle.lock().await;
                let previous = node.status;
                node.address = registration.address;
                node.max_concurrent_tasks = registration.max_concurrent_tasks;
                node.capabilities = registration.capabilities;
                let active = node.active_task_count;
                node.set_active_task_count(active);
                node.status = NodeStatus::Online;
                node.last_heartbeat_at = now;
                node.last_sent_at = None;
                node.offline_since = None;
                node.updated_at = now;
                self.repository.upsert(&node).await?;

                info!("节点重新注册: {} ({})", node.name, node.id);
                if previous != NodeStatus::Online {
                    self.emit(NodeEvent::Online {
                        node_id: node.id.clone(),
                    });
                }
                node.id.clone()
            }
            None => {
                let role = match &self.master_node_name {
                    Some(master) if *master == registration.name => NodeRole::Master,
                    _ => NodeRole::Worker,
                };
                let mut node = Node::new(registration, role, now);
                node.status = NodeStatus::Online;
                self.repository.upsert(&node).await?;

                info!(
                    "节点注册成功: {} ({}), 最大并发: {}",
                    node.name, node.id, node.max_concurrent_tasks
                );
                let node_id = node.id.clone();
                self.nodes
                    .write()
                    .await
                    .insert(node_id.clone(), Arc::new(Mutex::new(node)));
                self.emit(NodeEvent::Registered {
                    node_id: node_id.clone(),
                    role,
                });
                self.emit(NodeEvent::Online {
                    node_id: node_id.clone(),
                });
                node_id
            }
        };

        self.ensure_master().await?;

        let node = self.handle(&node_id).await?.lock().await.clone();
        let role = node.role;
        Ok((node, role))
    }

    /// 处理心跳
    ///
    /// 存活判定使用协调进程的到达时间，节点时钟偏差不影响在线状态。
    /// 节点本地发送时间只用于丢弃重复或乱序到达的心跳。
    pub async fn heartbeat(&self, heartbeat: NodeHeartbeat) -> SchedulerResult<Node> {
        let handle = self.handle(&heartbeat.node_id).await?;
        let now = self.clock.now();

        let mut node = handle.lock().await;
        if node.status == NodeStatus::Removed {
            return Err(SchedulerError::node_not_found(&heartbeat.node_id));
        }

        if let Some(last_sent_at) = node.last_sent_at {
            if heartbeat.sent_at <= last_sent_at {
                debug!(
                    "忽略过期心跳: 节点 {}, 发送时间 {}, 已记录 {}",
                    node.id, heartbeat.sent_at, last_sent_at
                );
                return Ok(node.clone());
            }
        }

        let previous = node.status;
        node.last_sent_at = Some(heartbeat.sent_at);
        node.last_heartbeat_at = now;
        node.set_active_task_count(heartbeat.active_task_count);
        node.status = NodeStatus::Online;
        node.offline_since = None;
        node.updated_at = now;
        self.repository.upsert(&node).await?;
        let snapshot = node.clone();
        drop(node);

        if previous != NodeStatus::Online {
            info!("节点 {} 恢复在线 (之前状态: {:?})", snapshot.id, previous);
            self.emit(NodeEvent::Online {
                node_id: snapshot.id.clone(),
            });
            if previous == NodeStatus::Offline {
                self.ensure_master().await?;
            }
        }

        Ok(snapshot)
    }

    pub async fn get(&self, node_id: &str) -> Option<Node> {
        match self.handle(node_id).await {
            Ok(handle) => Some(handle.lock().await.clone()),
            Err(_) => None,
        }
    }

    /// 按注册时间排序的全部节点
    pub async fn list(&self) -> Vec<Node> {
        self.snapshots().await
    }

    /// 在线且有空闲槽位的节点
    pub async fn list_eligible(&self) -> Vec<Node> {
        self.snapshots()
            .await
            .into_iter()
            .filter(Node::is_eligible)
            .collect()
    }

    /// 在线、有空闲槽位且能执行指定类型任务的节点
    pub async fn list_eligible_for(&self, task_type: TaskType) -> Vec<Node> {
        self.snapshots()
            .await
            .into_iter()
            .filter(|node| node.is_eligible() && node.supports(task_type))
            .collect()
    }

    pub async fn node_counts(&self) -> NodeCounts {
        let mut counts = NodeCounts::default();
        for node in self.snapshots().await {
            match node.status {
                NodeStatus::Online => counts.online += 1,
                NodeStatus::Suspect => counts.suspect += 1,
                NodeStatus::Offline => counts.offline += 1,
                NodeStatus::Registering | NodeStatus::Removed => {}
            }
        }
        counts
    }

    /// 当前可用的主节点，主节点离线或不存在时返回 None
    pub async fn master(&self) -> Option<Node> {
        self.snapshots().await.into_iter().find(|n| {
            let is_master = match &self.master_node_name {
                Some(name) => n.name == *name,
                None => n.role == NodeRole::Master,
            };
            is_master && matches!(n.status, NodeStatus::Online | NodeStatus::Suspect)
        })
    }

    pub async fn has_master(&self) -> bool {
        self.master().await.is_some()
    }

    /// 未指定主节点名称时，保证有且只有一个可用节点持有 Master 角色
    ///
    /// 原主节点离线或移除后，最早注册的在线节点接任。
    async fn ensure_master(&self) -> SchedulerResult<()> {
        if self.master_node_name.is_some() {
            return Ok(());
        }

        let nodes = self.snapshots().await;
        let current = nodes.iter().find(|n| {
            n.role == NodeRole::Master
                && matches!(n.status, NodeStatus::Online | NodeStatus::Suspect)
        });
        if current.is_some() {
            return Ok(());
        }

        let Some(candidate) = nodes.iter().find(|n| n.status == NodeStatus::Online) else {
            debug!("没有在线节点可以接任主节点");
            return Ok(());
        };
        let candidate_id = candidate.id.clone();
        let now = self.clock.now();

        for snapshot in &nodes {
            let should_be_master = snapshot.id == candidate_id;
            if (snapshot.role == NodeRole::Master) == should_be_master {
                continue;
            }
            let Ok(handle) = self.handle(&snapshot.id).await else {
                continue;
            };
            let mut node = handle.lock().await;
            node.role = if should_be_master {
                NodeRole::Master
            } else {
                NodeRole::Worker
            };
            node.updated_at = now;
            self.repository.upsert(&node).await?;
        }

        info!("主节点变更为: {}", candidate_id);
        self.emit(NodeEvent::MasterChanged {
            node_id: candidate_id,
        });
        Ok(())
    }

    /// 为任务占用节点的一个槽位，节点不在线或已满时返回 false
    pub async fn increment_active(&self, node_id: &str) -> SchedulerResult<bool> {
        let handle = self.handle(node_id).await?;
        let mut node = handle.lock().await;
        if !node.is_eligible() {
            return Ok(false);
        }
        node.active_task_count += 1;
        node.updated_at = self.clock.now();
        self.repository.upsert(&node).await?;
        Ok(true)
    }

    /// 释放节点槽位，`outcome` 为任务最终结果时同时累计统计
    pub async fn release_slot(&self, node_id: &str, outcome: Option<bool>) -> SchedulerResult<()> {
        let handle = self.handle(node_id).await?;
        let mut node = handle.lock().await;
        node.active_task_count = node.active_task_count.saturating_sub(1);
        match outcome {
            Some(true) => node.completed_tasks += 1,
            Some(false) => node.failed_tasks += 1,
            None => {}
        }
        node.updated_at = self.clock.now();
        self.repository.upsert(&node).await?;
        Ok(())
    }

    pub async fn mark_suspect(&self, node_id: &str) -> SchedulerResult<bool> {
        self.transition(node_id, NodeStatus::Suspect).await
    }

    /// 标记节点离线并发出 [`NodeEvent::Lost`]
    pub async fn mark_offline(&self, node_id: &str) -> SchedulerResult<bool> {
        self.transition(node_id, NodeStatus::Offline).await
    }

    pub async fn remove(&self, node_id: &str) -> SchedulerResult<bool> {
        self.transition(node_id, NodeStatus::Removed).await
    }

    /// 节点主动退出，先按离线处理再移除
    pub async fn unregister(&self, node_id: &str) -> SchedulerResult<()> {
        self.mark_offline(node_id).await?;
        self.remove(node_id).await?;
        info!("节点已注销: {}", node_id);
        Ok(())
    }

    /// 按心跳阈值重新判定节点状态，返回发生的状态变化
    ///
    /// 判定和状态变更在同一把节点锁内完成，期间到达的心跳不会被覆盖。
    pub async fn reassess(
        &self,
        node_id: &str,
        thresholds: &LivenessThresholds,
    ) -> SchedulerResult<Option<(NodeStatus, NodeStatus)>> {
        let handle = self.handle(node_id).await?;
        let mut node = handle.lock().await;
        let now = self.clock.now();
        let target = assess_liveness(now, &node, thresholds);
        if target == node.status {
            return Ok(None);
        }

        let previous = node.status;
        let event = self.apply_transition(&mut node, target).await?;
        drop(node);
        self.after_transition(node_id, target, event).await?;
        Ok(Some((previous, target)))
    }

    async fn transition(&self, node_id: &str, target: NodeStatus) -> SchedulerResult<bool> {
        let handle = self.handle(node_id).await?;
        let mut node = handle.lock().await;

        let allowed = match target {
            NodeStatus::Suspect => node.status == NodeStatus::Online,
            NodeStatus::Offline => matches!(
                node.status,
                NodeStatus::Online | NodeStatus::Suspect | NodeStatus::Registering
            ),
            NodeStatus::Removed => node.status != NodeStatus::Removed,
            NodeStatus::Online | NodeStatus::Registering => false,
        };
        if !allowed {
            debug!(
                "跳过节点状态变更: {} {:?} -> {:?}",
                node_id, node.status, target
            );
            return Ok(false);
        }

        let event = self.apply_transition(&mut node, target).await?;
        drop(node);
        self.after_transition(node_id, target, event).await?;
        Ok(true)
    }

    /// 在持有节点锁时修改状态并持久化，返回需要广播的事件
    async fn apply_transition(&self, node: &mut Node, target: NodeStatus) -> SchedulerResult<NodeEvent> {
        let now = self.clock.now();
        let node_id = node.id.clone();
        node.status = target;
        node.updated_at = now;

        let event = match target {
            NodeStatus::Suspect => {
                warn!("节点 {} 心跳缺失，标记为可疑", node_id);
                self.repository.upsert(node).await?;
                NodeEvent::Suspect { node_id }
            }
            NodeStatus::Offline => {
                warn!(
                    "节点 {} 心跳超时，标记为离线 (上次心跳: {})",
                    node_id,
                    node.last_heartbeat_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                node.offline_since = Some(now);
                node.active_task_count = 0;
                self.repository.upsert(node).await?;
                NodeEvent::Lost { node_id }
            }
            NodeStatus::Removed => {
                info!("移除节点 {}", node_id);
                match self.repository.delete(&node_id).await {
                    Ok(()) | Err(SchedulerError::NodeNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
                NodeEvent::Removed { node_id }
            }
            NodeStatus::Online | NodeStatus::Registering => {
                self.repository.upsert(node).await?;
                NodeEvent::Online { node_id }
            }
        };
        Ok(event)
    }

    async fn after_transition(
        &self,
        node_id: &str,
        target: NodeStatus,
        event: NodeEvent,
    ) -> SchedulerResult<()> {
        if target == NodeStatus::Removed {
            self.nodes.write().await.remove(node_id);
        }
        self.emit(event);
        if matches!(target, NodeStatus::Offline | NodeStatus::Removed) {
            self.ensure_master().await?;
        }
        Ok(())
    }
}
