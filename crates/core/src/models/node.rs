use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskType;

/// 节点角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Master,
    Worker,
}

/// 节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Registering,
    Online,
    Suspect,
    Offline,
    Removed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Registering => "registering",
            NodeStatus::Online => "online",
            NodeStatus::Suspect => "suspect",
            NodeStatus::Offline => "offline",
            NodeStatus::Removed => "removed",
        }
    }
}

/// 节点注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub name: String,
    pub address: String,
    pub max_concurrent_tasks: u32,
    /// 节点能够执行的任务类型，为空表示不限
    #[serde(default)]
    pub capabilities: Vec<TaskType>,
}

impl NodeRegistration {
    pub fn new(name: impl Into<String>, address: impl Into<String>, max_concurrent_tasks: u32) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            max_concurrent_tasks,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = TaskType>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }
}

/// 节点心跳
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHeartbeat {
    pub node_id: String,
    pub active_task_count: u32,
    /// 节点本地发送时间，只用于丢弃重复或乱序的心跳
    pub sent_at: DateTime<Utc>,
}

/// 节点注册表发出的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Registered { node_id: String, role: NodeRole },
    Online { node_id: String },
    Suspect { node_id: String },
    /// 节点被判定离线，其在途任务需要重新分配
    Lost { node_id: String },
    Removed { node_id: String },
    /// 主节点角色转移
    MasterChanged { node_id: String },
}

/// Worker节点信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub address: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub max_concurrent_tasks: u32,
    pub active_task_count: u32,
    #[serde(default)]
    pub capabilities: Vec<TaskType>,
    /// 协调进程收到最近一次心跳的时间
    pub last_heartbeat_at: DateTime<Utc>,
    /// 最近一次生效心跳携带的节点本地时间
    #[serde(default)]
    pub last_sent_at: Option<DateTime<Utc>>,
    pub offline_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_tasks: u64,
    #[serde(default)]
    pub failed_tasks: u64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// 创建新的节点记录，注册完成前处于 Registering 状态
    pub fn new(registration: NodeRegistration, role: NodeRole, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: registration.name,
            address: registration.address,
            role,
            status: NodeStatus::Registering,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            active_task_count: 0,
            capabilities: registration.capabilities,
            last_heartbeat_at: now,
            last_sent_at: None,
            offline_since: None,
            completed_tasks: 0,
            failed_tasks: 0,
            registered_at: now,
            updated_at: now,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }

    pub fn has_capacity(&self) -> bool {
        self.active_task_count < self.max_concurrent_tasks
    }

    /// 在线且仍有空闲并发槽位
    pub fn is_eligible(&self) -> bool {
        self.is_online() && self.has_capacity()
    }

    /// 能否执行指定类型的任务
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.is_empty() || self.capabilities.contains(&task_type)
    }

    pub fn spare_capacity(&self) -> u32 {
        self.max_concurrent_tasks.saturating_sub(self.active_task_count)
    }

    /// 负载率 (0.0 - 1.0)
    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            1.0
        } else {
            self.active_task_count as f64 / self.max_concurrent_tasks as f64
        }
    }

    pub fn set_active_task_count(&mut self, count: u32) {
        self.active_task_count = count.min(self.max_concurrent_tasks);
    }
}

/// 心跳判定阈值
#[derive(Debug, Clone, Copy)]
pub struct LivenessThresholds {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// 为空表示不自动移除离线节点
    pub auto_remove_after: Option<Duration>,
}

/// 根据当前时间和最后心跳时间计算节点应处的状态
///
/// 纯函数，不修改节点。Registering 和 Removed 由注册表显式管理，原样返回。
pub fn assess_liveness(
    now: DateTime<Utc>,
    node: &Node,
    thresholds: &LivenessThresholds,
) -> NodeStatus {
    match node.status {
        NodeStatus::Registering | NodeStatus::Removed => node.status,
        NodeStatus::Offline => {
            let offline_since = node.offline_since.unwrap_or(node.last_heartbeat_at);
            match thresholds.auto_remove_after {
                Some(grace) if now - offline_since > grace => NodeStatus::Removed,
                _ => NodeStatus::Offline,
            }
        }
        NodeStatus::Online | NodeStatus::Suspect => {
            let silence = now - node.last_heartbeat_at;
            if silence > thresholds.heartbeat_timeout {
                NodeStatus::Offline
            } else if silence > thresholds.heartbeat_interval {
                NodeStatus::Suspect
            } else {
                NodeStatus::Online
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> LivenessThresholds {
        LivenessThresholds {
            heartbeat_interval: Duration::seconds(10),
            heartbeat_timeout: Duration::seconds(30),
            auto_remove_after: Some(Duration::seconds(300)),
        }
    }

    fn online_node(now: DateTime<Utc>) -> Node {
        let mut node = Node::new(NodeRegistration::new("scanner-1", "10.0.0.5:9000", 4), NodeRole::Worker, now);
        node.status = NodeStatus::Online;
        node
    }

    #[test]
    fn test_liveness_transitions() {
        let now = Utc::now();
        let node = online_node(now);
        let t = thresholds();

        assert_eq!(assess_liveness(now + Duration::seconds(5), &node, &t), NodeStatus::Online);
        assert_eq!(assess_liveness(now + Duration::seconds(11), &node, &t), NodeStatus::Suspect);
        assert_eq!(assess_liveness(now + Duration::seconds(31), &node, &t), NodeStatus::Offline);
    }

    #[test]
    fn test_offline_auto_remove() {
        let now = Utc::now();
        let mut node = online_node(now);
        node.status = NodeStatus::Offline;
        node.offline_since = Some(now);

        let t = thresholds();
        assert_eq!(assess_liveness(now + Duration::seconds(299), &node, &t), NodeStatus::Offline);
        assert_eq!(assess_liveness(now + Duration::seconds(301), &node, &t), NodeStatus::Removed);

        let keep = LivenessThresholds {
            auto_remove_after: None,
            ..t
        };
        assert_eq!(assess_liveness(now + Duration::days(1), &node, &keep), NodeStatus::Offline);
    }

    #[test]
    fn test_registering_is_untouched() {
        let now = Utc::now();
        let node = Node::new(NodeRegistration::new("n", "addr", 1), NodeRole::Worker, now);
        assert_eq!(
            assess_liveness(now + Duration::hours(1), &node, &thresholds()),
            NodeStatus::Registering
        );
    }

    #[test]
    fn test_capacity_helpers() {
        let now = Utc::now();
        let mut node = online_node(now);
        assert!(node.is_eligible());
        assert_eq!(node.spare_capacity(), 4);

        node.set_active_task_count(10);
        assert_eq!(node.active_task_count, 4);
        assert!(!node.is_eligible());
        assert_eq!(node.load_ratio(), 1.0);

        node.set_active_task_count(1);
        assert_eq!(node.load_ratio(), 0.25);
    }

    #[test]
    fn test_capability_matching() {
        let now = Utc::now();
        let node = online_node(now);
        assert!(node.supports(TaskType::VulnScan));

        let registration = NodeRegistration::new("scanner-2", "10.0.0.6:9000", 2)
            .with_capabilities([TaskType::PortScan, TaskType::Discovery]);
        let node = Node::new(registration, NodeRole::Worker, now);
        assert!(node.supports(TaskType::PortScan));
        assert!(node.supports(TaskType::Discovery));
        assert!(!node.supports(TaskType::VulnScan));
        assert!(node.last_sent_at.is_none());
    }
}
