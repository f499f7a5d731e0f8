//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, TimeZone, Utc};
use recon_core::models::TaskLimits;
use recon_core::{
    Node, NodeRegistration, NodeRole, NodeStatus, Task, TaskPriority, TaskStatus, TaskSubmission,
    TaskType,
};

/// Fixed starting instant shared by tests driven by `ManualClock`
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let submission = TaskSubmission::new(
            TaskType::PortScan,
            serde_json::json!({"target": "10.0.0.1", "ports": "1-1024"}),
            TaskPriority::Normal,
        );
        let limits = TaskLimits {
            max_retries: 3,
            timeout_seconds: 300,
            retry_interval_seconds: 10,
        };
        Self {
            task: Task::new(submission, limits, test_epoch()),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.task.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval_seconds: u64) -> Self {
        self.task.retry_interval_seconds = retry_interval_seconds;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self.task.updated_at = created_at;
        self
    }

    /// 已分配给节点的任务
    pub fn assigned_to(mut self, node_id: &str, at: DateTime<Utc>) -> Self {
        self.task.status = TaskStatus::Assigned;
        self.task.assigned_node_id = Some(node_id.to_string());
        self.task.assigned_at = Some(at);
        self.task.attempt_count = self.task.attempt_count.max(1);
        self
    }

    pub fn running_on(self, node_id: &str, at: DateTime<Utc>) -> Self {
        let mut builder = self.assigned_to(node_id, at);
        builder.task.status = TaskStatus::Running;
        builder.task.started_at = Some(at);
        builder
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Node entities
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new(name: &str) -> Self {
        let mut node = Node::new(
            NodeRegistration::new(name, "127.0.0.1:9000", 4),
            NodeRole::Worker,
            test_epoch(),
        );
        node.status = NodeStatus::Online;
        Self { node }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.node.id = id.to_string();
        self
    }

    pub fn with_capacity(mut self, max_concurrent_tasks: u32) -> Self {
        self.node.max_concurrent_tasks = max_concurrent_tasks;
        self
    }

    pub fn with_active_tasks(mut self, active: u32) -> Self {
        self.node.set_active_task_count(active);
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.node.status = status;
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.node.role = role;
        self
    }

    pub fn with_last_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.node.last_heartbeat_at = at;
        self
    }

    pub fn registered_at(mut self, at: DateTime<Utc>) -> Self {
        self.node.registered_at = at;
        self.node.last_heartbeat_at = at;
        self.node.updated_at = at;
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}
