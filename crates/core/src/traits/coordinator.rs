use async_trait::async_trait;

use crate::models::{Node, NodeHeartbeat, NodeRegistration, NodeRole, Task, TaskOutcome};
use crate::SchedulerResult;

/// 节点调用协调进程的接口
///
/// 节点启动时注册，随后定期发送心跳，并上报收到的任务和执行结果。
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// 注册节点，返回节点ID和分配到的角色
    async fn register_node(&self, registration: NodeRegistration)
        -> SchedulerResult<(String, NodeRole)>;

    /// 发送心跳，节点已被移除时返回 `NodeNotFound`，节点需要重新注册
    async fn send_heartbeat(&self, heartbeat: NodeHeartbeat) -> SchedulerResult<()>;

    /// 确认收到任务并开始执行
    async fn acknowledge_task(&self, task_id: &str, node_id: &str) -> SchedulerResult<()>;

    /// 上报任务执行结果
    async fn report_task_result(
        &self,
        task_id: &str,
        node_id: &str,
        outcome: TaskOutcome,
    ) -> SchedulerResult<()>;
}

/// 协调进程向节点下发指令的接口
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// 将已分配的任务交给节点执行
    async fn dispatch(&self, node: &Node, task: &Task) -> SchedulerResult<()>;

    /// 通知节点中止任务，尽力而为
    async fn abort(&self, node_id: &str, task_id: &str) -> SchedulerResult<()>;
}
