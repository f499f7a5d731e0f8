//! 数据仓储层接口定义
//!
//! 任务和节点都作为按 ID 索引的文档存储，存储引擎本身对调度核心不透明。
//! 持久化存储是协调进程重启后恢复状态的唯一依据。
//!
//! ## 并发控制
//!
//! 任务记录使用乐观锁：[`Task::version`] 在每次成功写入后递增，
//! [`TaskRepository::update`] 只有在传入版本与存储版本一致时才会写入，
//! 否则返回 `SchedulerError::ConcurrentModification`，调用方需重新读取后再判断。
//! 节点记录由注册表在内存中加锁维护，仓储只做整条覆盖写入。

use async_trait::async_trait;

use crate::models::{Node, Task, TaskFilter, TaskStatus};
use crate::SchedulerResult;

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建新任务，ID 已存在时返回错误
    async fn create(&self, task: &Task) -> SchedulerResult<()>;

    /// 根据ID获取任务
    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>>;

    /// 按版本号条件更新任务
    ///
    /// 成功时返回写入后的任务（版本号已递增）。
    async fn update(&self, task: &Task) -> SchedulerResult<Task>;

    /// 按条件查询任务，按创建时间升序返回
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;

    /// 统计处于指定状态的任务数量
    async fn count_by_status(&self, statuses: &[TaskStatus]) -> SchedulerResult<u64>;
}

/// 节点仓储接口
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 创建或覆盖节点记录
    async fn upsert(&self, node: &Node) -> SchedulerResult<()>;

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Node>>;

    async fn list(&self) -> SchedulerResult<Vec<Node>>;

    /// 删除节点记录，记录不存在时返回 `NodeNotFound`
    async fn delete(&self, id: &str) -> SchedulerResult<()>;
}
