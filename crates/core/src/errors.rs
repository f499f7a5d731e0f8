use thiserror::Error;

use crate::models::TaskStatus;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务队列已满: 容量 {capacity}")]
    CapacityExceeded { capacity: usize },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务执行超时: {timeout_seconds}秒")]
    TaskTimeout { timeout_seconds: u64 },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务分配冲突: 任务 {task_id} 已分配给节点 {node_id}")]
    AssignmentRace { task_id: String, node_id: String },

    #[error("无效的状态转换: 任务 {task_id} 无法从 {from:?} 转换到 {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("并发修改冲突: {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("无效的节点注册请求: {0}")]
    InvalidRegistration(String),

    #[error("节点不可达: {node_id} - {message}")]
    NodeUnreachable { node_id: String, message: String },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

impl SchedulerError {
    pub fn node_not_found<S: Into<String>>(id: S) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 执行类错误会交给重试策略处理，其余错误直接返回给调用方
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::TaskTimeout { .. } | SchedulerError::TaskExecution(_)
        )
    }

    /// 破坏调度不变量的错误，出现时必须中止当前调度周期
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::AssignmentRace { .. } | SchedulerError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SchedulerError::TaskTimeout { timeout_seconds: 30 }.is_retryable());
        assert!(SchedulerError::TaskExecution("dns failure".into()).is_retryable());
        assert!(!SchedulerError::CapacityExceeded { capacity: 3 }.is_retryable());
        assert!(!SchedulerError::node_not_found("n1").is_retryable());

        let race = SchedulerError::AssignmentRace {
            task_id: "t1".into(),
            node_id: "n1".into(),
        };
        assert!(race.is_fatal());
        assert!(!SchedulerError::task_not_found("t1").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = SchedulerError::CapacityExceeded { capacity: 3 };
        assert_eq!(err.to_string(), "任务队列已满: 容量 3");

        let err = SchedulerError::node_not_found("node-a");
        assert!(err.to_string().contains("node-a"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: SchedulerError = parse_err.into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
