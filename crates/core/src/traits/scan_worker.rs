use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Task, TaskType};

/// 扫描执行错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("无效的扫描参数: {0}")]
    InvalidPayload(String),
    #[error("扫描执行失败: {0}")]
    Execution(String),
    #[error("扫描已取消")]
    Cancelled,
}

/// 交给扫描引擎的执行上下文
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub task_id: String,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub attempt: u32,
    /// 执行截止时间，超过后节点会中止执行并上报超时
    pub deadline: DateTime<Utc>,
}

impl ScanContext {
    pub fn from_task(task: &Task, deadline: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type,
            payload: task.payload.clone(),
            attempt: task.attempt_count,
            deadline,
        }
    }
}

/// 扫描引擎契约
///
/// 子域名枚举、端口扫描、漏洞扫描、资产发现、敏感信息检测、页面监控各自实现此接口。
/// 同一任务可能因节点失联在多个节点上执行，实现必须能够容忍重复执行。
#[async_trait]
pub trait ScanWorker: Send + Sync {
    /// 负责的任务类型
    fn task_type(&self) -> TaskType;

    /// 引擎名称
    fn name(&self) -> &str;

    /// 执行扫描，截止时间由调用方强制
    async fn execute(&self, ctx: &ScanContext) -> Result<serde_json::Value, ScanError>;
}

/// 任务类型到扫描引擎的映射
#[derive(Default, Clone)]
pub struct ScanWorkerRegistry {
    workers: HashMap<TaskType, Arc<dyn ScanWorker>>,
}

impl ScanWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册扫描引擎，同类型已存在时替换并返回旧实现
    pub fn register(&mut self, worker: Arc<dyn ScanWorker>) -> Option<Arc<dyn ScanWorker>> {
        self.workers.insert(worker.task_type(), worker)
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn ScanWorker>> {
        self.workers.get(&task_type).cloned()
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.workers.contains_key(&task_type)
    }

    pub fn supported_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.workers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for ScanWorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanWorkerRegistry")
            .field("types", &self.supported_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticWorker(TaskType);

    #[async_trait]
    impl ScanWorker for StaticWorker {
        fn task_type(&self) -> TaskType {
            self.0
        }

        fn name(&self) -> &str {
            "static"
        }

        async fn execute(&self, ctx: &ScanContext) -> Result<serde_json::Value, ScanError> {
            Ok(json!({"task": ctx.task_id}))
        }
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let mut registry = ScanWorkerRegistry::new();
        assert!(registry.is_empty());

        assert!(registry
            .register(Arc::new(StaticWorker(TaskType::PortScan)))
            .is_none());
        registry.register(Arc::new(StaticWorker(TaskType::SubdomainEnum)));

        assert!(registry
            .register(Arc::new(StaticWorker(TaskType::PortScan)))
            .is_some());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(TaskType::PortScan));
        assert!(registry.get(TaskType::VulnScan).is_none());
        assert_eq!(
            registry.supported_types(),
            vec![TaskType::PortScan, TaskType::SubdomainEnum]
        );
    }
}
