use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use recon_core::{
    SchedulerError, SchedulerResult, Task, TaskFilter, TaskRepository, TaskStatus,
};
use tokio::sync::RwLock;
use tracing::debug;

/// 进程内任务存储
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn clear(&self) {
        self.tasks.write().await.clear();
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::DatabaseOperation(format!(
                "任务已存在: {}",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task.clone());
        debug!("创建任务成功: {}", task.id);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn update(&self, task: &Task) -> SchedulerResult<Task> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or_else(|| SchedulerError::task_not_found(&task.id))?;

        if stored.version != task.version {
            return Err(SchedulerError::ConcurrentModification {
                entity: "task",
                id: task.id.clone(),
            });
        }

        let mut updated = task.clone();
        updated.version += 1;
        *stored = updated.clone();
        debug!("更新任务成功: {} -> {:?}", task.id, task.status);
        Ok(updated)
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count_by_status(&self, statuses: &[TaskStatus]) -> SchedulerResult<u64> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| statuses.contains(&t.status)).count() as u64)
    }
}
