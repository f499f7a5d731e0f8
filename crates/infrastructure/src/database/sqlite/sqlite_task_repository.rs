use async_trait::async_trait;
use recon_core::{
    SchedulerError, SchedulerResult, Task, TaskFilter, TaskRepository, TaskStatus,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Task> {
        let document: String = row.try_get("document")?;
        Ok(serde_json::from_str(&document)?)
    }

    fn push_status_filter(builder: &mut QueryBuilder<'_, Sqlite>, statuses: &[TaskStatus]) {
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn create(&self, task: &Task) -> SchedulerResult<()> {
        let document = serde_json::to_string(task)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_type, status, priority, assigned_node_id, version, created_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&task.id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.priority as i64)
        .bind(&task.assigned_node_id)
        .bind(task.version as i64)
        .bind(task.created_at.timestamp_millis())
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        debug!("创建任务成功: {}", task.id);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT document FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::decode).transpose()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, version = task.version))]
    async fn update(&self, task: &Task) -> SchedulerResult<Task> {
        let mut updated = task.clone();
        updated.version += 1;
        let document = serde_json::to_string(&updated)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, priority = $3, assigned_node_id = $4, version = $5, document = $6
            WHERE id = $1 AND version = $7
            "#,
        )
        .bind(&task.id)
        .bind(updated.status.as_str())
        .bind(updated.priority as i64)
        .bind(&updated.assigned_node_id)
        .bind(updated.version as i64)
        .bind(document)
        .bind(task.version as i64)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
                .bind(&task.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(SchedulerError::Database)?
                .is_some();

            return Err(if exists {
                SchedulerError::ConcurrentModification {
                    entity: "task",
                    id: task.id.clone(),
                }
            } else {
                SchedulerError::task_not_found(&task.id)
            });
        }

        debug!("更新任务成功: {} -> {:?}", task.id, updated.status);
        Ok(updated)
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT document FROM tasks WHERE 1 = 1");

        if !filter.statuses.is_empty() {
            Self::push_status_filter(&mut builder, &filter.statuses);
        }
        if let Some(task_type) = filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type.as_str());
        }
        if let Some(node_id) = &filter.node_id {
            builder.push(" AND assigned_node_id = ").push_bind(node_id.clone());
        }
        builder.push(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::decode).collect()
    }

    async fn count_by_status(&self, statuses: &[TaskStatus]) -> SchedulerResult<u64> {
        if statuses.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM tasks WHERE 1 = 1");
        Self::push_status_filter(&mut builder, statuses);

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(row.try_get::<i64, _>("count")? as u64)
    }
}
