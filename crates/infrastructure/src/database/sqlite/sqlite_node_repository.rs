use async_trait::async_trait;
use recon_core::{Node, NodeRepository, SchedulerError, SchedulerResult};
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Node> {
        let document: String = row.try_get("document")?;
        Ok(serde_json::from_str(&document)?)
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn upsert(&self, node: &Node) -> SchedulerResult<()> {
        let document = serde_json::to_string(node)?;

        sqlx::query(
            r#"
            INSERT INTO nodes (id, name, status, registered_at, document)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                document = excluded.document
            "#,
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(node.status.as_str())
        .bind(node.registered_at.timestamp_millis())
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        debug!("保存节点成功: {} ({:?})", node.id, node.status);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Node>> {
        let row = sqlx::query("SELECT document FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn list(&self) -> SchedulerResult<Vec<Node>> {
        let rows = sqlx::query("SELECT document FROM nodes ORDER BY registered_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::decode).collect()
    }

    async fn delete(&self, id: &str) -> SchedulerResult<()> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::node_not_found(id));
        }

        debug!("删除节点成功: {}", id);
        Ok(())
    }
}
