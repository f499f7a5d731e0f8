pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryNodeRepository, InMemoryTaskRepository};
pub use sqlite::{DatabaseManager, SqliteNodeRepository, SqliteTaskRepository};

use std::sync::Arc;

use anyhow::Result;
use recon_core::config::DatabaseConfig;
use recon_core::{NodeRepository, TaskRepository};
use tracing::info;

/// Database type detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Memory,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("memory://") {
            DatabaseType::Memory
        } else {
            DatabaseType::SQLite
        }
    }
}

/// 调度核心使用的仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub nodes: Arc<dyn NodeRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskRepository::new()),
            nodes: Arc::new(InMemoryNodeRepository::new()),
        }
    }
}

/// 根据数据库URL创建仓储，SQLite 会自动建表
pub async fn create_repositories(config: &DatabaseConfig) -> Result<Repositories> {
    match DatabaseType::from_url(&config.url) {
        DatabaseType::Memory => {
            info!("使用内存存储，进程重启后状态不会保留");
            Ok(Repositories::in_memory())
        }
        DatabaseType::SQLite => {
            let manager = DatabaseManager::new(config).await?;
            manager.migrate().await?;
            manager.health_check().await?;
            info!("SQLite存储已就绪: {}", config.url);

            let pool = manager.pool().clone();
            Ok(Repositories {
                tasks: Arc::new(SqliteTaskRepository::new(pool.clone())),
                nodes: Arc::new(SqliteNodeRepository::new(pool)),
            })
        }
    }
}
