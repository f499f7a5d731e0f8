use std::sync::Arc;

use chrono::Duration;
use recon_core::config::DatabaseConfig;
use recon_core::{
    NodeRepository, NodeStatus, SchedulerError, TaskFilter, TaskPriority, TaskRepository,
    TaskStatus, TaskType,
};
use recon_infrastructure::{create_repositories, Repositories};
use recon_testing_utils::{test_epoch, NodeBuilder, TaskBuilder};
use tempfile::TempDir;

async fn sqlite_repositories() -> (Repositories, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("recon.db").display());
    let config = DatabaseConfig {
        url,
        max_connections: 2,
    };
    let repos = create_repositories(&config).await.unwrap();
    (repos, dir)
}

async fn check_task_crud(tasks: Arc<dyn TaskRepository>) {
    let task = TaskBuilder::new().with_name("scan-a").build();
    tasks.create(&task).await.unwrap();
    assert!(tasks.create(&task).await.is_err());

    let loaded = tasks.get_by_id(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "scan-a");
    assert_eq!(loaded.version, 0);
    assert!(tasks.get_by_id("missing").await.unwrap().is_none());

    let mut queued = loaded.clone();
    queued.mark_queued(test_epoch()).unwrap();
    let stored = tasks.update(&queued).await.unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.status, TaskStatus::Queued);

    let reloaded = tasks.get_by_id(&task.id).await.unwrap().unwrap();
    assert_eq!(reloaded.version, 1);
    assert_eq!(reloaded.status, TaskStatus::Queued);
}

async fn check_version_conflict(tasks: Arc<dyn TaskRepository>) {
    let task = TaskBuilder::new().build();
    tasks.create(&task).await.unwrap();

    let mut first = task.clone();
    first.mark_queued(test_epoch()).unwrap();
    tasks.update(&first).await.unwrap();

    // 基于旧版本的第二次写入必须失败
    let mut stale = task.clone();
    stale.cancel(test_epoch()).unwrap();
    let err = tasks.update(&stale).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ConcurrentModification { .. }));

    let current = tasks.get_by_id(&task.id).await.unwrap().unwrap();
    assert_eq!(current.status, TaskStatus::Queued);

    let missing = TaskBuilder::new().with_id("no-such-task").build();
    let err = tasks.update(&missing).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound { .. }));
}

async fn check_task_queries(tasks: Arc<dyn TaskRepository>) {
    let base = test_epoch();
    let first = TaskBuilder::new()
        .with_created_at(base)
        .with_status(TaskStatus::Queued)
        .build();
    let second = TaskBuilder::new()
        .with_created_at(base + Duration::seconds(1))
        .with_task_type(TaskType::VulnScan)
        .with_priority(TaskPriority::Critical)
        .assigned_to("node-1", base)
        .build();
    let third = TaskBuilder::new()
        .with_created_at(base + Duration::seconds(2))
        .running_on("node-2", base)
        .build();

    for task in [&third, &first, &second] {
        tasks.create(task).await.unwrap();
    }

    let all = tasks.list(&TaskFilter::default()).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str(), third.id.as_str()]);

    let in_flight = tasks
        .list(&TaskFilter::with_statuses(&[TaskStatus::Assigned, TaskStatus::Running]))
        .await
        .unwrap();
    assert_eq!(in_flight.len(), 2);

    let on_node = tasks
        .list(&TaskFilter {
            node_id: Some("node-2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(on_node.len(), 1);
    assert_eq!(on_node[0].id, third.id);

    let vuln = tasks
        .list(&TaskFilter {
            task_type: Some(TaskType::VulnScan),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(vuln.len(), 1);
    assert_eq!(vuln[0].priority, TaskPriority::Critical);

    let limited = tasks
        .list(&TaskFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    assert_eq!(
        tasks
            .count_by_status(&[TaskStatus::Assigned, TaskStatus::Running])
            .await
            .unwrap(),
        2
    );
    assert_eq!(tasks.count_by_status(&[TaskStatus::Failed]).await.unwrap(), 0);
    assert_eq!(tasks.count_by_status(&[]).await.unwrap(), 0);
}

async fn check_node_crud(nodes: Arc<dyn NodeRepository>) {
    let base = test_epoch();
    let older = NodeBuilder::new("scanner-a").registered_at(base).build();
    let mut newer = NodeBuilder::new("scanner-b")
        .registered_at(base + Duration::seconds(5))
        .build();

    nodes.upsert(&newer).await.unwrap();
    nodes.upsert(&older).await.unwrap();

    newer.status = NodeStatus::Suspect;
    newer.completed_tasks = 7;
    nodes.upsert(&newer).await.unwrap();

    let listed = nodes.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, "scanner-a");
    assert_eq!(listed[1].status, NodeStatus::Suspect);
    assert_eq!(listed[1].completed_tasks, 7);

    let loaded = nodes.get_by_id(&older.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "scanner-a");

    nodes.delete(&older.id).await.unwrap();
    assert!(nodes.get_by_id(&older.id).await.unwrap().is_none());
    let err = nodes.delete(&older.id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NodeNotFound { .. }));
}

#[tokio::test]
async fn test_memory_task_repository() {
    let repos = Repositories::in_memory();
    check_task_crud(repos.tasks.clone()).await;
    check_version_conflict(repos.tasks.clone()).await;
}

#[tokio::test]
async fn test_memory_task_queries() {
    check_task_queries(Repositories::in_memory().tasks).await;
}

#[tokio::test]
async fn test_memory_node_repository() {
    check_node_crud(Repositories::in_memory().nodes).await;
}

#[tokio::test]
async fn test_sqlite_task_repository() {
    let (repos, _dir) = sqlite_repositories().await;
    check_task_crud(repos.tasks.clone()).await;
    check_version_conflict(repos.tasks.clone()).await;
}

#[tokio::test]
async fn test_sqlite_task_queries() {
    let (repos, _dir) = sqlite_repositories().await;
    check_task_queries(repos.tasks).await;
}

#[tokio::test]
async fn test_sqlite_node_repository() {
    let (repos, _dir) = sqlite_repositories().await;
    check_node_crud(repos.nodes).await;
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("recon.db").display()),
        max_connections: 1,
    };

    let task = TaskBuilder::new().running_on("node-1", test_epoch()).build();
    {
        let repos = create_repositories(&config).await.unwrap();
        repos.tasks.create(&task).await.unwrap();
    }

    let reopened = create_repositories(&config).await.unwrap();
    let loaded = reopened.tasks.get_by_id(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Running);
    assert_eq!(loaded.assigned_node_id.as_deref(), Some("node-1"));
}
