use std::sync::Arc;

use recon_core::{NodeStatus, SchedulerResult, TaskFilter, TaskStatus};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;

/// 恢复结果报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub nodes_loaded: usize,
    /// 重新放入内存队列的任务
    pub requeued: usize,
    /// 队列容量不足、暂存为 Retrying 的任务
    pub deferred: usize,
    /// 所在节点已不可用而重新分配的在途任务
    pub orphaned: usize,
}

/// 协调进程重启后的状态恢复
///
/// 持久化存储是唯一可信来源：节点注册表和任务队列都从存储重建。
pub struct RecoveryService {
    dispatcher: Arc<Dispatcher>,
}

impl RecoveryService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn recover(&self) -> SchedulerResult<RecoveryReport> {
        info!("开始恢复调度状态");
        let dispatcher = &self.dispatcher;
        let mut report = RecoveryReport {
            nodes_loaded: dispatcher.registry.load_from_store().await?,
            ..Default::default()
        };

        self.restore_queue(&mut report).await?;
        self.recover_orphaned(&mut report).await?;

        dispatcher
            .metrics
            .update_queue_length(dispatcher.queue.len());
        info!(
            "状态恢复完成: {} 个节点, {} 个任务重新入队, {} 个任务暂缓, {} 个在途任务重新分配",
            report.nodes_loaded, report.requeued, report.deferred, report.orphaned
        );
        dispatcher.notify();
        Ok(report)
    }

    /// 按提交顺序把 Pending 和 Queued 任务放回内存队列
    async fn restore_queue(&self, report: &mut RecoveryReport) -> SchedulerResult<()> {
        let dispatcher = &self.dispatcher;
        let waiting = dispatcher
            .tasks
            .list(&TaskFilter::with_statuses(&[
                TaskStatus::Pending,
                TaskStatus::Queued,
            ]))
            .await?;

        for mut task in waiting {
            let now = dispatcher.clock.now();
            match dispatcher.queue.try_reserve() {
                Ok(slot) => {
                    if task.status == TaskStatus::Pending {
                        task.mark_queued(now)?;
                        task = dispatcher.tasks.update(&task).await?;
                    }
                    slot.commit(&task);
                    report.requeued += 1;
                }
                Err(_) => {
                    warn!("队列容量不足，任务 {} 暂缓入队", task.id);
                    task.defer_admission(now, now)?;
                    dispatcher.tasks.update(&task).await?;
                    report.deferred += 1;
                }
            }
        }
        Ok(())
    }

    /// 所在节点不存在或已离线的在途任务按节点失联处理
    async fn recover_orphaned(&self, report: &mut RecoveryReport) -> SchedulerResult<()> {
        let dispatcher = &self.dispatcher;
        let in_flight = dispatcher
            .tasks
            .list(&TaskFilter::with_statuses(&[
                TaskStatus::Assigned,
                TaskStatus::Running,
            ]))
            .await?;

        let mut lost_nodes: Vec<String> = Vec::new();
        for task in &in_flight {
            let Some(node_id) = &task.assigned_node_id else {
                continue;
            };
            let available = dispatcher
                .registry
                .get(node_id)
                .await
                .is_some_and(|node| matches!(node.status, NodeStatus::Online | NodeStatus::Suspect));
            if !available && !lost_nodes.contains(node_id) {
                lost_nodes.push(node_id.clone());
            }
        }

        for node_id in lost_nodes {
            warn!("节点 {} 已不可用，重新分配其在途任务", node_id);
            report.orphaned += dispatcher.on_node_lost(&node_id).await?;
        }
        Ok(())
    }
}
