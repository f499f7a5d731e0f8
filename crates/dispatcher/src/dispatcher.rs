//! 任务调度器
//!
//! Queued → Assigned 的唯一写入方。调度周期由周期锁串行化，每个周期依次：
//! 提升到期的重试任务、处理超时任务、检查主节点、计算空闲槽位、按优先级分配任务。
//! 任务记录通过版本号做乐观并发控制，冲突时重新加载后再判断。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recon_core::config::{DispatcherConfig, TaskConfig};
use recon_core::models::TaskLimits;
use recon_core::{
    Clock, Node, NodeClient, NodeStatus, SchedulerError, SchedulerResult, Task, TaskFilter,
    TaskOutcome, TaskRepository, TaskStatus, TaskSubmission,
};
use recon_infrastructure::SchedulerMetrics;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::node_registry::NodeRegistry;
use crate::retry_policy::{retry_policy_from_name, FixedDelayPolicy, RetryPolicy};
use crate::strategies::{strategy_from_name, LeastLoadedStrategy, TaskDispatchStrategy};
use crate::task_queue::TaskQueue;

/// 版本冲突时的最大重试次数
const MAX_UPDATE_ATTEMPTS: usize = 5;

const IN_FLIGHT: [TaskStatus; 2] = [TaskStatus::Assigned, TaskStatus::Running];

/// 调度器运行参数
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// 集群级并发上限
    pub max_concurrent_tasks: u32,
    pub queue_capacity: usize,
    pub enable_retry: bool,
    pub limits: TaskLimits,
    pub poll_interval: Duration,
}

impl DispatcherSettings {
    pub fn from_config(task: &TaskConfig, dispatcher: &DispatcherConfig) -> Self {
        Self {
            max_concurrent_tasks: task.max_concurrent_tasks,
            queue_capacity: task.queue_capacity,
            enable_retry: task.enable_retry,
            limits: task.default_limits(),
            poll_interval: Duration::from_millis(dispatcher.poll_interval_ms),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&TaskConfig::default(), &DispatcherConfig::default())
    }
}

/// 单个调度周期的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub promoted: usize,
    pub timed_out: usize,
    pub assigned: usize,
    /// 没有可用主节点，本周期未分配任务
    pub paused: bool,
}

/// 调度统计
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub in_flight: u64,
    pub by_status: HashMap<TaskStatus, u64>,
}

/// 乐观更新时对重新加载的任务做出的决定
enum Step {
    Write,
    Skip,
}

pub struct Dispatcher {
    pub(crate) tasks: Arc<dyn TaskRepository>,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) queue: TaskQueue,
    node_client: Arc<dyn NodeClient>,
    strategy: Arc<dyn TaskDispatchStrategy>,
    retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: SchedulerMetrics,
    settings: DispatcherSettings,
    cycle_lock: Mutex<()>,
    wake: Notify,
    stop_signal: Notify,
    running: RwLock<bool>,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        registry: Arc<NodeRegistry>,
        node_client: Arc<dyn NodeClient>,
        clock: Arc<dyn Clock>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            tasks,
            registry,
            queue: TaskQueue::new(settings.queue_capacity),
            node_client,
            strategy: Arc::new(LeastLoadedStrategy::new()),
            retry_policy: Arc::new(FixedDelayPolicy),
            clock,
            metrics: SchedulerMetrics::new(),
            settings,
            cycle_lock: Mutex::new(()),
            wake: Notify::new(),
            stop_signal: Notify::new(),
            running: RwLock::new(false),
        }
    }

    /// 按配置选择节点策略和重试策略
    pub fn with_config(mut self, config: &DispatcherConfig) -> Self {
        self.strategy = strategy_from_name(&config.dispatch_strategy);
        self.retry_policy = retry_policy_from_name(&config.retry_policy);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn TaskDispatchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// 唤醒调度循环
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// 提交扫描任务
    ///
    /// 先预留队列槽位再持久化，队列已满时直接返回 `CapacityExceeded`，不写入任何记录。
    /// 超时时间和重试间隔超出允许范围时返回 `InvalidTaskParams`。
    pub async fn submit(&self, submission: TaskSubmission) -> SchedulerResult<Task> {
        let now = self.clock.now();
        let mut task = Task::new(submission, self.settings.limits, now);
        if let Err(e) = task.validate_limits() {
            warn!("拒绝提交 {} 任务: {}", task.task_type, e);
            return Err(e);
        }

        let slot = match self.queue.try_reserve() {
            Ok(slot) => slot,
            Err(e) => {
                warn!(
                    "拒绝提交 {} 任务: 队列已满 ({}/{})",
                    task.task_type,
                    self.queue.len(),
                    self.queue.capacity()
                );
                self.metrics.record_capacity_rejected();
                return Err(e);
            }
        };

        task.mark_queued(now)?;
        self.tasks.create(&task).await?;
        slot.commit(&task);

        info!(
            "任务已提交: {} ({}), 类型: {}, 优先级: {:?}",
            task.name, task.id, task.task_type, task.priority
        );
        self.metrics.record_task_submitted(task.task_type);
        self.metrics.update_queue_length(self.queue.len());
        self.notify();
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        self.tasks.get_by_id(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        self.tasks.list(filter).await
    }

    pub async fn stats(&self) -> SchedulerResult<DispatcherStats> {
        let mut by_status = HashMap::new();
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Assigned,
            TaskStatus::Running,
            TaskStatus::Retrying,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            by_status.insert(status, self.tasks.count_by_status(&[status]).await?);
        }
        let in_flight = IN_FLIGHT
            .iter()
            .map(|s| by_status.get(s).copied().unwrap_or(0))
            .sum();

        Ok(DispatcherStats {
            queue_length: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            in_flight,
            by_status,
        })
    }

    /// 加载任务并应用修改，版本冲突时重新加载再试
    ///
    /// `mutate` 返回 [`Step::Skip`] 表示当前状态下无需写入，此时返回 `None`。
    async fn update_task<F>(&self, task_id: &str, mut mutate: F) -> SchedulerResult<Option<Task>>
    where
        F: FnMut(&mut Task) -> SchedulerResult<Step>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut task = self
                .tasks
                .get_by_id(task_id)
                .await?
                .ok_or_else(|| SchedulerError::task_not_found(task_id))?;

            if let Step::Skip = mutate(&mut task)? {
                return Ok(None);
            }

            match self.tasks.update(&task).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(SchedulerError::ConcurrentModification { .. }) => {
                    debug!("任务 {} 版本冲突，第 {} 次重新加载", task_id, attempt);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SchedulerError::ConcurrentModification {
            entity: "task",
            id: task_id.to_string(),
        })
    }

    /// 执行失败后根据重试策略决定进入 Retrying 还是 Failed，返回是否重试
    fn apply_failure(&self, task: &mut Task, error: String, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let retry = self.settings.enable_retry
            && self
                .retry_policy
                .should_retry(task.attempt_count, task.max_retries);
        let retry_at = retry.then(|| {
            self.retry_policy
                .next_retry_at(now, task.retry_interval_seconds, task.attempt_count)
        });
        task.fail(error, retry_at, now)?;
        Ok(retry)
    }

    /// 释放节点槽位，节点已被移除时忽略
    async fn release_node_slot(&self, node_id: &str, outcome: Option<bool>) -> SchedulerResult<()> {
        match self.registry.release_slot(node_id, outcome).await {
            Ok(()) | Err(SchedulerError::NodeNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 通知节点中止任务，不等待结果
    fn abort_on_node(&self, node_id: String, task_id: String) {
        let client = Arc::clone(&self.node_client);
        tokio::spawn(async move {
            if let Err(e) = client.abort(&node_id, &task_id).await {
                warn!("通知节点 {} 中止任务 {} 失败: {}", node_id, task_id, e);
            }
        });
    }

    /// 节点确认收到任务，Assigned → Running
    pub async fn acknowledge(&self, task_id: &str, node_id: &str) -> SchedulerResult<()> {
        let now = self.clock.now();
        let updated = self
            .update_task(task_id, |task| {
                if task.assigned_node_id.as_deref() != Some(node_id) {
                    warn!(
                        "忽略过期确认: 任务 {} 当前分配给 {:?}, 确认来自 {}",
                        task.id, task.assigned_node_id, node_id
                    );
                    return Ok(Step::Skip);
                }
                if task.status != TaskStatus::Assigned {
                    return Ok(Step::Skip);
                }
                task.mark_running(now)?;
                Ok(Step::Write)
            })
            .await?;

        if updated.is_some() {
            debug!("节点 {} 开始执行任务 {}", node_id, task_id);
        }
        Ok(())
    }

    /// 处理节点上报的执行结果
    ///
    /// 只接受当前分配节点的上报；节点失联后任务已被重新分配时，迟到的结果被忽略。
    pub async fn report_result(
        &self,
        task_id: &str,
        node_id: &str,
        outcome: TaskOutcome,
    ) -> SchedulerResult<()> {
        let now = self.clock.now();
        let mut retrying = false;
        let updated = self
            .update_task(task_id, |task| {
                if task.assigned_node_id.as_deref() != Some(node_id) || !task.status.is_in_flight() {
                    warn!(
                        "忽略过期的执行结果: 任务 {} 状态 {:?}, 上报节点 {}",
                        task.id, task.status, node_id
                    );
                    return Ok(Step::Skip);
                }
                match &outcome {
                    TaskOutcome::Succeeded(result) => {
                        if task.status == TaskStatus::Assigned {
                            task.mark_running(now)?;
                        }
                        task.complete(result.clone(), now)?;
                    }
                    TaskOutcome::Failed(message) => {
                        retrying = self.apply_failure(
                            task,
                            SchedulerError::TaskExecution(message.clone()).to_string(),
                            now,
                        )?;
                    }
                    TaskOutcome::TimedOut => {
                        let error = SchedulerError::TaskTimeout {
                            timeout_seconds: task.timeout_seconds,
                        };
                        retrying = self.apply_failure(task, error.to_string(), now)?;
                    }
                }
                Ok(Step::Write)
            })
            .await?;

        let Some(task) = updated else {
            return Ok(());
        };

        let succeeded = task.status == TaskStatus::Completed;
        self.release_node_slot(node_id, Some(succeeded)).await?;

        match task.status {
            TaskStatus::Completed => {
                let elapsed = task
                    .started_at
                    .map(|started| (now - started).num_milliseconds() as f64 / 1000.0)
                    .unwrap_or_default();
                info!("任务 {} 在节点 {} 上执行成功", task.id, node_id);
                self.metrics.record_task_completed(task.task_type, elapsed);
            }
            _ if retrying => {
                info!(
                    "任务 {} 第 {} 次执行失败，将于 {:?} 重试: {:?}",
                    task.id, task.attempt_count, task.next_retry_at, task.last_error
                );
                self.metrics.record_task_retry(task.task_type);
            }
            _ => {
                warn!(
                    "任务 {} 执行失败且不再重试 (已执行 {} 次): {:?}",
                    task.id, task.attempt_count, task.last_error
                );
                let reason = match outcome {
                    TaskOutcome::TimedOut => "timeout",
                    _ => "exhausted",
                };
                self.metrics.record_task_failed(task.task_type, reason);
            }
        }

        self.notify();
        Ok(())
    }

    /// 取消任务
    ///
    /// 队列中的任务直接移出队列；执行中的任务释放节点槽位并通知节点中止。
    /// 已结束的任务返回 `InvalidTransition`。
    pub async fn cancel(&self, task_id: &str) -> SchedulerResult<Task> {
        let now = self.clock.now();
        let mut released_node = None;
        let task = self
            .update_task(task_id, |task| {
                released_node = task
                    .status
                    .is_in_flight()
                    .then(|| task.assigned_node_id.clone())
                    .flatten();
                task.cancel(now)?;
                Ok(Step::Write)
            })
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(task_id))?;

        self.queue.remove(task_id);
        if let Some(node_id) = released_node {
            self.release_node_slot(&node_id, None).await?;
            self.abort_on_node(node_id, task.id.clone());
        }

        info!("任务已取消: {}", task.id);
        self.metrics.record_task_cancelled(task.task_type);
        self.metrics.update_queue_length(self.queue.len());
        self.notify();
        Ok(task)
    }

    /// 节点失联后重新分配其在途任务，不消耗尝试次数
    ///
    /// 队列已满时任务暂存为 Retrying，下个周期再尝试入队。
    /// 与调度周期互斥，周期内已写入的分配在这里一并收回。
    pub async fn on_node_lost(&self, node_id: &str) -> SchedulerResult<usize> {
        let _cycle = self.cycle_lock.lock().await;
        let filter = TaskFilter {
            statuses: IN_FLIGHT.to_vec(),
            node_id: Some(node_id.to_string()),
            ..Default::default()
        };
        let orphaned = self.tasks.list(&filter).await?;
        if orphaned.is_empty() {
            return Ok(0);
        }

        let now = self.clock.now();
        let mut requeued = 0;
        for task in orphaned {
            let still_assigned = |task: &Task| {
                task.assigned_node_id.as_deref() == Some(node_id) && task.status.is_in_flight()
            };

            match self.queue.try_reserve() {
                Ok(slot) => {
                    let updated = self
                        .update_task(&task.id, |task| {
                            if !still_assigned(task) {
                                return Ok(Step::Skip);
                            }
                            task.requeue_after_node_loss(now)?;
                            Ok(Step::Write)
                        })
                        .await?;
                    if let Some(task) = updated {
                        slot.commit(&task);
                        self.metrics.record_task_requeued("node_lost");
                        requeued += 1;
                    }
                }
                Err(_) => {
                    let updated = self
                        .update_task(&task.id, |task| {
                            if !still_assigned(task) {
                                return Ok(Step::Skip);
                            }
                            task.defer_admission(now, now)?;
                            Ok(Step::Write)
                        })
                        .await?;
                    if updated.is_some() {
                        warn!("队列已满，任务 {} 暂缓入队", task.id);
                        self.metrics.record_task_requeued("node_lost");
                        requeued += 1;
                    }
                }
            }
        }

        warn!("节点 {} 失联，重新分配了 {} 个任务", node_id, requeued);
        self.metrics.update_queue_length(self.queue.len());
        self.notify();
        Ok(requeued)
    }

    /// 执行一个调度周期
    pub async fn run_cycle(&self) -> SchedulerResult<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();
        let span = info_span!("dispatch_cycle");

        let result: SchedulerResult<CycleReport> = async {
            let mut report = CycleReport {
                promoted: self.promote_due_retries().await?,
                timed_out: self.time_out_overdue().await?,
                ..Default::default()
            };

            if !self.registry.has_master().await {
                debug!("没有可用的主节点，暂停调度");
                report.paused = true;
                return Ok(report);
            }

            report.assigned = self.assign_queued().await?;
            Ok(report)
        }
        .instrument(span)
        .await;

        self.metrics
            .record_dispatch_cycle(started.elapsed().as_secs_f64());
        self.metrics.update_queue_length(self.queue.len());
        if let Ok(in_flight) = self.tasks.count_by_status(&IN_FLIGHT).await {
            self.metrics.update_in_flight(in_flight);
        }

        if let Ok(report) = &result {
            if report.promoted + report.timed_out + report.assigned > 0 {
                debug!("调度周期完成: {:?}", report);
            }
        }
        result
    }

    /// 把到期的 Retrying 任务放回队列，队列满时留待下个周期
    async fn promote_due_retries(&self) -> SchedulerResult<usize> {
        let now = self.clock.now();
        let retrying = self
            .tasks
            .list(&TaskFilter::with_statuses(&[TaskStatus::Retrying]))
            .await?;

        let mut promoted = 0;
        for task in retrying.into_iter().filter(|t| t.is_retry_due(now)) {
            let Ok(slot) = self.queue.try_reserve() else {
                debug!("队列已满，剩余重试任务留待下个周期");
                break;
            };
            let updated = self
                .update_task(&task.id, |task| {
                    if !task.is_retry_due(now) {
                        return Ok(Step::Skip);
                    }
                    task.mark_queued(now)?;
                    Ok(Step::Write)
                })
                .await?;
            if let Some(task) = updated {
                debug!("重试任务 {} 重新入队 (第 {} 次执行后)", task.id, task.attempt_count);
                slot.commit(&task);
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// 处理超过截止时间的在途任务，超时从分配时刻起计算
    async fn time_out_overdue(&self) -> SchedulerResult<usize> {
        let now = self.clock.now();
        let in_flight = self
            .tasks
            .list(&TaskFilter::with_statuses(&IN_FLIGHT))
            .await?;

        let mut timed_out = 0;
        for task in in_flight.into_iter().filter(|t| t.is_timed_out(now)) {
            let Some(node_id) = task.assigned_node_id.clone() else {
                continue;
            };
            let mut retrying = false;
            let updated = self
                .update_task(&task.id, |task| {
                    if !task.is_timed_out(now) || task.assigned_node_id.as_deref() != Some(node_id.as_str())
                    {
                        return Ok(Step::Skip);
                    }
                    let error = SchedulerError::TaskTimeout {
                        timeout_seconds: task.timeout_seconds,
                    };
                    retrying = self.apply_failure(task, error.to_string(), now)?;
                    Ok(Step::Write)
                })
                .await?;

            let Some(task) = updated else {
                continue;
            };
            warn!(
                "任务 {} 在节点 {} 上执行超时 ({}秒)",
                task.id, node_id, task.timeout_seconds
            );
            self.release_node_slot(&node_id, Some(false)).await?;
            self.abort_on_node(node_id, task.id.clone());
            if retrying {
                self.metrics.record_task_retry(task.task_type);
            } else {
                self.metrics.record_task_failed(task.task_type, "timeout");
            }
            timed_out += 1;
        }
        Ok(timed_out)
    }

    /// 空闲槽位 = min(集群并发上限 - 在途任务数, 各可用节点空闲槽位之和)
    async fn free_slots(&self) -> SchedulerResult<usize> {
        let in_flight = self.tasks.count_by_status(&IN_FLIGHT).await?;
        let cluster_free = (self.settings.max_concurrent_tasks as u64).saturating_sub(in_flight);
        let node_free: u64 = self
            .registry
            .list_eligible()
            .await
            .iter()
            .map(|n| n.spare_capacity() as u64)
            .sum();
        Ok(cluster_free.min(node_free) as usize)
    }

    async fn assign_queued(&self) -> SchedulerResult<usize> {
        let slots = self.free_slots().await?;
        if slots == 0 || self.queue.is_empty() {
            return Ok(0);
        }

        let mut assigned = 0;
        for task_id in self.queue.peek(self.queue.len()) {
            if assigned >= slots {
                break;
            }

            let task = match self.tasks.get_by_id(&task_id).await? {
                Some(task) if task.status == TaskStatus::Queued => task,
                _ => {
                    debug!("移除队列中的失效任务 {}", task_id);
                    self.queue.remove(&task_id);
                    continue;
                }
            };

            let eligible = self.registry.list_eligible().await;
            if eligible.is_empty() {
                debug!("没有可用节点，剩余任务保持排队");
                break;
            }
            let candidates: Vec<Node> = eligible
                .into_iter()
                .filter(|node| node.supports(task.task_type))
                .collect();
            let Some(node) = self.strategy.select_node(&task, &candidates).cloned() else {
                debug!("没有支持 {} 的可用节点，任务 {} 保持排队", task.task_type, task.id);
                continue;
            };
            if !self.registry.increment_active(&node.id).await? {
                debug!("节点 {} 已无空闲槽位", node.id);
                continue;
            }

            let now = self.clock.now();
            let result = self
                .update_task(&task.id, |task| {
                    if task.status != TaskStatus::Queued {
                        return Ok(Step::Skip);
                    }
                    task.assign(&node.id, now)?;
                    Ok(Step::Write)
                })
                .await;

            let task = match result {
                Ok(Some(task)) => task,
                Ok(None) => {
                    self.release_node_slot(&node.id, None).await?;
                    self.queue.remove(&task_id);
                    continue;
                }
                Err(e) if e.is_fatal() => {
                    error!("任务 {} 分配冲突，中止本次调度周期: {}", task_id, e);
                    self.release_node_slot(&node.id, None).await?;
                    return Err(e);
                }
                Err(e) => {
                    warn!("分配任务 {} 失败: {}", task_id, e);
                    self.release_node_slot(&node.id, None).await?;
                    continue;
                }
            };
            self.queue.remove(&task.id);

            let node_alive = self
                .registry
                .get(&node.id)
                .await
                .is_some_and(|n| matches!(n.status, NodeStatus::Online | NodeStatus::Suspect));
            if !node_alive {
                warn!("节点 {} 在分配期间失联，撤销任务 {} 的分配", node.id, task.id);
                self.revert_delivery(&task.id, &node.id).await?;
                continue;
            }

            if let Err(e) = self.node_client.dispatch(&node, &task).await {
                warn!("任务 {} 下发到节点 {} 失败: {}", task.id, node.id, e);
                self.revert_delivery(&task.id, &node.id).await?;
                continue;
            }

            info!(
                "任务 {} 已分配给节点 {} (第 {} 次执行)",
                task.id, node.name, task.attempt_count
            );
            self.metrics.record_task_assigned(task.task_type);
            assigned += 1;
        }
        Ok(assigned)
    }

    /// 下发失败时撤销分配，不消耗尝试次数
    async fn revert_delivery(&self, task_id: &str, node_id: &str) -> SchedulerResult<()> {
        let now = self.clock.now();
        let reserved = self.queue.try_reserve();
        let updated = self
            .update_task(task_id, |task| {
                if task.assigned_node_id.as_deref() != Some(node_id) || !task.status.is_in_flight() {
                    return Ok(Step::Skip);
                }
                match &reserved {
                    Ok(_) => task.requeue_after_node_loss(now)?,
                    Err(_) => task.defer_admission(now, now)?,
                }
                Ok(Step::Write)
            })
            .await?;

        if let (Some(task), Ok(slot)) = (&updated, reserved) {
            if task.status == TaskStatus::Queued {
                slot.commit(task);
            }
        }
        self.release_node_slot(node_id, None).await?;
        self.metrics.record_task_requeued("delivery_failed");
        Ok(())
    }

    /// 运行调度循环，直到调用 [`Dispatcher::stop`]
    ///
    /// 新任务提交、结果上报和节点注册会立即唤醒循环，否则按轮询间隔执行。
    pub async fn start(&self) {
        *self.running.write().await = true;
        info!(
            "启动调度循环，轮询间隔 {:?}, 节点策略 {}, 重试策略 {}",
            self.settings.poll_interval,
            self.strategy.name(),
            self.retry_policy.name()
        );

        loop {
            if !*self.running.read().await {
                break;
            }

            if let Err(e) = self.run_cycle().await {
                error!("调度周期执行失败: {}", e);
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = self.stop_signal.notified() => {}
            }
        }

        info!("调度循环已退出");
    }

    pub async fn stop(&self) {
        info!("停止调度循环");
        *self.running.write().await = false;
        self.stop_signal.notify_one();
    }
}

/// 节点失联处理接口，由心跳监控在同一次巡检中调用
#[async_trait]
pub trait NodeLostHandler: Send + Sync {
    /// 返回重新分配的任务数
    async fn handle_node_lost(&self, node_id: &str) -> SchedulerResult<usize>;
}

#[async_trait]
impl NodeLostHandler for Dispatcher {
    async fn handle_node_lost(&self, node_id: &str) -> SchedulerResult<usize> {
        self.on_node_lost(node_id).await
    }
}
