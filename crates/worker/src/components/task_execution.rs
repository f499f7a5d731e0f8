use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use recon_core::{
    Clock, CoordinatorApi, ScanContext, ScanWorker, ScanWorkerRegistry,
    SchedulerError, SchedulerResult, Task, TaskOutcome, TaskType,
};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// 节点侧任务执行管理
///
/// 每个任务在独立的 tokio 任务中执行，并发数由信号量限制，
/// 截止时间通过 `tokio::time::timeout` 强制。
pub struct TaskExecutionManager {
    scanners: ScanWorkerRegistry,
    coordinator: Arc<dyn CoordinatorApi>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    max_concurrent_tasks: usize,
    running_tasks: Arc<RwLock<HashMap<String, AbortHandle>>>,
}

impl TaskExecutionManager {
    pub fn new(
        scanners: ScanWorkerRegistry,
        coordinator: Arc<dyn CoordinatorApi>,
        clock: Arc<dyn Clock>,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            scanners,
            coordinator,
            clock,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks)),
            max_concurrent_tasks,
            running_tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn supported_task_types(&self) -> Vec<TaskType> {
        self.scanners.supported_types()
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks
    }

    pub async fn current_task_count(&self) -> usize {
        self.running_tasks.read().await.len()
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.running_tasks.read().await.contains_key(task_id)
    }

    /// 接收协调进程下发的任务并在后台执行
    ///
    /// 同一任务已在本节点执行时忽略重复下发。
    pub async fn handle_task_execution(&self, node_id: &str, task: Task) -> SchedulerResult<()> {
        let deadline = task.deadline().ok_or_else(|| {
            SchedulerError::invalid_params(format!("任务 {} 缺少分配时间", task.id))
        })?;

        let mut running_tasks = self.running_tasks.write().await;
        if running_tasks.contains_key(&task.id) {
            debug!("任务 {} 已在执行中，忽略重复下发", task.id);
            return Ok(());
        }

        info!(
            "接收任务: {} (类型: {}, 第 {} 次执行, 截止: {})",
            task.id, task.task_type, task.attempt_count, deadline
        );

        let context = ScanContext::from_task(&task, deadline);
        let scanner = self.scanners.get(task.task_type);
        let run = ExecutionRun {
            node_id: node_id.to_string(),
            coordinator: Arc::clone(&self.coordinator),
            clock: Arc::clone(&self.clock),
            permits: Arc::clone(&self.permits),
            running_tasks: Arc::clone(&self.running_tasks),
        };

        let handle = tokio::spawn(run.execute(context, scanner));
        running_tasks.insert(task.id, handle.abort_handle());
        Ok(())
    }

    /// 中止本节点上的任务，不再上报结果
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        match self.running_tasks.write().await.remove(task_id) {
            Some(handle) => {
                handle.abort();
                info!("任务 {} 已中止", task_id);
                true
            }
            None => {
                debug!("任务 {} 不在本节点运行，无需中止", task_id);
                false
            }
        }
    }

    /// 中止所有执行中的任务
    pub async fn cancel_all(&self) -> usize {
        let mut running_tasks = self.running_tasks.write().await;
        let count = running_tasks.len();
        for (_, handle) in running_tasks.drain() {
            handle.abort();
        }
        count
    }
}

/// 单个任务的执行过程
struct ExecutionRun {
    node_id: String,
    coordinator: Arc<dyn CoordinatorApi>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    running_tasks: Arc<RwLock<HashMap<String, AbortHandle>>>,
}

impl ExecutionRun {
    async fn execute(self, ctx: ScanContext, scanner: Option<Arc<dyn ScanWorker>>) {
        let task_id = ctx.task_id.clone();

        let Ok(_permit) = self.permits.acquire().await else {
            error!("执行槽位信号量已关闭，放弃任务 {}", task_id);
            return;
        };

        if let Err(e) = self.coordinator.acknowledge_task(&task_id, &self.node_id).await {
            warn!("确认任务 {} 失败: {}", task_id, e);
        }

        let started = Instant::now();
        let outcome = match scanner {
            Some(scanner) => self.run_scanner(scanner, &ctx).await,
            None => {
                error!("没有找到任务类型 '{}' 对应的扫描引擎", ctx.task_type);
                TaskOutcome::Failed(format!("不支持的任务类型: {}", ctx.task_type))
            }
        };

        match &outcome {
            TaskOutcome::Succeeded(_) => {
                info!("任务 {} 执行成功，耗时 {:?}", task_id, started.elapsed())
            }
            TaskOutcome::Failed(message) => warn!("任务 {} 执行失败: {}", task_id, message),
            TaskOutcome::TimedOut => warn!("任务 {} 执行超时", task_id),
        }

        self.running_tasks.write().await.remove(&task_id);

        if let Err(e) = self
            .coordinator
            .report_task_result(&task_id, &self.node_id, outcome)
            .await
        {
            error!("上报任务 {} 执行结果失败: {}", task_id, e);
        }
    }

    async fn run_scanner(&self, scanner: Arc<dyn ScanWorker>, ctx: &ScanContext) -> TaskOutcome {
        let remaining = (ctx.deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        debug!(
            "使用 {} 执行任务 {}，剩余时间 {:?}",
            scanner.name(),
            ctx.task_id,
            remaining
        );

        match tokio::time::timeout(remaining, scanner.execute(ctx)).await {
            Ok(Ok(result)) => TaskOutcome::Succeeded(result),
            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
            Err(_) => TaskOutcome::TimedOut,
        }
    }
}
