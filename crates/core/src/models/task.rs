use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SchedulerError, SchedulerResult};

/// 单次执行超时上限（7天）
pub const MAX_TIMEOUT_SECONDS: u64 = 7 * 24 * 3600;
/// 重试间隔上限（1天）
pub const MAX_RETRY_INTERVAL_SECONDS: u64 = 24 * 3600;

/// 秒数转换为时间间隔，超出表示范围时返回 `None`
pub fn seconds_delta(seconds: u64) -> Option<Duration> {
    i64::try_from(seconds).ok().and_then(Duration::try_seconds)
}

/// `now + seconds`，溢出时取可表示的最大时间
pub fn saturating_add_seconds(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    seconds_delta(seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 校验任务的超时时间和重试间隔
pub fn validate_task_durations(timeout_seconds: u64, retry_interval_seconds: u64) -> SchedulerResult<()> {
    if timeout_seconds == 0 || timeout_seconds > MAX_TIMEOUT_SECONDS {
        return Err(SchedulerError::invalid_params(format!(
            "任务超时时间必须在 1 到 {MAX_TIMEOUT_SECONDS} 秒之间，当前为 {timeout_seconds}"
        )));
    }
    if retry_interval_seconds > MAX_RETRY_INTERVAL_SECONDS {
        return Err(SchedulerError::invalid_params(format!(
            "重试间隔不能超过 {MAX_RETRY_INTERVAL_SECONDS} 秒，当前为 {retry_interval_seconds}"
        )));
    }
    Ok(())
}

/// 扫描任务类型
///
/// 调度核心只关心类型标签，具体扫描逻辑由对应的 [`crate::traits::ScanWorker`] 实现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 子域名枚举
    SubdomainEnum,
    /// 端口扫描
    PortScan,
    /// 漏洞扫描
    VulnScan,
    /// 资产发现
    Discovery,
    /// 敏感信息检测
    SensitiveDetect,
    /// 页面监控
    PageMonitor,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::SubdomainEnum,
        TaskType::PortScan,
        TaskType::VulnScan,
        TaskType::Discovery,
        TaskType::SensitiveDetect,
        TaskType::PageMonitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SubdomainEnum => "subdomain_enum",
            TaskType::PortScan => "port_scan",
            TaskType::VulnScan => "vuln_scan",
            TaskType::Discovery => "discovery",
            TaskType::SensitiveDetect => "sensitive_detect",
            TaskType::PageMonitor => "page_monitor",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务优先级，数值越大越先调度
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

/// 任务状态
///
/// ```text
/// Pending → Queued → Assigned → Running → Completed
///             ↑                    ↓
///             └──── Retrying ←─────┴──→ Failed
/// 任意非终止状态 → Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 已分配给节点、占用并发槽位的状态
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    /// 状态机允许的转换
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Retrying)
                | (Queued, Assigned)
                | (Queued, Retrying)
                | (Assigned, Running)
                | (Assigned, Queued)
                | (Assigned, Retrying)
                | (Assigned, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retrying)
                | (Running, Queued)
                | (Retrying, Queued)
        )
    }
}

/// 任务提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 以下字段为空时使用全局配置
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry_interval_seconds: Option<u64>,
}

impl TaskSubmission {
    pub fn new(task_type: TaskType, payload: serde_json::Value, priority: TaskPriority) -> Self {
        Self {
            task_type,
            payload,
            priority,
            name: None,
            tags: Vec::new(),
            max_retries: None,
            timeout_seconds: None,
            retry_interval_seconds: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_retry_interval(mut self, retry_interval_seconds: u64) -> Self {
        self.retry_interval_seconds = Some(retry_interval_seconds);
        self
    }
}

/// 提交时未指定的任务限制取值
#[derive(Debug, Clone, Copy)]
pub struct TaskLimits {
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub retry_interval_seconds: u64,
}

/// 任务执行结果上报
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
    /// 节点侧执行超过截止时间
    TimedOut,
}

/// 扫描任务记录
///
/// 作为文档按 `id` 持久化。除提交接口创建外，只允许调度器、心跳监控和
/// 执行结果回调修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub retry_interval_seconds: u64,
    pub timeout_seconds: u64,
    pub assigned_node_id: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    /// 节点失联导致的重新入队不消耗尝试次数
    #[serde(default)]
    pub attempt_preserved: bool,
    /// 乐观锁版本号
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 根据提交请求创建 Pending 状态的任务
    pub fn new(submission: TaskSubmission, limits: TaskLimits, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4().to_string();
        let name = submission
            .name
            .unwrap_or_else(|| format!("{}-{}", submission.task_type, &id[..8]));

        Self {
            id,
            name,
            task_type: submission.task_type,
            priority: submission.priority,
            payload: submission.payload,
            tags: submission.tags,
            status: TaskStatus::Pending,
            attempt_count: 0,
            max_retries: submission.max_retries.unwrap_or(limits.max_retries),
            retry_interval_seconds: submission
                .retry_interval_seconds
                .unwrap_or(limits.retry_interval_seconds),
            timeout_seconds: submission.timeout_seconds.unwrap_or(limits.timeout_seconds),
            assigned_node_id: None,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            last_error: None,
            result: None,
            attempt_preserved: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 校验解析后的超时时间和重试间隔
    pub fn validate_limits(&self) -> SchedulerResult<()> {
        validate_task_durations(self.timeout_seconds, self.retry_interval_seconds)
    }

    fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> SchedulerResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    fn release_node(&mut self) {
        self.assigned_node_id = None;
        self.assigned_at = None;
    }

    /// 进入有界队列
    pub fn mark_queued(&mut self, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.transition(TaskStatus::Queued, now)?;
        self.next_retry_at = None;
        Ok(())
    }

    /// 分配给节点，除非上一次是基础设施导致的重新入队，否则消耗一次尝试
    pub fn assign(&mut self, node_id: &str, now: DateTime<Utc>) -> SchedulerResult<()> {
        if let Some(existing) = &self.assigned_node_id {
            return Err(SchedulerError::AssignmentRace {
                task_id: self.id.clone(),
                node_id: existing.clone(),
            });
        }
        self.transition(TaskStatus::Assigned, now)?;
        if self.attempt_preserved {
            self.attempt_preserved = false;
        } else {
            self.attempt_count += 1;
        }
        self.assigned_node_id = Some(node_id.to_string());
        self.assigned_at = Some(now);
        self.started_at = None;
        Ok(())
    }

    /// 节点确认收到任务
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.transition(TaskStatus::Running, now)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.transition(TaskStatus::Completed, now)?;
        self.release_node();
        self.result = Some(result);
        self.last_error = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// 执行失败，`retry_at` 为空表示不再重试
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        match retry_at {
            Some(at) => {
                self.transition(TaskStatus::Retrying, now)?;
                self.next_retry_at = Some(at);
            }
            None => {
                self.transition(TaskStatus::Failed, now)?;
                self.completed_at = Some(now);
            }
        }
        self.release_node();
        self.last_error = Some(error.into());
        Ok(())
    }

    /// 节点失联后重新入队
    pub fn requeue_after_node_loss(&mut self, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.transition(TaskStatus::Queued, now)?;
        self.release_node();
        self.started_at = None;
        self.attempt_preserved = true;
        Ok(())
    }

    /// 推迟入队：队列已满时暂存为 Retrying，`at` 到期后再次尝试入队
    pub fn defer_admission(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> SchedulerResult<()> {
        let was_in_flight = self.status.is_in_flight();
        self.transition(TaskStatus::Retrying, now)?;
        if was_in_flight {
            self.attempt_preserved = true;
        }
        self.release_node();
        self.next_retry_at = Some(at);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.transition(TaskStatus::Cancelled, now)?;
        self.release_node();
        self.next_retry_at = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// 任务执行截止时间，从分配时刻起计算
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.assigned_at
            .map(|at| saturating_add_seconds(at, self.timeout_seconds))
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.status.is_in_flight() && self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Retrying && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Vec<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub node_id: Option<String>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_statuses(statuses: &[TaskStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if let Some(task_type) = self.task_type {
            if task.task_type != task_type {
                return false;
            }
        }
        if let Some(node_id) = &self.node_id {
            if task.assigned_node_id.as_deref() != Some(node_id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> TaskLimits {
        TaskLimits {
            max_retries: 2,
            timeout_seconds: 60,
            retry_interval_seconds: 10,
        }
    }

    fn new_task() -> Task {
        let submission = TaskSubmission::new(
            TaskType::PortScan,
            json!({"target": "10.0.0.1"}),
            TaskPriority::High,
        );
        Task::new(submission, limits(), Utc::now())
    }

    #[test]
    fn test_task_creation_uses_limits() {
        let task = new_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_retries, 2);
        assert_eq!(task.timeout_seconds, 60);
        assert_eq!(task.attempt_count, 0);
        assert!(task.name.starts_with("port_scan-"));

        let submission = TaskSubmission::new(TaskType::VulnScan, json!({}), TaskPriority::Low)
            .with_max_retries(5)
            .with_timeout(600);
        let task = Task::new(submission, limits(), Utc::now());
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.timeout_seconds, 600);
        assert_eq!(task.retry_interval_seconds, 10);
    }

    #[test]
    fn test_full_success_lifecycle() {
        let now = Utc::now();
        let mut task = new_task();
        task.mark_queued(now).unwrap();
        task.assign("node-1", now).unwrap();
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.assigned_node_id.as_deref(), Some("node-1"));

        task.mark_running(now).unwrap();
        task.complete(json!({"open_ports": [22, 443]}), now).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.assigned_node_id.is_none());
        assert!(task.result.is_some());
    }

    #[test]
    fn test_assign_twice_is_race() {
        let now = Utc::now();
        let mut task = new_task();
        task.mark_queued(now).unwrap();
        task.assign("node-1", now).unwrap();

        let err = task.assign("node-2", now).unwrap_err();
        assert!(matches!(err, SchedulerError::AssignmentRace { .. }));
        assert_eq!(task.assigned_node_id.as_deref(), Some("node-1"));
    }

    #[test]
    fn test_node_loss_preserves_attempt() {
        let now = Utc::now();
        let mut task = new_task();
        task.mark_queued(now).unwrap();
        task.assign("node-1", now).unwrap();
        task.mark_running(now).unwrap();

        task.requeue_after_node_loss(now).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempt_count, 1);
        assert!(task.assigned_node_id.is_none());

        task.assign("node-2", now).unwrap();
        assert_eq!(task.attempt_count, 1);
        assert!(!task.attempt_preserved);
    }

    #[test]
    fn test_fail_with_and_without_retry() {
        let now = Utc::now();
        let mut task = new_task();
        task.mark_queued(now).unwrap();
        task.assign("node-1", now).unwrap();
        task.mark_running(now).unwrap();

        let retry_at = now + Duration::seconds(10);
        task.fail("connection refused", Some(retry_at), now).unwrap();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert_eq!(task.next_retry_at, Some(retry_at));
        assert!(!task.is_retry_due(now));
        assert!(task.is_retry_due(retry_at));

        task.mark_queued(retry_at).unwrap();
        task.assign("node-1", retry_at).unwrap();
        task.fail("connection refused", None, retry_at).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_cancel_rules() {
        let now = Utc::now();
        let mut task = new_task();
        task.mark_queued(now).unwrap();
        task.cancel(now).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);

        let err = task.cancel(now).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    }

    #[test]
    fn test_invalid_transitions() {
        use TaskStatus::*;
        assert!(!Pending.can_transition_to(Assigned));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(Cancelled));
        assert!(Retrying.can_transition_to(Cancelled));
    }

    #[test]
    fn test_timeout_detection() {
        let now = Utc::now();
        let mut task = new_task();
        task.mark_queued(now).unwrap();
        task.assign("node-1", now).unwrap();

        assert!(!task.is_timed_out(now + Duration::seconds(59)));
        assert!(task.is_timed_out(now + Duration::seconds(60)));
    }

    #[test]
    fn test_duration_bounds() {
        assert!(validate_task_durations(60, 0).is_ok());
        assert!(validate_task_durations(MAX_TIMEOUT_SECONDS, MAX_RETRY_INTERVAL_SECONDS).is_ok());
        assert!(validate_task_durations(0, 10).is_err());
        assert!(validate_task_durations(MAX_TIMEOUT_SECONDS + 1, 10).is_err());
        assert!(validate_task_durations(u64::MAX, 10).is_err());
        assert!(validate_task_durations(60, MAX_RETRY_INTERVAL_SECONDS + 1).is_err());
        assert!(validate_task_durations(60, 10_000_000_000_000_000).is_err());
    }

    #[test]
    fn test_deadline_saturates_on_huge_timeout() {
        let now = Utc::now();
        for timeout in [u64::MAX, 10_000_000_000_000_000] {
            let mut task = new_task();
            task.timeout_seconds = timeout;
            assert!(task.validate_limits().is_err());
            task.mark_queued(now).unwrap();
            task.assign("node-1", now).unwrap();

            assert_eq!(task.deadline(), Some(DateTime::<Utc>::MAX_UTC));
            assert!(!task.is_timed_out(now + Duration::days(365)));
        }
        assert_eq!(seconds_delta(30), Some(Duration::seconds(30)));
        assert_eq!(seconds_delta(u64::MAX), None);
    }

    #[test]
    fn test_filter_matches() {
        let now = Utc::now();
        let mut task = new_task();
        task.mark_queued(now).unwrap();
        task.assign("node-1", now).unwrap();

        assert!(TaskFilter::with_statuses(&[TaskStatus::Assigned]).matches(&task));
        assert!(!TaskFilter::with_statuses(&[TaskStatus::Queued]).matches(&task));

        let filter = TaskFilter {
            node_id: Some("node-2".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&task));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_value(TaskType::SensitiveDetect).unwrap(),
            json!("sensitive_detect")
        );
        assert_eq!(serde_json::to_value(TaskStatus::Retrying).unwrap(), json!("RETRYING"));
        assert!(TaskPriority::Critical > TaskPriority::Normal);
    }
}
