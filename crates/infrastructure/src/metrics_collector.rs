//! 调度器指标
//!
//! 通过 `metrics` 门面上报，未安装导出器时所有调用都是空操作。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use recon_core::TaskType;

/// 调度核心指标集合
#[derive(Clone)]
pub struct SchedulerMetrics {
    capacity_rejections_total: Counter,
    dispatch_cycles_total: Counter,
    dispatch_cycle_duration: Histogram,
    nodes_lost_total: Counter,

    queue_length: Gauge,
    tasks_in_flight: Gauge,
    nodes_online: Gauge,
    nodes_suspect: Gauge,
    nodes_offline: Gauge,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            capacity_rejections_total: counter!("recon_queue_rejections_total"),
            dispatch_cycles_total: counter!("recon_dispatch_cycles_total"),
            dispatch_cycle_duration: histogram!("recon_dispatch_cycle_duration_seconds"),
            nodes_lost_total: counter!("recon_nodes_lost_total"),
            queue_length: gauge!("recon_queue_length"),
            tasks_in_flight: gauge!("recon_tasks_in_flight"),
            nodes_online: gauge!("recon_nodes_online"),
            nodes_suspect: gauge!("recon_nodes_suspect"),
            nodes_offline: gauge!("recon_nodes_offline"),
        }
    }

    // Task lifecycle

    pub fn record_task_submitted(&self, task_type: TaskType) {
        counter!("recon_tasks_submitted_total", "task_type" => task_type.as_str()).increment(1);
    }

    pub fn record_capacity_rejected(&self) {
        self.capacity_rejections_total.increment(1);
    }

    pub fn record_task_assigned(&self, task_type: TaskType) {
        counter!("recon_tasks_assigned_total", "task_type" => task_type.as_str()).increment(1);
    }

    /// 记录任务完成及其从分配到完成的耗时
    pub fn record_task_completed(&self, task_type: TaskType, duration_seconds: f64) {
        counter!("recon_tasks_completed_total", "task_type" => task_type.as_str()).increment(1);
        histogram!("recon_task_duration_seconds", "task_type" => task_type.as_str())
            .record(duration_seconds);
    }

    /// `reason`: execution / timeout / exhausted
    pub fn record_task_failed(&self, task_type: TaskType, reason: &'static str) {
        counter!(
            "recon_tasks_failed_total",
            "task_type" => task_type.as_str(),
            "reason" => reason
        )
        .increment(1);
    }

    pub fn record_task_retry(&self, task_type: TaskType) {
        counter!("recon_task_retries_total", "task_type" => task_type.as_str()).increment(1);
    }

    /// `reason`: node_lost / delivery_failed / recovery
    pub fn record_task_requeued(&self, reason: &'static str) {
        counter!("recon_tasks_requeued_total", "reason" => reason).increment(1);
    }

    pub fn record_task_cancelled(&self, task_type: TaskType) {
        counter!("recon_tasks_cancelled_total", "task_type" => task_type.as_str()).increment(1);
    }

    // Dispatcher

    pub fn record_dispatch_cycle(&self, duration_seconds: f64) {
        self.dispatch_cycles_total.increment(1);
        self.dispatch_cycle_duration.record(duration_seconds);
    }

    pub fn update_queue_length(&self, length: usize) {
        self.queue_length.set(length as f64);
    }

    pub fn update_in_flight(&self, count: u64) {
        self.tasks_in_flight.set(count as f64);
    }

    // Nodes

    pub fn record_node_lost(&self) {
        self.nodes_lost_total.increment(1);
    }

    pub fn update_node_counts(&self, online: usize, suspect: usize, offline: usize) {
        self.nodes_online.set(online as f64);
        self.nodes_suspect.set(suspect as f64);
        self.nodes_offline.set(offline as f64);
    }
}
