use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use recon_core::config::NodeConfig;
use recon_core::models::LivenessThresholds;
use recon_core::{NodeStatus, SchedulerError, SchedulerResult};
use recon_infrastructure::SchedulerMetrics;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::dispatcher::NodeLostHandler;
use crate::node_registry::NodeRegistry;

/// 单次巡检结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub suspect: usize,
    pub offline: usize,
    pub recovered: usize,
    pub removed: usize,
    /// 因节点离线重新分配的任务数
    pub requeued: usize,
}

/// 心跳监控
///
/// 定期按心跳阈值重新判定每个节点的状态。节点被判定离线时，在同一次巡检中
/// 调用 [`NodeLostHandler`] 重新分配其在途任务。处理失败的节点在之后的
/// 巡检中重试，直到成功或节点重新上线。
pub struct HeartbeatMonitor {
    registry: Arc<NodeRegistry>,
    handler: Arc<dyn NodeLostHandler>,
    thresholds: LivenessThresholds,
    sweep_interval: Duration,
    metrics: SchedulerMetrics,
    /// 失联处理尚未成功的节点
    pending_lost: Mutex<HashSet<String>>,
    running: RwLock<bool>,
    stop_signal: Notify,
}

impl HeartbeatMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        handler: Arc<dyn NodeLostHandler>,
        thresholds: LivenessThresholds,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            handler,
            thresholds,
            sweep_interval,
            metrics: SchedulerMetrics::new(),
            pending_lost: Mutex::new(HashSet::new()),
            running: RwLock::new(false),
            stop_signal: Notify::new(),
        }
    }

    pub fn from_config(
        registry: Arc<NodeRegistry>,
        handler: Arc<dyn NodeLostHandler>,
        config: &NodeConfig,
    ) -> Self {
        Self::new(
            registry,
            handler,
            config.liveness_thresholds(),
            config.sweep_interval(),
        )
    }

    pub fn thresholds(&self) -> &LivenessThresholds {
        &self.thresholds
    }

    /// 调用失联处理，失败时记录下来留待下次巡检
    async fn handle_lost(&self, node_id: &str) -> usize {
        match self.handler.handle_node_lost(node_id).await {
            Ok(count) => {
                self.pending_lost.lock().await.remove(node_id);
                count
            }
            Err(e) => {
                error!("重新分配节点 {} 的任务时出错，下次巡检重试: {}", node_id, e);
                self.pending_lost.lock().await.insert(node_id.to_string());
                0
            }
        }
    }

    /// 重试上次失败的失联处理，节点已重新上线时放弃
    async fn retry_pending_lost(&self) -> usize {
        let pending: Vec<String> = self.pending_lost.lock().await.iter().cloned().collect();
        let mut requeued = 0;
        for node_id in pending {
            let still_lost = self
                .registry
                .get(&node_id)
                .await
                .map_or(true, |node| matches!(node.status, NodeStatus::Offline | NodeStatus::Removed));
            if !still_lost {
                warn!("节点 {} 已重新上线，放弃重试失联处理", node_id);
                self.pending_lost.lock().await.remove(&node_id);
                continue;
            }
            requeued += self.handle_lost(&node_id).await;
        }
        requeued
    }

    /// 巡检所有节点
    pub async fn sweep(&self) -> SchedulerResult<SweepReport> {
        let mut report = SweepReport {
            requeued: self.retry_pending_lost().await,
            ..Default::default()
        };

        for node in self.registry.list().await {
            let transition = match self.registry.reassess(&node.id, &self.thresholds).await {
                Ok(transition) => transition,
                // 巡检期间节点被注销
                Err(SchedulerError::NodeNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            let Some((from, to)) = transition else {
                continue;
            };
            debug!("节点 {} 状态变化: {:?} -> {:?}", node.id, from, to);

            match to {
                NodeStatus::Suspect => report.suspect += 1,
                NodeStatus::Online => report.recovered += 1,
                NodeStatus::Removed => report.removed += 1,
                NodeStatus::Offline => {
                    report.offline += 1;
                    self.metrics.record_node_lost();
                    report.requeued += self.handle_lost(&node.id).await;
                }
                NodeStatus::Registering => {}
            }
        }

        let counts = self.registry.node_counts().await;
        self.metrics
            .update_node_counts(counts.online, counts.suspect, counts.offline);

        if report.offline > 0 || report.removed > 0 {
            warn!(
                "心跳巡检: {} 个节点离线, {} 个节点被移除, 重新分配 {} 个任务",
                report.offline, report.removed, report.requeued
            );
        }
        Ok(report)
    }

    /// 启动巡检循环，直到调用 [`HeartbeatMonitor::stop`]
    pub async fn start(&self) {
        info!(
            "启动心跳监控，巡检间隔 {:?}, 心跳超时 {}秒",
            self.sweep_interval,
            self.thresholds.heartbeat_timeout.num_seconds()
        );
        *self.running.write().await = true;

        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出心跳监控循环");
                break;
            }

            if let Err(e) = self.sweep().await {
                error!("心跳巡检时出错: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {}
                _ = self.stop_signal.notified() => {}
            }
        }
    }

    pub async fn stop(&self) {
        info!("停止心跳监控");
        *self.running.write().await = false;
        self.stop_signal.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use recon_core::{Clock, ManualClock, NodeHeartbeat, NodeRegistration};
    use recon_infrastructure::InMemoryNodeRepository;
    use recon_testing_utils::test_epoch;

    #[derive(Default)]
    struct RecordingHandler {
        lost: Mutex<Vec<String>>,
        /// 前几次调用返回错误
        failures: Mutex<usize>,
    }

    impl RecordingHandler {
        fn failing(times: usize) -> Self {
            Self {
                failures: Mutex::new(times),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl NodeLostHandler for RecordingHandler {
        async fn handle_node_lost(&self, node_id: &str) -> SchedulerResult<usize> {
            self.lost.lock().unwrap().push(node_id.to_string());
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SchedulerError::Internal("存储暂不可用".to_string()));
            }
            Ok(1)
        }
    }

    fn thresholds(auto_remove: Option<i64>) -> LivenessThresholds {
        LivenessThresholds {
            heartbeat_interval: ChronoDuration::seconds(10),
            heartbeat_timeout: ChronoDuration::seconds(30),
            auto_remove_after: auto_remove.map(ChronoDuration::seconds),
        }
    }

    async fn setup(
        auto_remove: Option<i64>,
    ) -> (HeartbeatMonitor, Arc<NodeRegistry>, Arc<ManualClock>, Arc<RecordingHandler>) {
        setup_with_handler(auto_remove, RecordingHandler::default()).await
    }

    async fn setup_with_handler(
        auto_remove: Option<i64>,
        handler: RecordingHandler,
    ) -> (HeartbeatMonitor, Arc<NodeRegistry>, Arc<ManualClock>, Arc<RecordingHandler>) {
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let registry = Arc::new(NodeRegistry::new(
            Arc::new(InMemoryNodeRepository::new()),
            clock.clone(),
            None,
        ));
        let handler = Arc::new(handler);
        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            handler.clone(),
            thresholds(auto_remove),
            Duration::from_millis(10),
        );
        (monitor, registry, clock, handler)
    }

    #[tokio::test]
    async fn test_sweep_marks_suspect_then_offline_and_requeues_same_sweep() {
        let (monitor, registry, clock, handler) = setup(None).await;
        let (node, _) = registry
            .register(NodeRegistration::new("scanner-1", "10.0.0.1:9000", 2))
            .await
            .unwrap();

        clock.advance_secs(5);
        assert_eq!(monitor.sweep().await.unwrap(), SweepReport::default());

        clock.advance_secs(10);
        let report = monitor.sweep().await.unwrap();
        assert_eq!(report.suspect, 1);
        assert!(handler.lost.lock().unwrap().is_empty());

        clock.advance_secs(20);
        let report = monitor.sweep().await.unwrap();
        assert_eq!(report.offline, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(*handler.lost.lock().unwrap(), vec![node.id.clone()]);
        assert_eq!(registry.get(&node.id).await.unwrap().status, NodeStatus::Offline);

        // 已离线的节点不会重复触发
        clock.advance_secs(60);
        assert_eq!(monitor.sweep().await.unwrap().offline, 0);
        assert_eq!(handler.lost.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_lost_handling_retried_next_sweep() {
        let (monitor, registry, clock, handler) =
            setup_with_handler(None, RecordingHandler::failing(2)).await;
        let (node, _) = registry
            .register(NodeRegistration::new("scanner-1", "10.0.0.1:9000", 2))
            .await
            .unwrap();

        clock.advance_secs(31);
        let report = monitor.sweep().await.unwrap();
        assert_eq!(report.offline, 1);
        assert_eq!(report.requeued, 0);

        // 节点已处于离线状态，仍然重试失联处理
        clock.advance_secs(5);
        let report = monitor.sweep().await.unwrap();
        assert_eq!(report.offline, 0);
        assert_eq!(report.requeued, 0);

        clock.advance_secs(5);
        assert_eq!(monitor.sweep().await.unwrap().requeued, 1);
        assert_eq!(handler.lost.lock().unwrap().len(), 3);

        // 成功后不再重复调用
        clock.advance_secs(5);
        assert_eq!(monitor.sweep().await.unwrap(), SweepReport::default());
        assert_eq!(*handler.lost.lock().unwrap(), vec![node.id.clone(); 3]);
    }

    #[tokio::test]
    async fn test_pending_lost_dropped_when_node_returns() {
        let (monitor, registry, clock, handler) =
            setup_with_handler(None, RecordingHandler::failing(1)).await;
        let (node, _) = registry
            .register(NodeRegistration::new("scanner-1", "10.0.0.1:9000", 2))
            .await
            .unwrap();

        clock.advance_secs(31);
        assert_eq!(monitor.sweep().await.unwrap().requeued, 0);

        registry
            .heartbeat(NodeHeartbeat {
                node_id: node.id.clone(),
                active_task_count: 0,
                sent_at: clock.now(),
            })
            .await
            .unwrap();
        monitor.sweep().await.unwrap();
        assert_eq!(handler.lost.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_node_online() {
        let (monitor, registry, clock, handler) = setup(None).await;
        let (node, _) = registry
            .register(NodeRegistration::new("scanner-1", "10.0.0.1:9000", 2))
            .await
            .unwrap();

        for _ in 0..10 {
            clock.advance_secs(8);
            registry
                .heartbeat(NodeHeartbeat {
                    node_id: node.id.clone(),
                    active_task_count: 0,
                    sent_at: clock.now(),
                })
                .await
                .unwrap();
            assert_eq!(monitor.sweep().await.unwrap(), SweepReport::default());
        }
        assert!(handler.lost.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_node_auto_removed() {
        let (monitor, registry, clock, _handler) = setup(Some(60)).await;
        let (node, _) = registry
            .register(NodeRegistration::new("scanner-1", "10.0.0.1:9000", 2))
            .await
            .unwrap();

        clock.advance_secs(31);
        assert_eq!(monitor.sweep().await.unwrap().offline, 1);

        clock.advance_secs(30);
        assert_eq!(monitor.sweep().await.unwrap().removed, 0);

        clock.advance_secs(31);
        assert_eq!(monitor.sweep().await.unwrap().removed, 1);
        assert!(registry.get(&node.id).await.is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (monitor, registry, clock, handler) = setup(None).await;
        let monitor = Arc::new(monitor);
        registry
            .register(NodeRegistration::new("scanner-1", "10.0.0.1:9000", 2))
            .await
            .unwrap();
        clock.advance_secs(31);

        let running = monitor.clone();
        let handle = tokio::spawn(async move { running.start().await });

        let lost = recon_testing_utils::TestEnv::wait_for(
            || {
                let handler = handler.clone();
                async move { !handler.lost.lock().unwrap().is_empty() }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(lost);

        monitor.stop().await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
