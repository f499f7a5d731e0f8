use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::{
    seconds_delta, LivenessThresholds, TaskLimits, MAX_RETRY_INTERVAL_SECONDS, MAX_TIMEOUT_SECONDS,
};

/// 心跳超时上限（7天）
const MAX_HEARTBEAT_TIMEOUT_SECONDS: u64 = 7 * 24 * 3600;
/// 离线节点自动移除等待上限（365天）
const MAX_AUTO_REMOVE_SECONDS: u64 = 365 * 24 * 3600;

/// 节点管理配置，时间单位均为秒
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub heartbeat_interval: u64,
    pub heartbeat_timeout: u64,
    pub enable_auto_remove: bool,
    pub auto_remove_after: u64,
    /// 指定主节点名称，为空时第一个注册的节点成为主节点
    pub master_node_name: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 30,
            heartbeat_timeout: 90,
            enable_auto_remove: false,
            auto_remove_after: 86400,
            master_node_name: None,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(anyhow::anyhow!(
                "心跳超时时间({}秒)必须大于心跳间隔({}秒)",
                self.heartbeat_timeout,
                self.heartbeat_interval
            ));
        }

        if self.heartbeat_timeout > MAX_HEARTBEAT_TIMEOUT_SECONDS {
            return Err(anyhow::anyhow!(
                "心跳超时时间不能超过{}秒",
                MAX_HEARTBEAT_TIMEOUT_SECONDS
            ));
        }

        if self.enable_auto_remove && self.auto_remove_after == 0 {
            return Err(anyhow::anyhow!("启用自动移除时移除等待时间必须大于0"));
        }

        if self.auto_remove_after > MAX_AUTO_REMOVE_SECONDS {
            return Err(anyhow::anyhow!(
                "移除等待时间不能超过{}秒",
                MAX_AUTO_REMOVE_SECONDS
            ));
        }

        if let Some(name) = &self.master_node_name {
            if name.trim().is_empty() {
                return Err(anyhow::anyhow!("主节点名称不能为空字符串"));
            }
        }

        Ok(())
    }

    pub fn liveness_thresholds(&self) -> LivenessThresholds {
        LivenessThresholds {
            heartbeat_interval: seconds_delta(self.heartbeat_interval).unwrap_or(Duration::MAX),
            heartbeat_timeout: seconds_delta(self.heartbeat_timeout).unwrap_or(Duration::MAX),
            auto_remove_after: self
                .enable_auto_remove
                .then(|| seconds_delta(self.auto_remove_after).unwrap_or(Duration::MAX)),
        }
    }

    /// 心跳检测的扫描周期，取心跳间隔的一半且不小于1秒
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis((self.heartbeat_interval.saturating_mul(1000) / 2).max(1000))
    }
}

/// 任务调度配置，时间单位均为秒
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// 全集群同时执行的任务上限
    pub max_concurrent_tasks: u32,
    pub task_timeout: u64,
    pub enable_retry: bool,
    pub max_retries: u32,
    pub retry_interval: u64,
    pub queue_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 100,
            task_timeout: 3600,
            enable_retry: true,
            max_retries: 3,
            retry_interval: 60,
            queue_capacity: 1000,
        }
    }
}

impl TaskConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.task_timeout == 0 || self.task_timeout > MAX_TIMEOUT_SECONDS {
            return Err(anyhow::anyhow!(
                "任务超时时间必须在1到{}秒之间",
                MAX_TIMEOUT_SECONDS
            ));
        }

        if self.retry_interval > MAX_RETRY_INTERVAL_SECONDS {
            return Err(anyhow::anyhow!(
                "重试间隔不能超过{}秒",
                MAX_RETRY_INTERVAL_SECONDS
            ));
        }

        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("队列容量必须大于0"));
        }

        Ok(())
    }

    /// 新任务未显式指定时使用的默认限制
    pub fn default_limits(&self) -> TaskLimits {
        TaskLimits {
            max_retries: if self.enable_retry { self.max_retries } else { 0 },
            timeout_seconds: self.task_timeout,
            retry_interval_seconds: self.retry_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_validation() {
        assert!(NodeConfig::default().validate().is_ok());

        let config = NodeConfig {
            heartbeat_interval: 30,
            heartbeat_timeout: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NodeConfig {
            master_node_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_liveness_thresholds() {
        let config = NodeConfig {
            heartbeat_interval: 10,
            heartbeat_timeout: 30,
            enable_auto_remove: false,
            auto_remove_after: 600,
            master_node_name: None,
        };
        let thresholds = config.liveness_thresholds();
        assert_eq!(thresholds.heartbeat_interval, Duration::seconds(10));
        assert_eq!(thresholds.heartbeat_timeout, Duration::seconds(30));
        assert!(thresholds.auto_remove_after.is_none());

        let config = NodeConfig {
            enable_auto_remove: true,
            ..config
        };
        assert_eq!(
            config.liveness_thresholds().auto_remove_after,
            Some(Duration::seconds(600))
        );
    }

    #[test]
    fn test_sweep_interval_floor() {
        let config = NodeConfig {
            heartbeat_interval: 1,
            heartbeat_timeout: 3,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(1));

        assert_eq!(
            NodeConfig::default().sweep_interval(),
            std::time::Duration::from_secs(15)
        );
    }

    #[test]
    fn test_duration_upper_bounds() {
        let config = TaskConfig {
            task_timeout: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TaskConfig {
            retry_interval: 10_000_000_000_000_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TaskConfig {
            task_timeout: MAX_TIMEOUT_SECONDS,
            retry_interval: MAX_RETRY_INTERVAL_SECONDS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = NodeConfig {
            heartbeat_timeout: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.liveness_thresholds().heartbeat_timeout, Duration::MAX);

        let config = NodeConfig {
            enable_auto_remove: true,
            auto_remove_after: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_task_limits_respect_retry_switch() {
        let mut config = TaskConfig::default();
        assert_eq!(config.default_limits().max_retries, 3);

        config.enable_retry = false;
        assert_eq!(config.default_limits().max_retries, 0);

        config.queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
