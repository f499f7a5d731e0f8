use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 无新任务唤醒时的轮询间隔
    pub poll_interval_ms: u64,
    pub dispatch_strategy: String, // "least_loaded", "round_robin"
    pub retry_policy: String,      // "fixed", "exponential"
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            dispatch_strategy: "least_loaded".to_string(),
            retry_policy: "fixed".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub const STRATEGIES: [&'static str; 2] = ["least_loaded", "round_robin"];
    pub const RETRY_POLICIES: [&'static str; 2] = ["fixed", "exponential"];

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度轮询间隔必须大于0"));
        }

        if !Self::STRATEGIES.contains(&self.dispatch_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的调度策略: {}，支持的策略: {:?}",
                self.dispatch_strategy,
                Self::STRATEGIES
            ));
        }

        if !Self::RETRY_POLICIES.contains(&self.retry_policy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的重试策略: {}，支持的策略: {:?}",
                self.retry_policy,
                Self::RETRY_POLICIES
            ));
        }

        Ok(())
    }
}

/// 进程内嵌入的本地执行节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub node_name: String,
    pub address: String,
    pub max_concurrent_tasks: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_name: "local-node".to_string(),
            address: "127.0.0.1".to_string(),
            max_concurrent_tasks: 5,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(anyhow::anyhow!("节点名称不能为空"));
        }

        if self.address.is_empty() {
            return Err(anyhow::anyhow!("节点地址不能为空"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_validation() {
        assert!(DispatcherConfig::default().validate().is_ok());

        let config = DispatcherConfig {
            dispatch_strategy: "random".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DispatcherConfig {
            retry_policy: "linear".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_config_validation() {
        assert!(WorkerConfig::default().validate().is_ok());

        let config = WorkerConfig {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
