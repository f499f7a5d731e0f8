use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use recon_core::models::saturating_add_seconds;
use tracing::debug;

/// 重试策略
///
/// `attempt` 为已经开始过的执行次数（首次执行为1）。
pub trait RetryPolicy: Send + Sync {
    /// 失败后是否还能重试，总执行次数不超过 `max_retries + 1`
    fn should_retry(&self, attempt: u32, max_retries: u32) -> bool {
        attempt <= max_retries
    }

    /// 计算下次重试时间，不早于 `now + interval_seconds`
    fn next_retry_at(&self, now: DateTime<Utc>, interval_seconds: u64, attempt: u32) -> DateTime<Utc>;

    fn name(&self) -> &str;
}

/// 固定间隔重试
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelayPolicy;

impl RetryPolicy for FixedDelayPolicy {
    fn next_retry_at(&self, now: DateTime<Utc>, interval_seconds: u64, _attempt: u32) -> DateTime<Utc> {
        saturating_add_seconds(now, interval_seconds)
    }

    fn name(&self) -> &str {
        "FixedDelay"
    }
}

/// 指数退避配置
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// 最大重试间隔（秒）
    pub max_interval_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_interval_seconds: 3600,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// 指数退避重试，以任务的重试间隔为基数
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoffPolicy {
    config: BackoffConfig,
}

impl ExponentialBackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    fn interval_seconds(&self, base_interval: u64, attempt: u32) -> f64 {
        let base = base_interval as f64;
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let exponential = base * self.config.backoff_multiplier.powi(exponent);
        let capped = exponential.min(self.config.max_interval_seconds.max(base_interval) as f64);

        // 添加随机抖动以避免雷群效应
        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        (capped + jitter).max(base)
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn next_retry_at(&self, now: DateTime<Utc>, interval_seconds: u64, attempt: u32) -> DateTime<Utc> {
        let seconds = self.interval_seconds(interval_seconds, attempt);
        debug!("第 {} 次执行失败，{:.1} 秒后重试", attempt, seconds);
        Duration::try_milliseconds((seconds * 1000.0) as i64)
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn name(&self) -> &str {
        "ExponentialBackoff"
    }
}

/// 根据配置名称创建重试策略，未知名称回退到固定间隔
pub fn retry_policy_from_name(name: &str) -> Arc<dyn RetryPolicy> {
    match name {
        "exponential" => Arc::new(ExponentialBackoffPolicy::default()),
        _ => Arc::new(FixedDelayPolicy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_testing_utils::test_epoch;

    #[test]
    fn test_should_retry_bounds() {
        let policy = FixedDelayPolicy;
        assert!(policy.should_retry(1, 2));
        assert!(policy.should_retry(2, 2));
        assert!(!policy.should_retry(3, 2));
        assert!(!policy.should_retry(1, 0));
    }

    #[test]
    fn test_huge_interval_does_not_overflow() {
        let now = test_epoch();
        for interval in [u64::MAX, 10_000_000_000_000_000] {
            assert_eq!(
                FixedDelayPolicy.next_retry_at(now, interval, 1),
                DateTime::<Utc>::MAX_UTC
            );
            assert!(ExponentialBackoffPolicy::default().next_retry_at(now, interval, 3) > now);
        }
    }

    #[test]
    fn test_fixed_delay() {
        let now = test_epoch();
        let at = FixedDelayPolicy.next_retry_at(now, 30, 5);
        assert_eq!(at - now, Duration::seconds(30));
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let policy = ExponentialBackoffPolicy::new(BackoffConfig {
            max_interval_seconds: 100,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });
        let now = test_epoch();

        assert_eq!(policy.next_retry_at(now, 10, 1) - now, Duration::seconds(10));
        assert_eq!(policy.next_retry_at(now, 10, 2) - now, Duration::seconds(20));
        assert_eq!(policy.next_retry_at(now, 10, 3) - now, Duration::seconds(40));
        assert_eq!(policy.next_retry_at(now, 10, 10) - now, Duration::seconds(100));
    }

    #[test]
    fn test_jitter_never_shortens_base_interval() {
        let policy = ExponentialBackoffPolicy::new(BackoffConfig {
            max_interval_seconds: 3600,
            backoff_multiplier: 1.0,
            jitter_factor: 0.5,
        });
        let now = test_epoch();
        for _ in 0..50 {
            assert!(policy.next_retry_at(now, 20, 1) - now >= Duration::seconds(20));
        }
    }

    #[test]
    fn test_policy_from_name() {
        assert_eq!(retry_policy_from_name("exponential").name(), "ExponentialBackoff");
        assert_eq!(retry_policy_from_name("fixed").name(), "FixedDelay");
    }
}
