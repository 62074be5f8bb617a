use super::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// 默认初始退避时长
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);

/// 默认最大退避时长
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3600);

/// 指数退避重试策略
///
/// 等待时长为 `base_delay * 2^failures`，不超过 `max_delay`。
/// 启用 `jitter` 时在 `[0, delay]` 内均匀取值。
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl ExponentialBackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    /// 启用/禁用随机抖动
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn raw_delay(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(20);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY).with_jitter(true)
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn backoff_duration(&self, failures: u32) -> Duration {
        let delay = self.raw_delay(failures);
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let millis = delay.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}
