use super::RetryPolicy;
use std::time::Duration;

/// 固定延迟重试策略
#[derive(Debug, Clone)]
pub struct FixedRetryPolicy {
    delay: Duration,
}

impl FixedRetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for FixedRetryPolicy {
    fn backoff_duration(&self, _failures: u32) -> Duration {
        self.delay
    }
}
