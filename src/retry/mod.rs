//! 重试策略模块
//!
//! - [`RetryPolicy`]：根据连续失败次数计算下一次等待时长
//! - [`Backoff`]：带状态的退避计数器（成功后重置）
//! - [`retry_loop`]：根据失败分类决定停止、传播或退避重试

pub mod backoff;
pub mod exponential;
pub mod fixed;

pub use backoff::{Backoff, retry_loop, sleep};
pub use exponential::ExponentialBackoffPolicy;
pub use fixed::FixedRetryPolicy;

use std::time::Duration;

/// 重试策略 trait
pub trait RetryPolicy: Send + Sync {
    /// 第 `failures` 次连续失败之后应等待的时长（`failures` 从 0 开始）
    fn backoff_duration(&self, failures: u32) -> Duration;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Box<P> {
    fn backoff_duration(&self, failures: u32) -> Duration {
        (**self).backoff_duration(failures)
    }
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for std::sync::Arc<P> {
    fn backoff_duration(&self, failures: u32) -> Duration {
        (**self).backoff_duration(failures)
    }
}
