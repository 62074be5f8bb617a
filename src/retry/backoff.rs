//! 退避计数器与重试循环

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ExponentialBackoffPolicy, RetryPolicy};
use crate::error::{DiscoveryError, ErrorHook, Failure, Result};

/// 可被取消的等待
///
/// 在 `duration` 到期前若 `cancel` 被触发，立即返回 [`DiscoveryError::Cancelled`]。
pub async fn sleep(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// 退避计数器
///
/// 记录连续失败次数；远端接受一次尝试后应调用 [`Backoff::reset`]。
/// 计数器使用原子变量，尝试过程中可以通过共享引用重置。
pub struct Backoff {
    policy: Arc<dyn RetryPolicy>,
    failures: AtomicU32,
}

impl Backoff {
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            policy,
            failures: AtomicU32::new(0),
        }
    }

    /// 连续失败次数
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// 重置为初始间隔
    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// 计算本次等待时长并递增失败计数
    pub fn next_delay(&self) -> Duration {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel);
        self.policy.backoff_duration(failures)
    }

    /// 按当前退避时长等待，可被取消
    pub async fn sleep(&self, cancel: &CancellationToken) -> Result<()> {
        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Backing off before retry");
        sleep(cancel, delay).await
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Arc::new(ExponentialBackoffPolicy::default()))
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("failures", &self.failures())
            .finish()
    }
}

/// 带退避的重试循环
///
/// 反复执行 `attempt`，直到：
/// - 尝试返回 `Ok(())`；
/// - 失败被分类为 [`Failure::NotSupported`]（返回 `Ok(())`）；
/// - 失败被分类为 [`Failure::Observer`] 或 [`Failure::Cancelled`]（返回该错误）；
/// - 退避等待期间 `cancel` 被触发（返回 [`DiscoveryError::Cancelled`]）。
///
/// 其余失败视为瞬时错误：记录日志、调用 `on_error`，按 `backoff` 等待后重试。
/// `attempt` 自行负责在远端接受请求后调用 `backoff.reset()`。
pub async fn retry_loop<F, Fut>(
    name: &str,
    cancel: &CancellationToken,
    backoff: &Backoff,
    on_error: Option<&ErrorHook>,
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        let err = match attempt().await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        match err.classify() {
            Failure::NotSupported => {
                debug!(name = %name, "Remote does not support the requested capability");
                return Ok(());
            }
            Failure::Observer | Failure::Cancelled => return Err(err),
            Failure::Transient => {}
        }

        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        warn!(
            name = %name,
            error = %err,
            failures = backoff.failures(),
            "Attempt failed, will retry"
        );
        if let Some(hook) = on_error {
            hook(name, &err);
        }

        backoff.sleep(cancel).await?;
    }
}
