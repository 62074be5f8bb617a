//! gRPC 目标定义

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::discovery::reconcile::{ObserveFn, Resource};
use crate::error::{DiscoveryError, Result};

/// 拨号选项
///
/// 按顺序应用到 `tonic::transport::Endpoint`，后出现的同类选项覆盖先出现的。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOption {
    /// 建立连接的超时时间
    ConnectTimeout(Duration),
    /// 单个请求的超时时间
    Timeout(Duration),
    /// TCP_NODELAY
    TcpNodelay(bool),
    /// TCP keepalive，`None` 表示关闭
    TcpKeepalive(Option<Duration>),
    /// HTTP/2 keepalive ping 间隔
    Http2KeepAliveInterval(Duration),
    /// 单连接并发请求上限
    ConcurrencyLimit(usize),
    /// User-Agent 头
    UserAgent(String),
}

/// 可拨号的 gRPC 目标
///
/// `name` 通常是 `host:port`，也可以是完整的 URI。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub options: Vec<DialOption>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    /// 追加拨号选项
    pub fn with_option(mut self, option: DialOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = DialOption>) -> Self {
        self.options.extend(options);
        self
    }
}

impl Resource for Target {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn observer_failure(self, cause: DiscoveryError) -> DiscoveryError {
        DiscoveryError::TargetObserver {
            target: self,
            source: Box::new(cause),
        }
    }
}

/// 目标观察者
///
/// 每发现一个新目标调用一次 `target_discovered`，每次调用运行在独立任务上。
/// 目标消失或发现器停止时 `cancel` 被触发。
/// 在 `cancel` 已触发时返回 [`DiscoveryError::Cancelled`] 视为正常结束；
/// 返回其他错误会使发现器停止。
#[async_trait]
pub trait TargetObserver: Send + Sync + 'static {
    async fn target_discovered(&self, cancel: CancellationToken, target: Target) -> Result<()>;
}

#[async_trait]
impl<F, Fut> TargetObserver for F
where
    F: Fn(CancellationToken, Target) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn target_discovered(&self, cancel: CancellationToken, target: Target) -> Result<()> {
        (self)(cancel, target).await
    }
}

/// 目标发现器
#[async_trait]
pub trait TargetDiscoverer: Send + Sync {
    /// 运行发现过程，直到 `cancel` 被触发或出现错误
    ///
    /// 因取消而停止时返回 [`DiscoveryError::Cancelled`]；
    /// 观察者失败时返回 [`DiscoveryError::TargetObserver`]。
    async fn discover(
        &self,
        cancel: CancellationToken,
        observer: Arc<dyn TargetObserver>,
    ) -> Result<()>;
}

/// 将目标观察者适配为调和器的观察函数
pub(crate) fn observe_targets(observer: Arc<dyn TargetObserver>) -> ObserveFn<Target> {
    Arc::new(move |cancel: CancellationToken, target: Target| {
        let observer = observer.clone();
        async move { observer.target_discovered(cancel, target).await }.boxed()
    })
}
