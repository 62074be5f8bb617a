//! 应用发现
//!
//! 在每个连接上调用 WatchApplications，按可用性通知启动或取消应用的生命周期。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Connection, WatchStream};
use crate::discovery::connector::ConnectObserver;
use crate::discovery::identity::Identity;
use crate::discovery::reconcile::{ObserveFn, Reconciler, Resource, observe_fn};
use crate::error::{DiscoveryError, ErrorHook, Result};
use crate::retry::{Backoff, ExponentialBackoffPolicy, RetryPolicy, retry_loop};

/// 在某个目标上发现的应用
///
/// 同一个标识可能同时通过多个连接可用。
#[derive(Debug, Clone)]
pub struct Application {
    pub identity: Identity,
    /// 发现该应用所用的连接
    pub connection: Connection,
}

impl Resource for Application {
    fn describe(&self) -> String {
        self.identity.to_string()
    }

    fn observer_failure(self, cause: DiscoveryError) -> DiscoveryError {
        DiscoveryError::ApplicationObserver {
            application: self,
            source: Box::new(cause),
        }
    }
}

/// 应用观察者
///
/// 应用变为可用时调用；应用变为不可用、连接断开或发现器停止时 `cancel` 被触发。
#[async_trait]
pub trait ApplicationObserver: Send + Sync + 'static {
    async fn application_discovered(
        &self,
        cancel: CancellationToken,
        application: Application,
    ) -> Result<()>;
}

#[async_trait]
impl<F, Fut> ApplicationObserver for F
where
    F: Fn(CancellationToken, Application) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn application_discovered(
        &self,
        cancel: CancellationToken,
        application: Application,
    ) -> Result<()> {
        (self)(cancel, application).await
    }
}

/// 应用发现器
///
/// 实现 [`ConnectObserver`]，通常作为 [`Connector`](crate::discovery::Connector) 的观察者。
/// 目标未实现发现协议时 `target_connected` 返回 `Ok(())`。
pub struct ApplicationDiscoverer {
    observer: Arc<dyn ApplicationObserver>,
    retry_policy: Arc<dyn RetryPolicy>,
    on_error: Option<ErrorHook>,
}

impl ApplicationDiscoverer {
    pub fn new(observer: Arc<dyn ApplicationObserver>) -> Self {
        Self {
            observer,
            retry_policy: Arc::new(ExponentialBackoffPolicy::default()),
            on_error: None,
        }
    }

    /// 设置重新 watch 的退避策略
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// 设置错误回调，第一个参数是连接名
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    fn observe_applications(&self) -> ObserveFn<Application> {
        let observer = self.observer.clone();
        observe_fn(move |cancel: CancellationToken, application: Application| {
            let observer = observer.clone();
            async move { observer.application_discovered(cancel, application).await }
        })
    }

    /// 单次 watch 尝试
    async fn watch(
        &self,
        cancel: &CancellationToken,
        connection: &Connection,
        backoff: &Backoff,
    ) -> Result<()> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            opened = connection.transport().watch_applications() => opened?,
        };

        backoff.reset();
        debug!(dial_target = %connection.name(), "Watching applications");

        let mut reconciler = Reconciler::new(cancel.child_token(), self.observe_applications());
        let result = self
            .recv(cancel, connection, &mut stream, &mut reconciler)
            .await;

        reconciler.finish(result).await
    }

    async fn recv(
        &self,
        cancel: &CancellationToken,
        connection: &Connection,
        stream: &mut WatchStream,
        reconciler: &mut Reconciler<Identity, Application>,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                err = reconciler.failed() => return Err(err),
                message = stream.next() => message,
            };

            let response = match message {
                Some(Ok(response)) => response,
                Some(Err(status)) => return Err(status.into()),
                None => return Err(DiscoveryError::StreamClosed),
            };

            let identity = match Identity::try_from(response.identity.unwrap_or_default()) {
                Ok(identity) => identity,
                Err(err) => {
                    let err = DiscoveryError::from(err);
                    warn!(
                        dial_target = %connection.name(),
                        error = %err,
                        "Ignoring invalid application identity"
                    );
                    if let Some(hook) = &self.on_error {
                        hook(connection.name(), &err);
                    }
                    continue;
                }
            };

            if response.available {
                let application = Application {
                    identity: identity.clone(),
                    connection: connection.clone(),
                };
                if reconciler.insert(identity.clone(), [application]) {
                    info!(
                        dial_target = %connection.name(),
                        application = %identity,
                        "Application available"
                    );
                }
            } else if reconciler.remove(&identity) {
                info!(
                    dial_target = %connection.name(),
                    application = %identity,
                    "Application unavailable"
                );
            }
        }
    }
}

#[async_trait]
impl ConnectObserver for ApplicationDiscoverer {
    async fn target_connected(
        &self,
        cancel: CancellationToken,
        connection: Connection,
    ) -> Result<()> {
        let backoff = Backoff::new(self.retry_policy.clone());
        let (cancel, connection, backoff) = (&cancel, &connection, &backoff);

        retry_loop(
            connection.name(),
            cancel,
            backoff,
            self.on_error.as_ref(),
            move || self.watch(cancel, connection, backoff),
        )
        .await
    }
}
