//! 目标连接器
//!
//! 实现 [`TargetObserver`]：为每个发现的目标建立连接，并把连接交给 [`ConnectObserver`]。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Connection, Dialer, GrpcDialer, Transport};
use crate::discovery::target::{DialOption, Target, TargetObserver};
use crate::error::{DiscoveryError, ErrorHook, Result};
use crate::retry::{Backoff, ExponentialBackoffPolicy, RetryPolicy};

/// 连接观察者
///
/// 连接建立后调用；目标消失或发现器停止时 `cancel` 被触发。
/// 返回后连接从连接表移除并关闭。
#[async_trait]
pub trait ConnectObserver: Send + Sync + 'static {
    async fn target_connected(
        &self,
        cancel: CancellationToken,
        connection: Connection,
    ) -> Result<()>;
}

#[async_trait]
impl<F, Fut> ConnectObserver for F
where
    F: Fn(CancellationToken, Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn target_connected(
        &self,
        cancel: CancellationToken,
        connection: Connection,
    ) -> Result<()> {
        (self)(cancel, connection).await
    }
}

/// 忽略谓词，返回 `true` 的目标不会被拨号
pub type IgnoreFn = Arc<dyn Fn(&Target) -> Result<bool> + Send + Sync>;

/// 连接表中的一项，`released` 在连接移除后取消
struct Entry {
    connection: Connection,
    released: CancellationToken,
}

/// 目标连接器
///
/// 同名目标同一时刻只有一个连接。同名的新生命周期会等待旧连接释放后再拨号。
pub struct Connector {
    observer: Arc<dyn ConnectObserver>,
    dialer: Arc<dyn Dialer>,
    dial_options: Vec<DialOption>,
    ignore: Option<IgnoreFn>,
    retry_policy: Arc<dyn RetryPolicy>,
    on_error: Option<ErrorHook>,
    connections: Mutex<HashMap<String, Entry>>,
}

impl Connector {
    /// 使用 [`GrpcDialer`] 创建连接器
    pub fn new(observer: Arc<dyn ConnectObserver>) -> Self {
        Self {
            observer,
            dialer: Arc::new(GrpcDialer::new()),
            dial_options: Vec::new(),
            ignore: None,
            retry_policy: Arc::new(ExponentialBackoffPolicy::default()),
            on_error: None,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// 默认拨号选项，先于目标自身的选项应用
    pub fn with_dial_options(mut self, options: impl IntoIterator<Item = DialOption>) -> Self {
        self.dial_options.extend(options);
        self
    }

    pub fn with_ignore(mut self, ignore: IgnoreFn) -> Self {
        self.ignore = Some(ignore);
        self
    }

    /// 拨号失败后的退避策略
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// 设置错误回调，第一个参数是目标名
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// 当前已连接的目标
    pub fn connections(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .connections
            .lock()
            .values()
            .map(|entry| entry.connection.target().clone())
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.connections.lock().contains_key(name)
    }

    /// 合并默认选项与目标选项
    fn dial_target(&self, target: &Target) -> Target {
        Target {
            name: target.name.clone(),
            options: self
                .dial_options
                .iter()
                .chain(target.options.iter())
                .cloned()
                .collect(),
        }
    }

    /// 等待同名的旧连接释放
    async fn wait_released(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        loop {
            let released = match self.connections.lock().get(name) {
                Some(entry) => entry.released.clone(),
                None => return Ok(()),
            };

            debug!(dial_target = %name, "Waiting for previous connection to be released");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                _ = released.cancelled() => {}
            }
        }
    }

    /// 拨号直到成功或 `cancel` 被触发
    async fn dial(
        &self,
        cancel: &CancellationToken,
        target: &Target,
    ) -> Result<Arc<dyn Transport>> {
        let dial_target = self.dial_target(target);
        let backoff = Backoff::new(self.retry_policy.clone());

        loop {
            let dialed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                dialed = self.dialer.dial(&dial_target) => dialed,
            };

            let err = match dialed {
                Ok(transport) => return Ok(transport),
                Err(err) => err,
            };

            warn!(
                dial_target = %target.name,
                error = %err,
                failures = backoff.failures(),
                "Dial failed, will retry"
            );
            if let Some(hook) = &self.on_error {
                hook(&target.name, &err);
            }

            backoff.sleep(cancel).await?;
        }
    }
}

#[async_trait]
impl TargetObserver for Connector {
    async fn target_discovered(&self, cancel: CancellationToken, target: Target) -> Result<()> {
        if let Some(ignore) = &self.ignore
            && ignore(&target)?
        {
            debug!(dial_target = %target.name, "Ignoring target");
            return Ok(());
        }

        let (connection, released) = loop {
            self.wait_released(&cancel, &target.name).await?;

            let transport = self.dial(&cancel, &target).await?;
            let connection = Connection::new(target.clone(), transport);
            let released = CancellationToken::new();

            let claimed = {
                let mut connections = self.connections.lock();
                if connections.contains_key(&target.name) {
                    false
                } else {
                    let entry = Entry {
                        connection: connection.clone(),
                        released: released.clone(),
                    };
                    connections.insert(target.name.clone(), entry);
                    true
                }
            };

            if claimed {
                break (connection, released);
            }
        };

        info!(dial_target = %target.name, "Connected to target");
        let result = self.observer.target_connected(cancel, connection).await;

        self.connections.lock().remove(&target.name);
        released.cancel();
        info!(dial_target = %target.name, "Disconnected from target");

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WatchStream;
    use crate::retry::FixedRetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn watch_applications(&self) -> Result<WatchStream> {
            Err(DiscoveryError::NotSupported)
        }
    }

    /// 前 `failures` 次拨号失败，记录每次拨号的选项
    #[derive(Default)]
    struct FakeDialer {
        failures: usize,
        dialed: Mutex<Vec<Target>>,
    }

    #[async_trait]
    impl Dialer for FakeDialer {
        async fn dial(&self, target: &Target) -> Result<Arc<dyn Transport>> {
            let mut dialed = self.dialed.lock();
            dialed.push(target.clone());
            if dialed.len() <= self.failures {
                return Err(DiscoveryError::other("connection refused"));
            }
            Ok(Arc::new(NullTransport))
        }
    }

    fn holding_observer(connected: Arc<AtomicUsize>) -> Arc<dyn ConnectObserver> {
        Arc::new(move |cancel: CancellationToken, _: Connection| {
            let connected = connected.clone();
            async move {
                connected.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                Err::<(), _>(DiscoveryError::Cancelled)
            }
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn default_options_precede_target_options() {
        let dialer = Arc::new(FakeDialer::default());
        let connector = Arc::new(
            Connector::new(holding_observer(Arc::new(AtomicUsize::new(0))))
                .with_dialer(dialer.clone())
                .with_dial_options([DialOption::TcpNodelay(false)]),
        );

        let cancel = CancellationToken::new();
        let target = Target::new("host:1").with_option(DialOption::TcpNodelay(true));
        let task = {
            let connector = connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { connector.target_discovered(cancel, target).await })
        };
        settle().await;

        assert_eq!(
            dialer.dialed.lock()[0].options,
            vec![DialOption::TcpNodelay(false), DialOption::TcpNodelay(true)]
        );
        assert_eq!(connector.connections().len(), 1);

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(DiscoveryError::Cancelled)));
        assert!(connector.connections().is_empty());
    }

    #[tokio::test]
    async fn ignored_targets_are_never_dialed() {
        let dialer = Arc::new(FakeDialer::default());
        let connected = Arc::new(AtomicUsize::new(0));
        let connector = Connector::new(holding_observer(connected.clone()))
            .with_dialer(dialer.clone())
            .with_ignore(Arc::new(|target: &Target| -> Result<bool> {
                Ok(target.name.starts_with("skip"))
            }));

        let result = connector
            .target_discovered(CancellationToken::new(), Target::new("skip-me:1"))
            .await;

        assert!(result.is_ok());
        assert!(dialer.dialed.lock().is_empty());
        assert_eq!(connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ignore_predicate_errors_are_returned() {
        let connector = Connector::new(holding_observer(Arc::new(AtomicUsize::new(0))))
            .with_dialer(Arc::new(FakeDialer::default()))
            .with_ignore(Arc::new(|_: &Target| -> Result<bool> {
                Err(DiscoveryError::other("<error>"))
            }));

        let result = connector
            .target_discovered(CancellationToken::new(), Target::new("host:1"))
            .await;

        assert_eq!(result.unwrap_err().to_string(), "<error>");
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failures_are_retried_and_reported() {
        let dialer = Arc::new(FakeDialer {
            failures: 2,
            ..Default::default()
        });
        let connected = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(AtomicUsize::new(0));
        let hook: ErrorHook = {
            let reported = reported.clone();
            Arc::new(move |_: &str, _: &DiscoveryError| {
                reported.fetch_add(1, Ordering::SeqCst);
            })
        };
        let connector = Arc::new(
            Connector::new(holding_observer(connected.clone()))
                .with_dialer(dialer.clone())
                .with_retry_policy(Arc::new(FixedRetryPolicy::new(Duration::from_secs(1))))
                .with_error_hook(hook),
        );

        let cancel = CancellationToken::new();
        let task = {
            let connector = connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                connector
                    .target_discovered(cancel, Target::new("host:1"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(dialer.dialed.lock().len(), 3);
        assert_eq!(reported.load(Ordering::SeqCst), 2);
        assert_eq!(connected.load(Ordering::SeqCst), 1);

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(DiscoveryError::Cancelled)));
    }

    fn spawn_target(
        connector: &Arc<Connector>,
        cancel: &CancellationToken,
        name: &str,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let connector = connector.clone();
        let cancel = cancel.clone();
        let target = Target::new(name);
        tokio::spawn(async move { connector.target_discovered(cancel, target).await })
    }

    #[tokio::test]
    async fn second_lifecycle_waits_for_the_first_connection() {
        let dialer = Arc::new(FakeDialer::default());
        let connected = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(
            Connector::new(holding_observer(connected.clone())).with_dialer(dialer.clone()),
        );

        let first_cancel = CancellationToken::new();
        let second_cancel = CancellationToken::new();
        let first = spawn_target(&connector, &first_cancel, "host:1");
        settle().await;
        let second = spawn_target(&connector, &second_cancel, "host:1");
        settle().await;

        assert_eq!(dialer.dialed.lock().len(), 1);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert!(!second.is_finished());

        first_cancel.cancel();
        let _ = first.await.unwrap();
        settle().await;

        assert_eq!(dialer.dialed.lock().len(), 2);
        assert_eq!(connected.load(Ordering::SeqCst), 2);
        assert!(connector.is_connected("host:1"));

        second_cancel.cancel();
        assert!(matches!(second.await.unwrap(), Err(DiscoveryError::Cancelled)));
        assert!(!connector.is_connected("host:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn readded_target_reconnects_after_slow_release() {
        let dialer = Arc::new(FakeDialer::default());
        let connected = Arc::new(AtomicUsize::new(0));
        let observer: Arc<dyn ConnectObserver> = {
            let connected = connected.clone();
            Arc::new(move |cancel: CancellationToken, _: Connection| {
                let connected = connected.clone();
                async move {
                    connected.fetch_add(1, Ordering::SeqCst);
                    cancel.cancelled().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<(), _>(DiscoveryError::Cancelled)
                }
            })
        };
        let connector = Arc::new(Connector::new(observer).with_dialer(dialer.clone()));

        let removed = CancellationToken::new();
        let first = spawn_target(&connector, &removed, "host:1");
        settle().await;

        removed.cancel();
        let readded = CancellationToken::new();
        let second = spawn_target(&connector, &readded, "host:1");
        settle().await;
        assert_eq!(dialer.dialed.lock().len(), 1);

        let _ = first.await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!second.is_finished());
        assert_eq!(dialer.dialed.lock().len(), 2);
        assert_eq!(connected.load(Ordering::SeqCst), 2);
        assert!(connector.is_connected("host:1"));

        readded.cancel();
        let _ = second.await.unwrap();
    }

    #[tokio::test]
    async fn waiting_lifecycle_stops_on_cancel() {
        let dialer = Arc::new(FakeDialer::default());
        let connector = Arc::new(
            Connector::new(holding_observer(Arc::new(AtomicUsize::new(0))))
                .with_dialer(dialer.clone()),
        );

        let first_cancel = CancellationToken::new();
        let second_cancel = CancellationToken::new();
        let first = spawn_target(&connector, &first_cancel, "host:1");
        settle().await;
        let second = spawn_target(&connector, &second_cancel, "host:1");
        settle().await;

        second_cancel.cancel();
        assert!(matches!(second.await.unwrap(), Err(DiscoveryError::Cancelled)));
        assert!(connector.is_connected("host:1"));
        assert_eq!(dialer.dialed.lock().len(), 1);

        first_cancel.cancel();
        let _ = first.await.unwrap();
    }

    #[tokio::test]
    async fn observer_sees_cancellation_before_connection_is_removed() {
        let connector_slot: Arc<Mutex<Option<Arc<Connector>>>> = Arc::new(Mutex::new(None));
        let seen_connected = Arc::new(AtomicUsize::new(0));

        let observer: Arc<dyn ConnectObserver> = {
            let slot = connector_slot.clone();
            let seen = seen_connected.clone();
            Arc::new(move |cancel: CancellationToken, connection: Connection| {
                let slot = slot.clone();
                let seen = seen.clone();
                async move {
                    cancel.cancelled().await;
                    let still_listed = slot
                        .lock()
                        .as_ref()
                        .map(|c| c.is_connected(connection.name()))
                        .unwrap_or(false);
                    if still_listed {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                    Err::<(), _>(DiscoveryError::Cancelled)
                }
            })
        };

        let connector =
            Arc::new(Connector::new(observer).with_dialer(Arc::new(FakeDialer::default())));
        *connector_slot.lock() = Some(connector.clone());

        let cancel = CancellationToken::new();
        let task = {
            let connector = connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                connector
                    .target_discovered(cancel, Target::new("host:1"))
                    .await
            })
        };
        settle().await;

        cancel.cancel();
        let _ = task.await.unwrap();

        assert_eq!(seen_connected.load(Ordering::SeqCst), 1);
        assert!(!connector.is_connected("host:1"));
        connector_slot.lock().take();
    }
}
