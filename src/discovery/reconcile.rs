//! 集合调和引擎
//!
//! 将"当前存在什么"的快照序列转换为按键的生命周期启动/取消事件。
//! 每个存活的键持有一个从根令牌派生的取消令牌，以及在该令牌下运行的观察任务。
//!
//! 调和器由唯一的驱动循环独占（`&mut self`），观察任务只拿到自己的令牌和资源，
//! 因此存活键的簿记不需要加锁。

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{DiscoveryError, Result};

/// 调和器管理的资源
pub trait Resource: Clone + Send + 'static {
    /// 用于日志的简短描述
    fn describe(&self) -> String;

    /// 将观察者返回的错误包装为携带该资源的观察者失败
    fn observer_failure(self, cause: DiscoveryError) -> DiscoveryError;
}

/// 观察函数：`(生命周期令牌, 资源)`
pub type ObserveFn<R> =
    Arc<dyn Fn(CancellationToken, R) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 从闭包构造观察函数
pub fn observe_fn<R, F, Fut>(f: F) -> ObserveFn<R>
where
    F: Fn(CancellationToken, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |cancel, resource| f(cancel, resource).boxed())
}

/// 一次调和需要执行的变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<K> {
    /// 存活但不在新快照中的键
    pub removed: Vec<K>,
    /// 在新快照中但尚未存活的键
    pub added: Vec<K>,
}

impl<K> Delta<K> {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// 集合调和器
pub struct Reconciler<K, R> {
    root: CancellationToken,
    live: HashMap<K, CancellationToken>,
    tasks: JoinSet<Result<()>>,
    observe: ObserveFn<R>,
}

impl<K, R> Reconciler<K, R>
where
    K: Eq + Hash + Clone + Display + Send + 'static,
    R: Resource,
{
    /// 创建调和器
    ///
    /// 所有生命周期令牌都从 `root` 派生；取消 `root` 即取消全部生命周期。
    pub fn new(root: CancellationToken, observe: ObserveFn<R>) -> Self {
        Self {
            root,
            live: HashMap::new(),
            tasks: JoinSet::new(),
            observe,
        }
    }

    /// 根令牌
    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    pub fn is_live(&self, key: &K) -> bool {
        self.live.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// 当前存活的键
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.live.keys()
    }

    /// 计算从当前存活集合到 `next` 的变更
    pub fn delta<'a, I>(&self, next: I) -> Delta<K>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let next: HashSet<&K> = next.into_iter().collect();

        let removed = self
            .live
            .keys()
            .filter(|key| !next.contains(key))
            .cloned()
            .collect();

        let added = next
            .into_iter()
            .filter(|key| !self.live.contains_key(*key))
            .cloned()
            .collect();

        Delta { removed, added }
    }

    /// 用新快照调和存活集合
    ///
    /// 先取消消失的键，再为新出现的键启动生命周期；两边都存在的键不受影响。
    pub fn reconcile(&mut self, snapshot: HashMap<K, R>) -> Delta<K> {
        let delta = self.delta(snapshot.keys());

        for key in &delta.removed {
            self.remove(key);
        }

        for (key, resource) in snapshot {
            if !self.live.contains_key(&key) {
                self.insert(key, [resource]);
            }
        }

        delta
    }

    /// 为 `key` 启动生命周期，每个资源一个观察任务
    ///
    /// 资源为空时仍然把键记为存活。键已存活时不做任何事并返回 `false`。
    pub fn insert<I>(&mut self, key: K, resources: I) -> bool
    where
        I: IntoIterator<Item = R>,
    {
        if self.live.contains_key(&key) {
            return false;
        }

        let lifecycle = self.root.child_token();
        let mut count = 0usize;

        for resource in resources {
            self.spawn(lifecycle.clone(), resource);
            count += 1;
        }

        debug!(key = %key, observers = count, "Lifecycle started");
        self.live.insert(key, lifecycle);
        true
    }

    /// 取消 `key` 的生命周期
    ///
    /// 键不存活时为空操作，返回 `false`。
    pub fn remove(&mut self, key: &K) -> bool {
        match self.live.remove(key) {
            Some(lifecycle) => {
                lifecycle.cancel();
                debug!(key = %key, "Lifecycle cancelled");
                true
            }
            None => false,
        }
    }

    fn spawn(&mut self, lifecycle: CancellationToken, resource: R) {
        let description = resource.describe();
        let observe = (self.observe)(lifecycle.clone(), resource.clone());

        self.tasks.spawn(async move {
            let result = match AssertUnwindSafe(observe).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(key = %description, "Observer panicked");
                    return Err(DiscoveryError::ObserverPanicked { key: description });
                }
            };

            match result {
                Ok(()) => Ok(()),
                Err(DiscoveryError::Cancelled) if lifecycle.is_cancelled() => Ok(()),
                Err(cause) => {
                    error!(key = %description, error = %cause, "Observer failed");
                    Err(resource.observer_failure(cause))
                }
            }
        });
    }

    /// 等待第一个观察者失败
    ///
    /// 正常结束的观察任务被静默回收。没有失败时永远挂起，适合放在 `select!` 中。
    /// 该 future 可以安全地被取消。
    pub async fn failed(&mut self) -> DiscoveryError {
        loop {
            match self.tasks.join_next().await {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(err))) => return err,
                Some(Err(join_err)) => {
                    debug!(error = %join_err, "Observer task aborted");
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// 取消所有生命周期并等待全部观察任务退出
    ///
    /// 返回后不会再有观察者在运行。若有观察任务以失败结束，返回第一个失败。
    pub async fn shutdown(&mut self) -> Result<()> {
        self.root.cancel();
        self.live.clear();

        let mut first = None;
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok(Err(err)) = joined {
                first.get_or_insert(err);
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 关闭调和器并合并驱动循环的结果
    ///
    /// 驱动循环因取消而结束、但关闭过程中发现了观察者失败时，返回该失败。
    pub async fn finish(mut self, result: Result<()>) -> Result<()> {
        let drained = self.shutdown().await;

        match (result, drained) {
            (Err(DiscoveryError::Cancelled), Err(err)) => Err(err),
            (Err(err), _) => Err(err),
            (Ok(()), drained) => drained,
        }
    }
}
