//! DNS 轮询发现后端
//!
//! 周期性地解析单个主机名，把结果中的每个地址视为独立目标。这不是 DNS-SD 实现。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind as HickoryErrorKind;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::config::DnsConfig;
use crate::discovery::reconcile::Reconciler;
use crate::discovery::target::{Target, TargetDiscoverer, TargetObserver, observe_targets};
use crate::error::{DiscoveryError, Result};

/// 默认查询间隔
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(10);

/// 解析失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    /// 暂时性网络问题
    Temporary,
    /// 主机当前不存在
    NotFound,
    Other,
}

/// DNS 解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unable to resolve '{host}': {message}")]
pub struct ResolveError {
    pub host: String,
    pub kind: ResolveErrorKind,
    pub message: String,
}

impl ResolveError {
    pub fn new(
        host: impl Into<String>,
        kind: ResolveErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            kind,
            message: message.into(),
        }
    }

    /// 不应使发现器停止的错误
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self.kind,
            ResolveErrorKind::Temporary | ResolveErrorKind::NotFound
        )
    }
}

/// DNS 解析器
#[async_trait]
pub trait DnsResolver: Send + Sync + 'static {
    /// 返回主机的地址（IP 或主机名）
    async fn lookup_host(&self, host: &str) -> std::result::Result<Vec<String>, ResolveError>;
}

/// 基于 hickory 的解析器
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryResolver {
    /// 读取系统配置，失败时使用默认配置
    pub fn from_system_conf() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load system resolver configuration, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }

    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn lookup_host(&self, host: &str) -> std::result::Result<Vec<String>, ResolveError> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => Ok(lookup.iter().map(|ip| ip.to_string()).collect()),
            Err(e) => {
                let kind = match e.kind() {
                    HickoryErrorKind::NoRecordsFound { .. } => ResolveErrorKind::NotFound,
                    HickoryErrorKind::Timeout | HickoryErrorKind::NoConnections => {
                        ResolveErrorKind::Temporary
                    }
                    _ => ResolveErrorKind::Other,
                };
                Err(ResolveError::new(host, kind, e.to_string()))
            }
        }
    }
}

/// 地址展开函数：由新出现的地址生成目标
pub type NewTargetsFn = Arc<dyn Fn(&str) -> Result<Vec<Target>> + Send + Sync>;

/// DNS 发现器
pub struct DnsDiscoverer {
    query_host: String,
    new_targets: Option<NewTargetsFn>,
    resolver: Arc<dyn DnsResolver>,
    query_interval: Duration,
}

impl DnsDiscoverer {
    /// 使用系统解析器创建发现器
    pub fn new(query_host: impl Into<String>) -> Self {
        Self::with_resolver(query_host, Arc::new(HickoryResolver::from_system_conf()))
    }

    pub fn with_resolver(query_host: impl Into<String>, resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            query_host: query_host.into(),
            new_targets: None,
            resolver,
            query_interval: DEFAULT_QUERY_INTERVAL,
        }
    }

    pub fn from_config(config: &DnsConfig) -> Self {
        Self::new(config.query_host.clone()).with_query_interval(config.query_interval())
    }

    /// 零值表示使用默认间隔
    pub fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = if interval.is_zero() {
            DEFAULT_QUERY_INTERVAL
        } else {
            interval
        };
        self
    }

    /// 自定义地址展开；默认每个地址生成一个同名目标
    pub fn with_new_targets(mut self, new_targets: NewTargetsFn) -> Self {
        self.new_targets = Some(new_targets);
        self
    }

    pub fn query_host(&self) -> &str {
        &self.query_host
    }

    pub fn query_interval(&self) -> Duration {
        self.query_interval
    }

    /// 解析查询主机，地址统一转为小写
    async fn query(&self) -> Result<HashSet<String>> {
        match self.resolver.lookup_host(&self.query_host).await {
            Ok(addrs) => Ok(addrs.into_iter().map(|a| a.to_lowercase()).collect()),
            Err(e) if e.is_ignorable() => {
                debug!(host = %self.query_host, error = %e, "Treating DNS failure as empty result");
                Ok(HashSet::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn expand(&self, addr: &str) -> Result<Vec<Target>> {
        match &self.new_targets {
            Some(new_targets) => new_targets(addr),
            None => Ok(vec![Target::new(addr)]),
        }
    }

    fn sync(
        &self,
        reconciler: &mut Reconciler<String, Target>,
        results: HashSet<String>,
    ) -> Result<()> {
        let delta = reconciler.delta(results.iter());

        for addr in &delta.removed {
            reconciler.remove(addr);
            info!(host = %self.query_host, address = %addr, "Address removed");
        }

        for addr in delta.added {
            let targets = self.expand(&addr)?;
            info!(
                host = %self.query_host,
                address = %addr,
                targets = targets.len(),
                "Address discovered"
            );
            reconciler.insert(addr, targets);
        }

        Ok(())
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        reconciler: &mut Reconciler<String, Target>,
    ) -> Result<()> {
        loop {
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                err = reconciler.failed() => return Err(err),
                results = self.query() => results?,
            };

            self.sync(reconciler, results)?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                err = reconciler.failed() => return Err(err),
                _ = tokio::time::sleep(self.query_interval) => {}
            }
        }
    }
}

#[async_trait]
impl TargetDiscoverer for DnsDiscoverer {
    async fn discover(
        &self,
        cancel: CancellationToken,
        observer: Arc<dyn TargetObserver>,
    ) -> Result<()> {
        info!(
            host = %self.query_host,
            interval_ms = self.query_interval.as_millis() as u64,
            "DNS discovery started"
        );

        let mut reconciler = Reconciler::new(cancel.child_token(), observe_targets(observer));
        let result = self.run(&cancel, &mut reconciler).await;
        let result = reconciler.finish(result).await;

        info!(host = %self.query_host, "DNS discovery stopped");
        result
    }
}
