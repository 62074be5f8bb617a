//! 发现管线工厂
//!
//! 从配置构建目标发现器、连接器和应用发现器，并提供一键启动的应用发现管线。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::discovery::application::{ApplicationDiscoverer, ApplicationObserver};
use crate::discovery::backend::dns::DnsDiscoverer;
use crate::discovery::backend::kubernetes::KubernetesEnvironmentDiscoverer;
use crate::discovery::backend::static_list::StaticDiscoverer;
use crate::discovery::config::{BackendType, DiscoveryConfig};
use crate::discovery::connector::{ConnectObserver, Connector};
use crate::discovery::target::{TargetDiscoverer, TargetObserver};
use crate::error::{DiscoveryError, Result};

/// 并行运行多个目标发现器
///
/// 任一发现器以非取消错误结束时取消其余发现器，并返回该错误。
pub struct MultiDiscoverer {
    discoverers: Vec<Arc<dyn TargetDiscoverer>>,
}

impl MultiDiscoverer {
    pub fn new(discoverers: Vec<Arc<dyn TargetDiscoverer>>) -> Self {
        Self { discoverers }
    }

    pub fn len(&self) -> usize {
        self.discoverers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discoverers.is_empty()
    }
}

#[async_trait]
impl TargetDiscoverer for MultiDiscoverer {
    async fn discover(
        &self,
        cancel: CancellationToken,
        observer: Arc<dyn TargetObserver>,
    ) -> Result<()> {
        let group = cancel.child_token();
        let mut tasks = JoinSet::new();

        for discoverer in &self.discoverers {
            let discoverer = discoverer.clone();
            let group = group.clone();
            let observer = observer.clone();
            tasks.spawn(async move { discoverer.discover(group, observer).await });
        }

        let mut first: Option<DiscoveryError> = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) => DiscoveryError::other(join_err),
            };

            group.cancel();
            let replace = match &first {
                None => true,
                Some(prev) => prev.is_cancelled() && !err.is_cancelled(),
            };
            if replace {
                first = Some(err);
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// 发现管线工厂
pub struct DiscoveryFactory;

impl DiscoveryFactory {
    /// 创建单个后端
    pub fn create_backend(
        backend: BackendType,
        config: &DiscoveryConfig,
    ) -> Result<Arc<dyn TargetDiscoverer>> {
        match backend {
            BackendType::Dns => {
                let dns = config
                    .dns
                    .as_ref()
                    .ok_or_else(|| DiscoveryError::config("discovery.dns is not configured"))?;
                Ok(Arc::new(DnsDiscoverer::from_config(dns)))
            }
            BackendType::Static => Ok(Arc::new(StaticDiscoverer::from_names(
                config.static_targets.iter().cloned(),
            ))),
            BackendType::Kubernetes => {
                let kubernetes = config.kubernetes.clone().unwrap_or_default();
                Ok(Arc::new(KubernetesEnvironmentDiscoverer::from_config(&kubernetes)))
            }
        }
    }

    /// 按配置创建目标发现器，多个后端时组合为 [`MultiDiscoverer`]
    pub fn create_discoverer(config: &DiscoveryConfig) -> Result<Arc<dyn TargetDiscoverer>> {
        let mut discoverers = config
            .backends()
            .into_iter()
            .map(|backend| Self::create_backend(backend, config))
            .collect::<Result<Vec<_>>>()?;

        match discoverers.len() {
            0 => Err(DiscoveryError::config("no discovery backend configured")),
            1 => Ok(discoverers.remove(0)),
            _ => Ok(Arc::new(MultiDiscoverer::new(discoverers))),
        }
    }

    /// 按配置创建连接器
    pub fn create_connector(config: &Config, observer: Arc<dyn ConnectObserver>) -> Connector {
        Connector::new(observer)
            .with_dial_options(config.connector.dial_options())
            .with_retry_policy(config.backoff.policy())
    }

    /// 按配置创建应用发现器
    pub fn create_application_discoverer(
        config: &Config,
        observer: Arc<dyn ApplicationObserver>,
    ) -> ApplicationDiscoverer {
        ApplicationDiscoverer::new(observer).with_retry_policy(config.backoff.policy())
    }

    /// 运行完整的应用发现管线：目标发现 → 连接 → watch 应用
    ///
    /// 直到 `cancel` 被触发或观察者失败才返回。
    pub async fn run_application_discovery(
        config: &Config,
        cancel: CancellationToken,
        observer: Arc<dyn ApplicationObserver>,
    ) -> Result<()> {
        let discoverer = Self::create_discoverer(&config.discovery)?;
        let applications = Arc::new(Self::create_application_discoverer(config, observer));
        let connector = Arc::new(Self::create_connector(config, applications));

        info!(backends = ?config.discovery.backends(), "Application discovery started");
        discoverer.discover(cancel, connector).await
    }
}
