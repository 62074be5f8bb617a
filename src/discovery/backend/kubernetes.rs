//! Kubernetes 服务环境变量发现
//!
//! Kubernetes 为同一命名空间内的每个服务注入 `<SERVICE>_SERVICE_HOST` 和
//! `<SERVICE>_SERVICE_PORT_<PORT>` 环境变量。环境只在启动时读取一次，
//! 之后新建的服务不会被发现。

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::observe_fixed;
use crate::discovery::config::KubernetesConfig;
use crate::discovery::target::{DialOption, Target, TargetDiscoverer, TargetObserver};
use crate::error::Result;

/// 默认端口名
pub const DEFAULT_PORT_NAME: &str = "dogma";

/// 环境变量来源
pub type EnvSource = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// 为目标生成拨号选项，参数是 `host:port`
pub type DialOptionsFn = Arc<dyn Fn(&str) -> Vec<DialOption> + Send + Sync>;

/// 基于 Kubernetes 服务环境变量的目标发现器
pub struct KubernetesEnvironmentDiscoverer {
    port_name: String,
    dial_options: Option<DialOptionsFn>,
    env: EnvSource,
}

impl KubernetesEnvironmentDiscoverer {
    pub fn new() -> Self {
        Self {
            port_name: DEFAULT_PORT_NAME.to_string(),
            dial_options: None,
            env: Arc::new(|| std::env::vars().collect()),
        }
    }

    pub fn from_config(config: &KubernetesConfig) -> Self {
        Self::new().with_port_name(config.port_name.clone())
    }

    /// 空字符串表示使用默认端口名
    pub fn with_port_name(mut self, port_name: impl Into<String>) -> Self {
        let port_name = port_name.into();
        self.port_name = if port_name.is_empty() {
            DEFAULT_PORT_NAME.to_string()
        } else {
            port_name
        };
        self
    }

    pub fn with_dial_options(mut self, dial_options: DialOptionsFn) -> Self {
        self.dial_options = Some(dial_options);
        self
    }

    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// 扫描环境变量，返回按名称排序的目标
    pub fn scan(&self) -> Vec<Target> {
        let vars: HashMap<String, String> = (self.env)().into_iter().collect();
        let suffix = format!("_SERVICE_PORT_{}", port_name_to_env(&self.port_name));

        let mut targets: Vec<Target> = vars
            .iter()
            .filter_map(|(name, port)| {
                let service = name.strip_suffix(suffix.as_str())?;
                if service.is_empty() || port.is_empty() {
                    return None;
                }

                let host = vars.get(&format!("{service}_SERVICE_HOST"))?;
                if host.is_empty() {
                    return None;
                }

                let addr = join_host_port(host, port);
                debug!(service = %service, address = %addr, "Found Kubernetes service");

                let mut target = Target::new(addr);
                if let Some(dial_options) = &self.dial_options {
                    target.options = dial_options(&target.name);
                }
                Some(target)
            })
            .collect();

        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }
}

impl Default for KubernetesEnvironmentDiscoverer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetDiscoverer for KubernetesEnvironmentDiscoverer {
    async fn discover(
        &self,
        cancel: CancellationToken,
        observer: Arc<dyn TargetObserver>,
    ) -> Result<()> {
        let targets = self.scan();
        info!(
            port_name = %self.port_name,
            targets = targets.len(),
            "Kubernetes environment discovery started"
        );
        observe_fixed(cancel, observer, targets).await
    }
}

/// 端口名转换为环境变量形式：大写，`-` 替换为 `_`
fn port_name_to_env(name: &str) -> String {
    name.replace('-', "_").to_uppercase()
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
