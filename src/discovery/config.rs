//! 目标发现配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::backend::kubernetes::DEFAULT_PORT_NAME;

/// 目标发现配置
///
/// 每个配置了的后端都会启动；多个后端同时配置时并行运行。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// DNS 轮询
    pub dns: Option<DnsConfig>,

    /// 固定目标列表（`host:port` 或 URI）
    pub static_targets: Vec<String>,

    /// Kubernetes 服务环境变量
    pub kubernetes: Option<KubernetesConfig>,
}

impl DiscoveryConfig {
    /// 已启用的后端，顺序固定为 dns、static、kubernetes
    pub fn backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        if self.dns.is_some() {
            backends.push(BackendType::Dns);
        }
        if !self.static_targets.is_empty() {
            backends.push(BackendType::Static);
        }
        if self.kubernetes.as_ref().is_some_and(|k| k.enabled) {
            backends.push(BackendType::Kubernetes);
        }
        backends
    }
}

/// 后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Dns,
    Static,
    Kubernetes,
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dns" => Ok(BackendType::Dns),
            "static" | "static-list" => Ok(BackendType::Static),
            "kubernetes" | "k8s" => Ok(BackendType::Kubernetes),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

/// DNS 轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// 被查询的主机名
    pub query_host: String,

    /// 查询间隔（毫秒），0 表示默认 10 秒
    #[serde(default)]
    pub query_interval_ms: u64,
}

impl DnsConfig {
    pub fn query_interval(&self) -> Duration {
        Duration::from_millis(self.query_interval_ms)
    }
}

/// Kubernetes 环境变量配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// 服务端口名
    #[serde(default = "default_port_name")]
    pub port_name: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port_name: default_port_name(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_port_name() -> String {
    DEFAULT_PORT_NAME.to_string()
}
