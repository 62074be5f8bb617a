use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::config::DiscoveryConfig;
use crate::discovery::target::DialOption;
use crate::error::{DiscoveryError, Result};
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use crate::retry::exponential::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::telemetry::{self, LogFormat};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// tracing 过滤指令，`RUST_LOG` 优先
    pub log_level: Option<String>,
    pub discovery: DiscoveryConfig,
    pub connector: ConnectorConfig,
    pub backoff: BackoffConfig,
}

/// 连接器默认拨号选项
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub connect_timeout_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub tcp_nodelay: Option<bool>,
    pub user_agent: Option<String>,
}

impl ConnectorConfig {
    pub fn dial_options(&self) -> Vec<DialOption> {
        let mut options = Vec::new();
        if let Some(ms) = self.connect_timeout_ms {
            options.push(DialOption::ConnectTimeout(Duration::from_millis(ms)));
        }
        if let Some(ms) = self.timeout_ms {
            options.push(DialOption::Timeout(Duration::from_millis(ms)));
        }
        if let Some(enabled) = self.tcp_nodelay {
            options.push(DialOption::TcpNodelay(enabled));
        }
        if let Some(agent) = &self.user_agent {
            options.push(DialOption::UserAgent(agent.clone()));
        }
        options
    }
}

/// 重试退避
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> Arc<dyn RetryPolicy> {
        Arc::new(
            ExponentialBackoffPolicy::new(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_jitter(self.jitter),
        )
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DiscoveryError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DiscoveryError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// 按 `log_level` 安装全局 tracing subscriber
    ///
    /// 发现管线本身不安装 subscriber，应用在启动时调用一次。
    pub fn init_tracing(&self, format: LogFormat) -> Result<()> {
        telemetry::init_tracing(self.log_level.as_deref(), format)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(dns) = &self.discovery.dns {
            if dns.query_host.trim().is_empty() {
                return Err(DiscoveryError::config("discovery.dns.query_host must not be empty"));
            }
        }
        if let Some(kubernetes) = &self.discovery.kubernetes {
            if kubernetes.enabled && kubernetes.port_name.trim().is_empty() {
                return Err(DiscoveryError::config(
                    "discovery.kubernetes.port_name must not be empty",
                ));
            }
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(DiscoveryError::config(
                "backoff.max_delay_ms must not be less than backoff.base_delay_ms",
            ));
        }
        Ok(())
    }
}
