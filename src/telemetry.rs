//! 日志初始化

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{DiscoveryError, Result};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// 构造过滤器：`RUST_LOG` 优先，其次使用 `level`，默认 `info`
pub fn env_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")))
}

/// 安装全局 tracing subscriber
///
/// 已经安装过时返回错误。
pub fn init_tracing(level: Option<&str>, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(level));

    let installed = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    installed.map_err(|e| {
        DiscoveryError::config(format!("failed to install tracing subscriber: {e}"))
    })
}
