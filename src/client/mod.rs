//! gRPC 客户端模块
//!
//! 提供目标拨号器和连接抽象。发现流程只依赖 [`Dialer`] 与 [`Transport`]，
//! 生产环境使用 [`GrpcDialer`] 和 `tonic::transport::Channel`。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tonic::Status;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::discovery::target::{DialOption, Target};
use crate::error::{DiscoveryError, Result};
use crate::proto::{self, WatchApplicationsResponse};

/// WatchApplications 响应流
pub type WatchStream = BoxStream<'static, std::result::Result<WatchApplicationsResponse, Status>>;

/// 已建立连接上的 RPC 能力
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 打开 WatchApplications 流
    async fn watch_applications(&self) -> Result<WatchStream>;
}

#[async_trait]
impl Transport for Channel {
    async fn watch_applications(&self) -> Result<WatchStream> {
        let response = proto::watch_applications(self.clone()).await?;
        Ok(response.into_inner().boxed())
    }
}

/// 到某个目标的连接
///
/// 克隆共享同一底层连接；最后一个克隆被丢弃时连接关闭。
#[derive(Clone)]
pub struct Connection {
    target: Target,
    transport: Arc<dyn Transport>,
}

impl Connection {
    pub fn new(target: Target, transport: Arc<dyn Transport>) -> Self {
        Self { target, transport }
    }

    /// 连接对应的目标
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// 目标名称
    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target.name)
            .finish_non_exhaustive()
    }
}

/// 目标拨号器
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// 按 `target.options` 的顺序应用拨号选项并建立连接
    async fn dial(&self, target: &Target) -> Result<Arc<dyn Transport>>;
}

/// 基于 tonic 的拨号器
#[derive(Debug, Clone, Default)]
pub struct GrpcDialer {
    /// 为 `true` 时不等待连接建立，首个请求时才连接
    pub lazy: bool,
}

impl GrpcDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy() -> Self {
        Self { lazy: true }
    }

    /// 根据目标构造 `Endpoint`
    ///
    /// 没有 scheme 的目标名按 `http://` 处理。
    pub fn endpoint(target: &Target) -> Result<Endpoint> {
        let uri = if target.name.contains("://") {
            target.name.clone()
        } else {
            format!("http://{}", target.name)
        };

        let mut endpoint = Endpoint::from_shared(uri)?;

        for option in &target.options {
            endpoint = match option {
                DialOption::ConnectTimeout(timeout) => endpoint.connect_timeout(*timeout),
                DialOption::Timeout(timeout) => endpoint.timeout(*timeout),
                DialOption::TcpNodelay(enabled) => endpoint.tcp_nodelay(*enabled),
                DialOption::TcpKeepalive(interval) => endpoint.tcp_keepalive(*interval),
                DialOption::Http2KeepAliveInterval(interval) => {
                    endpoint.http2_keep_alive_interval(*interval)
                }
                DialOption::ConcurrencyLimit(limit) => endpoint.concurrency_limit(*limit),
                DialOption::UserAgent(agent) => endpoint.user_agent(agent.clone()).map_err(|e| {
                    DiscoveryError::InvalidDialOption {
                        target: target.name.clone(),
                        reason: format!("invalid user agent: {e}"),
                    }
                })?,
            };
        }

        Ok(endpoint)
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(&self, target: &Target) -> Result<Arc<dyn Transport>> {
        let endpoint = Self::endpoint(target)?;

        let channel = if self.lazy {
            endpoint.connect_lazy()
        } else {
            endpoint.connect().await?
        };

        debug!(dial_target = %target.name, "Dialed gRPC target");
        Ok(Arc::new(channel))
    }
}
