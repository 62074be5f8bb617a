//! Flare Discoverkit 错误处理模块
//!
//! 所有发现机制共享同一个错误类型 [`DiscoveryError`]。
//! 重试循环通过 [`DiscoveryError::classify`] 决定下一步动作：
//! 停止并返回成功、立即向上传播，或者退避后重试。

pub mod grpc;

use std::sync::Arc;

use thiserror::Error;

use crate::discovery::application::Application;
use crate::discovery::backend::dns::ResolveError;
use crate::discovery::identity::IdentityError;
use crate::discovery::target::Target;

/// Flare Discoverkit 统一结果类型
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// 装箱的任意错误（用于包装观察者或外部组件返回的错误）
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 错误回调
///
/// 第一个参数是出错的上下文名称（目标名或连接名）。
pub type ErrorHook = Arc<dyn Fn(&str, &DiscoveryError) + Send + Sync>;

/// Flare Discoverkit 统一错误类型
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// 根上下文或生命周期上下文已取消
    #[error("operation cancelled")]
    Cancelled,

    /// 远端不支持发现协议（不是真正的错误）
    #[error("remote does not implement the discovery API")]
    NotSupported,

    /// 目标观察者返回了错误
    #[error("failure observing '{}' target: {source}", .target.name)]
    TargetObserver {
        target: Target,
        #[source]
        source: Box<DiscoveryError>,
    },

    /// 应用观察者返回了错误
    #[error("failure observing '{}' application: {source}", .application.identity)]
    ApplicationObserver {
        application: Application,
        #[source]
        source: Box<DiscoveryError>,
    },

    /// 观察者任务 panic
    #[error("observer for '{key}' panicked")]
    ObserverPanicked { key: String },

    /// 应用标识不合法
    #[error("invalid application identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// DNS 解析失败
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// gRPC 调用失败
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// gRPC 连接失败
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// 拨号选项不合法
    #[error("invalid dial option for '{target}': {reason}")]
    InvalidDialOption { target: String, reason: String },

    /// watch 流被远端正常关闭
    #[error("watch stream closed by remote")]
    StreamClosed,

    /// 配置错误
    #[error("config error: {0}")]
    Config(String),

    /// 其他错误（通常来自用户提供的回调）
    #[error(transparent)]
    Other(BoxError),
}

/// 失败分类，驱动重试循环的下一步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// 远端缺少该能力：停止循环并返回成功
    NotSupported,
    /// 观察者失败：停止循环并立即传播，从不重试
    Observer,
    /// 根上下文结束：停止循环并传播取消
    Cancelled,
    /// 其他所有失败：退避后重试
    Transient,
}

impl DiscoveryError {
    /// 包装任意错误
    pub fn other<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        DiscoveryError::Other(err.into())
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        DiscoveryError::Config(msg.into())
    }

    /// 对错误进行分类
    pub fn classify(&self) -> Failure {
        match self {
            DiscoveryError::NotSupported => Failure::NotSupported,
            DiscoveryError::TargetObserver { .. }
            | DiscoveryError::ApplicationObserver { .. }
            | DiscoveryError::ObserverPanicked { .. } => Failure::Observer,
            DiscoveryError::Cancelled => Failure::Cancelled,
            DiscoveryError::Status(status) if grpc::is_unimplemented(status) => {
                Failure::NotSupported
            }
            _ => Failure::Transient,
        }
    }

    /// 是否为取消错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DiscoveryError::Cancelled)
    }

    /// 是否为观察者失败
    pub fn is_observer_failure(&self) -> bool {
        self.classify() == Failure::Observer
    }
}
