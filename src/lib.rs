//! Flare Discoverkit
//!
//! 动态发现 gRPC 目标以及目标上运行的应用，并让观察者与其存活集合保持同步。
//!
//! - [`discovery`]：目标发现后端、连接器、应用发现器和集合调和引擎
//! - [`retry`]：退避策略与重试循环
//! - [`server`]：应用可用性广播服务端
//! - [`client`]：拨号与连接抽象
//! - [`proto`]：WatchApplications 协议消息

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod proto;
pub mod retry;
pub mod server;
pub mod telemetry;

pub use client::{Connection, Dialer, GrpcDialer, Transport, WatchStream};
pub use config::{BackoffConfig, Config, ConnectorConfig};
pub use discovery::{
    Application, ApplicationDiscoverer, ApplicationObserver, BackendType, ConnectObserver,
    Connector, DialOption, DiscoveryConfig, DiscoveryFactory, DnsConfig, DnsDiscoverer,
    DnsResolver, HickoryResolver, Identity, IdentityError, KubernetesConfig,
    KubernetesEnvironmentDiscoverer, MultiDiscoverer, Reconciler, ResolveError, ResolveErrorKind,
    StaticDiscoverer, Target, TargetDiscoverer, TargetObserver,
};
pub use error::{DiscoveryError, ErrorHook, Failure, Result};
pub use retry::{Backoff, ExponentialBackoffPolicy, FixedRetryPolicy, RetryPolicy, retry_loop};
pub use server::{DiscoverApiServer, Server};
pub use telemetry::{LogFormat, init_tracing};
