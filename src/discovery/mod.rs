//! 目标与应用发现
//!
//! 管线由三层观察者组成：
//! - [`TargetDiscoverer`] 发现可拨号的目标并通知 [`TargetObserver`]；
//! - [`Connector`] 作为目标观察者建立连接并通知 [`ConnectObserver`]；
//! - [`ApplicationDiscoverer`] 作为连接观察者 watch 应用并通知 [`ApplicationObserver`]。
//!
//! 每一层都通过 [`reconcile::Reconciler`] 维护按键的生命周期。

pub mod application;
pub mod backend;
pub mod config;
pub mod connector;
pub mod factory;
pub mod identity;
pub mod reconcile;
pub mod target;

pub use application::{Application, ApplicationDiscoverer, ApplicationObserver};
pub use backend::dns::{DnsDiscoverer, DnsResolver, HickoryResolver, ResolveError, ResolveErrorKind};
pub use backend::kubernetes::KubernetesEnvironmentDiscoverer;
pub use backend::static_list::StaticDiscoverer;
pub use config::{BackendType, DiscoveryConfig, DnsConfig, KubernetesConfig};
pub use connector::{ConnectObserver, Connector};
pub use factory::{DiscoveryFactory, MultiDiscoverer};
pub use identity::{Identity, IdentityError};
pub use reconcile::{Delta, Reconciler, Resource};
pub use target::{DialOption, Target, TargetDiscoverer, TargetObserver};
