//! 目标发现后端
//!
//! - [`dns`]：周期性解析主机名
//! - [`static_list`]：固定目标列表
//! - [`kubernetes`]：Kubernetes 服务环境变量

pub mod dns;
pub mod kubernetes;
pub mod static_list;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::discovery::reconcile::Reconciler;
use crate::discovery::target::{Target, TargetObserver, observe_targets};
use crate::error::{DiscoveryError, Result};

/// 以一次性快照通知全部目标，然后等待取消或观察者失败
///
/// 同名目标只保留第一个。
pub(crate) async fn observe_fixed(
    cancel: CancellationToken,
    observer: Arc<dyn TargetObserver>,
    targets: Vec<Target>,
) -> Result<()> {
    let mut snapshot = HashMap::with_capacity(targets.len());
    for target in targets {
        snapshot.entry(target.name.clone()).or_insert(target);
    }

    let mut reconciler = Reconciler::new(cancel.child_token(), observe_targets(observer));
    reconciler.reconcile(snapshot);

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
        err = reconciler.failed() => Err(err),
    };

    reconciler.finish(result).await
}
