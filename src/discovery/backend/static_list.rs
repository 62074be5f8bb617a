//! 静态目标列表

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::observe_fixed;
use crate::discovery::target::{Target, TargetDiscoverer, TargetObserver};
use crate::error::Result;

/// 发现一组固定目标
///
/// 启动时通知全部目标，直到 `cancel` 被触发才结束。
#[derive(Debug, Clone, Default)]
pub struct StaticDiscoverer {
    targets: Vec<Target>,
}

impl StaticDiscoverer {
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    /// 由目标名列表构造，不带拨号选项
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::new(names.into_iter().map(Target::new))
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }
}

#[async_trait]
impl TargetDiscoverer for StaticDiscoverer {
    async fn discover(
        &self,
        cancel: CancellationToken,
        observer: Arc<dyn TargetObserver>,
    ) -> Result<()> {
        info!(targets = self.targets.len(), "Static discovery started");
        observe_fixed(cancel, observer, self.targets.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn notifies_every_target_until_cancelled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(Vec::new()));
        let observer: Arc<dyn TargetObserver> = {
            let seen = seen.clone();
            let stopped = stopped.clone();
            Arc::new(move |cancel: CancellationToken, target: Target| {
                let seen = seen.clone();
                let stopped = stopped.clone();
                async move {
                    seen.lock().push(target.name.clone());
                    cancel.cancelled().await;
                    stopped.lock().push(target.name);
                    Err::<(), _>(DiscoveryError::Cancelled)
                }
            })
        };

        let discoverer = StaticDiscoverer::from_names(["a:1", "b:2", "a:1"]);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = discoverer.discover(cancel, observer).await;

        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["a:1", "b:2"]);
        assert_eq!(stopped.lock().len(), 2);
    }

    #[tokio::test]
    async fn observer_failure_stops_discovery() {
        let observer: Arc<dyn TargetObserver> =
            Arc::new(|_: CancellationToken, target: Target| async move {
                if target.name == "bad:1" {
                    return Err(DiscoveryError::other("<error>"));
                }
                Ok(())
            });

        let discoverer = StaticDiscoverer::from_names(["good:1", "bad:1"]);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            discoverer.discover(CancellationToken::new(), observer),
        )
        .await
        .expect("discovery did not stop");

        assert_eq!(
            result.unwrap_err().to_string(),
            "failure observing 'bad:1' target: <error>"
        );
    }
}
