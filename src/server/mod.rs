//! 应用可用性广播服务端
//!
//! [`Server`] 维护本进程内可用应用的集合，并把集合的变化推送给每个
//! WatchApplications 调用者。[`DiscoverApiServer`] 把它暴露为 tonic 服务。
//!
//! 可用集合按写时复制方式更新：每次变化都安装一个新的 `Arc` 版本并触发
//! 当前的变化信号，因此写入方从不等待 watcher。

mod service;

pub use service::DiscoverApiServer;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info};

use crate::discovery::identity::Identity;
use crate::proto::{self, WatchApplicationsResponse};

/// 每个 watcher 的发送缓冲
pub const WATCH_BUFFER: usize = 64;

/// watch 响应流
pub type WatchResponseStream = ReceiverStream<Result<WatchApplicationsResponse, Status>>;

type AvailableSet = Arc<BTreeMap<String, Identity>>;

struct State {
    /// 按应用键索引，每个版本创建后不再修改
    available: AvailableSet,
    /// 当前版本被替换时取消
    changed: CancellationToken,
}

/// 应用可用性广播服务端
///
/// 克隆共享同一个可用集合。
#[derive(Clone)]
pub struct Server {
    state: Arc<Mutex<State>>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                available: Arc::new(BTreeMap::new()),
                changed: CancellationToken::new(),
            })),
        }
    }

    /// 标记应用可用
    pub fn available(&self, identity: &Identity) {
        self.update(identity, true);
    }

    /// 标记应用不可用
    pub fn unavailable(&self, identity: &Identity) {
        self.update(identity, false);
    }

    fn update(&self, identity: &Identity, available: bool) {
        let mut state = self.state.lock();

        if state.available.contains_key(identity.key()) == available {
            return;
        }

        let mut next = (*state.available).clone();
        if available {
            next.insert(identity.key().to_string(), identity.clone());
        } else {
            next.remove(identity.key());
        }
        state.available = Arc::new(next);

        let previous = std::mem::replace(&mut state.changed, CancellationToken::new());
        previous.cancel();

        info!(application = %identity, available, "Application availability changed");
    }

    /// 按应用键查询是否可用
    pub fn is_available(&self, key: &str) -> bool {
        self.state.lock().available.contains_key(key)
    }

    /// 当前可用的应用，按键排序
    pub fn snapshot(&self) -> Vec<Identity> {
        self.state.lock().available.values().cloned().collect()
    }

    fn current(&self) -> (AvailableSet, CancellationToken) {
        let state = self.state.lock();
        (state.available.clone(), state.changed.clone())
    }

    /// 把可用性变化写入 `sender`，直到接收端关闭
    ///
    /// 首先为当前每个可用应用发送一条 `available = true`，之后只发送差异。
    pub async fn watch_into(
        &self,
        sender: mpsc::Sender<Result<WatchApplicationsResponse, Status>>,
    ) {
        let mut prev: AvailableSet = Arc::new(BTreeMap::new());

        loop {
            let (next, changed) = self.current();

            let added = next
                .iter()
                .filter(|(key, _)| !prev.contains_key(*key))
                .map(|(_, identity)| (identity, true));
            let removed = prev
                .iter()
                .filter(|(key, _)| !next.contains_key(*key))
                .map(|(_, identity)| (identity, false));

            for (identity, available) in added.chain(removed) {
                let response =
                    WatchApplicationsResponse::new(proto::Identity::from(identity), available);
                if sender.send(Ok(response)).await.is_err() {
                    debug!("Watcher disconnected");
                    return;
                }
            }

            prev = next;

            tokio::select! {
                biased;
                _ = sender.closed() => {
                    debug!("Watcher disconnected");
                    return;
                }
                _ = changed.cancelled() => {}
            }
        }
    }

    /// 启动一个 watcher 任务并返回其响应流
    pub fn watch(&self) -> WatchResponseStream {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let server = self.clone();
        tokio::spawn(async move { server.watch_into(tx).await });
        ReceiverStream::new(rx)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("available", &self.state.lock().available.len())
            .finish()
    }
}
