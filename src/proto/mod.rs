//! 应用发现 watch 协议
//!
//! 消息结构与 `flare.discovery.v1` 包的 protobuf 定义逐字段对应。

use http::uri::PathAndQuery;
use tonic::codec::Streaming;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

/// WatchApplications 方法路径
pub const WATCH_APPLICATIONS_PATH: &str = "/flare.discovery.v1.DiscoverApi/WatchApplications";

/// 应用标识
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Identity {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub key: ::prost::alloc::string::String,
}

/// WatchApplications 请求（无字段）
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct WatchApplicationsRequest {}

/// 应用可用性变化
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct WatchApplicationsResponse {
    #[prost(message, optional, tag = "1")]
    pub identity: ::core::option::Option<Identity>,
    #[prost(bool, tag = "2")]
    pub available: bool,
}

impl WatchApplicationsResponse {
    pub fn new(identity: Identity, available: bool) -> Self {
        Self {
            identity: Some(identity),
            available,
        }
    }
}

/// 在 `channel` 上发起 WatchApplications 调用
///
/// 远端未实现该方法时，`Unimplemented` 可能在这里返回，也可能作为流的第一个元素到达。
pub async fn watch_applications(
    channel: Channel,
) -> Result<Response<Streaming<WatchApplicationsResponse>>, Status> {
    let mut client = tonic::client::Grpc::new(channel);
    client
        .ready()
        .await
        .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))?;

    let codec =
        tonic_prost::ProstCodec::<WatchApplicationsRequest, WatchApplicationsResponse>::default();
    let path = PathAndQuery::from_static(WATCH_APPLICATIONS_PATH);

    client
        .server_streaming(Request::new(WatchApplicationsRequest {}), path, codec)
        .await
}
