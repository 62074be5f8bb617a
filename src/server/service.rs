//! DiscoverApi 的 tonic 服务实现

use std::convert::Infallible;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use tonic::body::Body;
use tonic::codegen::Service;
use tonic::server::{Grpc, NamedService, ServerStreamingService};
use tonic::{Request, Response, Status};

use super::{Server, WatchResponseStream};
use crate::proto::{WATCH_APPLICATIONS_PATH, WatchApplicationsRequest, WatchApplicationsResponse};

/// 可以直接挂到 `tonic::transport::Server` 上的 DiscoverApi 服务
#[derive(Clone, Debug)]
pub struct DiscoverApiServer {
    server: Server,
}

impl DiscoverApiServer {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

impl NamedService for DiscoverApiServer {
    const NAME: &'static str = "flare.discovery.v1.DiscoverApi";
}

struct WatchApplicationsSvc(Server);

impl ServerStreamingService<WatchApplicationsRequest> for WatchApplicationsSvc {
    type Response = WatchApplicationsResponse;
    type ResponseStream = WatchResponseStream;
    type Future = BoxFuture<'static, Result<Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, _request: Request<WatchApplicationsRequest>) -> Self::Future {
        let server = self.0.clone();
        async move { Ok(Response::new(server.watch())) }.boxed()
    }
}

impl Service<http::Request<Body>> for DiscoverApiServer {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        if req.uri().path() != WATCH_APPLICATIONS_PATH {
            let path = req.uri().path().to_string();
            return async move {
                Ok(Status::unimplemented(format!("unknown method {path}")).into_http())
            }
            .boxed();
        }

        let server = self.server.clone();
        async move {
            let codec = tonic_prost::ProstCodec::<
                WatchApplicationsResponse,
                WatchApplicationsRequest,
            >::default();
            let mut grpc = Grpc::new(codec);
            Ok(grpc.server_streaming(WatchApplicationsSvc(server), req).await)
        }
        .boxed()
    }
}
