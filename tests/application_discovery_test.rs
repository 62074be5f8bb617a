//! 应用发现端到端测试
//!
//! 在本地端口上启动 DiscoverApi 服务，通过静态目标、连接器和应用发现器
//! 观察服务端可用性的变化。

use std::sync::Arc;
use std::time::Duration;

use flare_discoverkit::{
    Application, ApplicationDiscoverer, ApplicationObserver, ConnectObserver, Connection,
    Connector, Dialer, DiscoverApiServer, DiscoveryError, FixedRetryPolicy, GrpcDialer, Identity,
    Server, StaticDiscoverer, Target, TargetDiscoverer,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;

async fn start_server(server: Server, shutdown: CancellationToken) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(DiscoverApiServer::new(server))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await
    });

    addr.to_string()
}

fn forwarding(events: mpsc::UnboundedSender<String>) -> Arc<dyn ApplicationObserver> {
    Arc::new(move |cancel: CancellationToken, app: Application| {
        let events = events.clone();
        async move {
            let _ = events.send(format!("+{}", app.identity.key()));
            cancel.cancelled().await;
            let _ = events.send(format!("-{}", app.identity.key()));
            Err::<(), _>(DiscoveryError::Cancelled)
        }
    })
}

async fn expect(events: &mut mpsc::UnboundedReceiver<String>, expected: &str) {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected}"))
        .expect("event channel closed");
    assert_eq!(event, expected);
}

#[tokio::test]
async fn discovers_applications_announced_by_server() {
    let server = Server::new();
    let shutdown = CancellationToken::new();
    let addr = start_server(server.clone(), shutdown.clone()).await;

    let orders = Identity::new("orders", "7c1f").unwrap();
    let billing = Identity::new("billing", "a04e").unwrap();
    server.available(&orders);

    let (tx, mut events) = mpsc::unbounded_channel();
    let applications = Arc::new(
        ApplicationDiscoverer::new(forwarding(tx))
            .with_retry_policy(Arc::new(FixedRetryPolicy::new(Duration::from_millis(50)))),
    );
    let connector = Arc::new(
        Connector::new(applications)
            .with_retry_policy(Arc::new(FixedRetryPolicy::new(Duration::from_millis(50)))),
    );
    let discoverer = StaticDiscoverer::from_names([addr.clone()]);

    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        let connector = connector.clone();
        tokio::spawn(async move { discoverer.discover(cancel, connector).await })
    };

    expect(&mut events, "+7c1f").await;
    assert_eq!(connector.connections()[0].name, addr);

    server.available(&billing);
    expect(&mut events, "+a04e").await;

    server.unavailable(&orders);
    expect(&mut events, "-7c1f").await;

    cancel.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    expect(&mut events, "-a04e").await;
    assert!(connector.connections().is_empty());

    shutdown.cancel();
}

#[tokio::test]
async fn target_without_discover_api_is_left_alone() {
    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = Target::new(listener.local_addr().unwrap().to_string());

    // 空路由：任何方法都返回 Unimplemented
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tonic::transport::Server::builder()
                .add_routes(tonic::service::Routes::default())
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    shutdown.cancelled().await
                })
                .await
        }
    });

    let transport = GrpcDialer::new().dial(&target).await.unwrap();
    let connection = Connection::new(target, transport);

    let (tx, mut events) = mpsc::unbounded_channel();
    let applications = ApplicationDiscoverer::new(forwarding(tx));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        applications.target_connected(CancellationToken::new(), connection),
    )
    .await
    .expect("watch did not finish");

    assert!(result.is_ok());
    assert!(events.try_recv().is_err());

    shutdown.cancel();
}
