//! S6: a stream's resource scope is released exactly once no matter how many
//! times `close`/`reset` are called afterwards.

mod common;

use junction::discovery::AddrInfo;
use junction::resource::Limits;
use junction::transport::memory::MemoryNetwork;

#[tokio::test]
async fn reset_close_reset_cleans_up_exactly_once() {
    let net = MemoryNetwork::new();
    let server = common::spawn_host(&net).await;
    let client = common::spawn_host(&net).await;

    server.host.set_stream_handler(
        "/echo/1.0.0",
        std::sync::Arc::new(move |_stream, _peer| Box::pin(async move {})),
    );

    let addr_info = AddrInfo { peer: server.host.id().clone(), addrs: vec![server.addr.clone()] };
    client.host.connect(&addr_info).await.unwrap();

    let stream = client.host.new_stream(server.host.id(), &["/echo/1.0.0".to_string()]).await.unwrap();

    // Outbound connections know the remote peer upfront, so the stream scope
    // is parented to the peer scope rather than `transient`.
    let resources = client.host.network().resources();
    let peer_scope = resources.peer_scope(server.host.id(), Limits::unbounded());
    let before = resources.stat(peer_scope);
    assert_eq!(before.outbound_streams, 1);

    stream.reset().await;
    stream.close().await;
    stream.reset().await;

    assert!(stream.is_closed());

    let after = resources.stat(peer_scope);
    assert_eq!(after.outbound_streams, 0);
}
