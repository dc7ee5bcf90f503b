//! S2: dialing for a protocol the remote never registered fails negotiation
//! cleanly on both sides, with no dangling resource reservations.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use junction::discovery::AddrInfo;
use junction::transport::memory::MemoryNetwork;
use junction::Error;

#[tokio::test]
async fn negotiation_miss_resets_cleanly() {
    let net = MemoryNetwork::new();
    let server = common::spawn_host(&net).await;
    let client = common::spawn_host(&net).await;

    let invoked = Arc::new(AtomicBool::new(false));
    let invoked_clone = invoked.clone();
    server.host.set_stream_handler(
        "/foo/1.0.0",
        Arc::new(move |_stream, _peer| {
            let invoked = invoked_clone.clone();
            Box::pin(async move {
                invoked.store(true, Ordering::SeqCst);
            })
        }),
    );

    let addr_info = AddrInfo { peer: server.host.id().clone(), addrs: vec![server.addr.clone()] };
    client.host.connect(&addr_info).await.unwrap();

    let result = client.host.new_stream(server.host.id(), &["/bar/1.0.0".to_string()]).await;
    assert!(matches!(result, Err(Error::NoMutualProtocol)));

    // give the server's negotiation/cleanup task a beat to run
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!invoked.load(Ordering::SeqCst));

    let transient = server.host.network().resources().transient();
    let stat = server.host.network().resources().stat(transient);
    assert_eq!(stat.inbound_streams, 0);
    assert_eq!(stat.outbound_streams, 0);
}
