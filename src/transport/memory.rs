//! An in-process transport backed by `tokio::io::duplex`, used by tests and
//! by embedders that want to exercise the upgrade pipeline without a socket.
//! Not a substitute for a real transport: it only ever "dials" a peer that is
//! concurrently "listening" in the same process (§4.7 scope boundary).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::Error;
use crate::multiaddr::Multiaddr;
use crate::transport::{Listener, RawConn, Transport};
use crate::PeerId;

pub struct MemoryConn {
    io: Compat<tokio::io::DuplexStream>,
    local: Multiaddr,
    remote: Multiaddr,
}

impl AsyncRead for MemoryConn {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut [u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryConn {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.io).poll_write(cx, buf)
    }
    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.io).poll_flush(cx)
    }
    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.io).poll_close(cx)
    }
}

impl RawConn for MemoryConn {
    fn local_addr(&self) -> &Multiaddr {
        &self.local
    }
    fn remote_addr(&self) -> &Multiaddr {
        &self.remote
    }
}

struct Registry {
    /// Pending listeners keyed by their bound address, each fed by a channel
    /// of freshly-dialed-in duplex halves.
    listeners: HashMap<Multiaddr, mpsc::UnboundedSender<MemoryConn>>,
}

/// A shared "network" that multiple [`MemoryTransport`] handles can dial
/// into, analogous to a loopback segment.
#[derive(Clone)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork { registry: Arc::new(Mutex::new(Registry { listeners: HashMap::new() })) }
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { network: self.clone() }
    }
}

pub struct MemoryListener {
    addr: Multiaddr,
    rx: mpsc::UnboundedReceiver<MemoryConn>,
    network: MemoryNetwork,
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.registry.lock().listeners.remove(&self.addr);
    }
}

#[async_trait]
impl Listener for MemoryListener {
    type Conn = MemoryConn;

    async fn accept(&mut self) -> Result<MemoryConn, Error> {
        self.rx.recv().await.ok_or(Error::ConnectionClosed)
    }

    fn listen_addr(&self) -> &Multiaddr {
        &self.addr
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    type Conn = MemoryConn;
    type Listener = MemoryListener;

    async fn dial(&self, addr: &Multiaddr, _peer_id_hint: Option<&PeerId>) -> Result<MemoryConn, Error> {
        let sender = {
            let registry = self.network.registry.lock();
            registry
                .listeners
                .get(addr)
                .cloned()
                .ok_or_else(|| Error::Unreachable(addr.to_string()))?
        };
        let (a, b) = tokio::io::duplex(64 * 1024);
        let dial_side = MemoryConn { io: a.compat(), local: Multiaddr::empty(), remote: addr.clone() };
        let accept_side = MemoryConn { io: b.compat(), local: addr.clone(), remote: Multiaddr::empty() };
        sender.send(accept_side).map_err(|_| Error::Unreachable(addr.to_string()))?;
        Ok(dial_side)
    }

    async fn listen(&self, addr: &Multiaddr) -> Result<MemoryListener, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.network.registry.lock();
        if registry.listeners.contains_key(addr) {
            return Err(Error::TransportError(format!("{addr} already listening")));
        }
        registry.listeners.insert(addr.clone(), tx);
        drop(registry);
        Ok(MemoryListener { addr: addr.clone(), rx, network: self.network.clone() })
    }

    fn can_dial(&self, _addr: &Multiaddr) -> bool {
        // the in-memory transport treats any multiaddr as an opaque registry key
        true
    }

    fn protocols(&self) -> Vec<Vec<u32>> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_requires_listener() {
        let net = MemoryNetwork::new();
        let transport = net.transport();
        let addr = Multiaddr::parse("/ip4/127.0.0.1/tcp/1").unwrap();
        assert!(transport.dial(&addr, None).await.is_err());
    }

    #[tokio::test]
    async fn dial_and_accept_roundtrip() {
        use futures::{AsyncReadExt, AsyncWriteExt};

        let net = MemoryNetwork::new();
        let addr = Multiaddr::parse("/ip4/127.0.0.1/tcp/4001").unwrap();
        let server_transport = net.transport();
        let mut listener = server_transport.listen(&addr).await.unwrap();

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client_task = tokio::spawn(async move {
            let mut conn = client_transport.dial(&addr2, None).await.unwrap();
            conn.write_all(b"ping").await.unwrap();
            conn.close().await.unwrap();
        });

        let mut server_conn = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        server_conn.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"ping");
        client_task.await.unwrap();
    }
}
