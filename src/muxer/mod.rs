//! Stream muxer abstraction (§4.9): many logical streams over one
//! [`AuthenticatedConn`](crate::security::AuthenticatedConn).
//!
//! The concrete muxer here follows the mplex wire framing (varint
//! `stream_id << 3 | flag` then varint length then payload) since it is the
//! simplest real libp2p muxer and needs no extra flow-control state machine.
//! A dedicated reader task demuxes inbound frames onto per-stream channels; a
//! dedicated writer task serializes outbound frames onto the socket, so no
//! stream ever has to contend for a write lock.

mod stream;

pub use stream::MuxedStream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::Error;

const LOG_TARGET: &str = "junction::muxer";

const FLAG_NEW_STREAM: u8 = 0;
const FLAG_MESSAGE_RECEIVER: u8 = 1;
const FLAG_MESSAGE_INITIATOR: u8 = 2;
const FLAG_CLOSE_RECEIVER: u8 = 3;
const FLAG_CLOSE_INITIATOR: u8 = 4;
const FLAG_RESET_RECEIVER: u8 = 5;
const FLAG_RESET_INITIATOR: u8 = 6;

pub(crate) struct OutFrame {
    pub stream_id: u64,
    pub flag: u8,
    pub payload: Bytes,
}

struct StreamEntry {
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    is_initiator: bool,
}

struct Shared {
    streams: Mutex<HashMap<u64, StreamEntry>>,
}

/// A multiplexed connection (§4.9): `open_stream`/`accept_stream`/`close`.
pub struct MuxedConn {
    outbound_tx: mpsc::UnboundedSender<OutFrame>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MuxedStream>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
    closed_tx: tokio::sync::watch::Sender<bool>,
    closed_rx: tokio::sync::watch::Receiver<bool>,
}

impl MuxedConn {
    /// `is_server` selects the stream-id parity so both ends never collide
    /// when opening streams concurrently.
    pub fn new<IO>(io: IO, is_server: bool) -> Self
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = io.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<OutFrame>();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel::<MuxedStream>();
        let shared = Arc::new(Shared { streams: Mutex::new(HashMap::new()) });

        let writer_task = tokio::spawn(run_writer(write_half, outbound_rx));
        let (closed_tx, closed_rx) = tokio::sync::watch::channel(false);
        let reader_task = tokio::spawn(run_reader(read_half, shared.clone(), outbound_tx.clone(), accept_tx, closed_tx.clone()));

        let next_id = AtomicU64::new(if is_server { 1 } else { 0 });

        MuxedConn {
            outbound_tx,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            shared,
            next_id,
            reader_task,
            writer_task,
            closed_tx,
            closed_rx,
        }
    }

    /// Resolves once the underlying connection has died (reader task hit EOF
    /// or a read error). Callers use this to detect dead connections without
    /// polling a stream themselves.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Open a new outbound stream; the id space is interleaved so we never
    /// collide with the remote's own `open_stream` calls (§4.9 ordering note).
    pub fn open_stream(&self) -> MuxedStream {
        let id = self.next_id.fetch_add(2, Ordering::SeqCst);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.shared.streams.lock().insert(id, StreamEntry { inbound_tx, is_initiator: true });
        let _ = self.outbound_tx.send(OutFrame { stream_id: id, flag: FLAG_NEW_STREAM, payload: Bytes::new() });
        MuxedStream::new(id, true, self.outbound_tx.clone(), inbound_rx)
    }

    /// Await the next remote-initiated stream.
    pub async fn accept_stream(&self) -> Result<MuxedStream, Error> {
        let mut rx = self.accept_rx.lock().await;
        rx.recv().await.ok_or(Error::ConnectionClosed)
    }

    /// Tear down the connection: abort both background tasks and reset every
    /// live stream (§4.9: "on underlying conn failure all streams transition
    /// to reset").
    pub fn close(&self) {
        self.reader_task.abort();
        self.writer_task.abort();
        let mut streams = self.shared.streams.lock();
        for (_, entry) in streams.drain() {
            drop(entry.inbound_tx);
        }
        let _ = self.closed_tx.send(true);
    }
}

impl Drop for MuxedConn {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_writer<W>(mut write_half: W, mut outbound_rx: mpsc::UnboundedReceiver<OutFrame>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound_rx.recv().await {
        let header = (frame.stream_id << 3) | frame.flag as u64;
        let mut out = Vec::with_capacity(frame.payload.len() + 16);
        push_varint(&mut out, header);
        push_varint(&mut out, frame.payload.len() as u64);
        out.extend_from_slice(&frame.payload);
        if write_half.write_all(&out).await.is_err() || write_half.flush().await.is_err() {
            warn!(target: LOG_TARGET, "muxer write side failed, stopping writer task");
            break;
        }
    }
}

async fn run_reader<R>(
    mut read_half: R,
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<OutFrame>,
    accept_tx: mpsc::UnboundedSender<MuxedStream>,
    closed_tx: tokio::sync::watch::Sender<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let header = match read_varint(&mut read_half).await {
            Ok(h) => h,
            Err(_) => break,
        };
        let stream_id = header >> 3;
        let flag = (header & 0x7) as u8;
        let len = match read_varint(&mut read_half).await {
            Ok(l) => l as usize,
            Err(_) => break,
        };
        let mut payload = vec![0u8; len];
        if read_half.read_exact(&mut payload).await.is_err() {
            break;
        }
        let payload = Bytes::from(payload);

        match flag {
            FLAG_NEW_STREAM => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                shared.streams.lock().insert(stream_id, StreamEntry { inbound_tx, is_initiator: false });
                let stream = MuxedStream::new(stream_id, false, outbound_tx.clone(), inbound_rx);
                if accept_tx.send(stream).is_err() {
                    break;
                }
            }
            FLAG_MESSAGE_RECEIVER | FLAG_MESSAGE_INITIATOR => {
                let streams = shared.streams.lock();
                if let Some(entry) = streams.get(&stream_id) {
                    let _ = entry.inbound_tx.send(payload);
                } else {
                    trace!(target: LOG_TARGET, stream_id, "message for unknown/closed stream dropped");
                }
            }
            FLAG_CLOSE_RECEIVER | FLAG_CLOSE_INITIATOR => {
                // Dropping the inbound sender signals EOF to the stream's reader
                // without touching its outbound half (half-close, §4.9).
                shared.streams.lock().remove(&stream_id);
            }
            FLAG_RESET_RECEIVER | FLAG_RESET_INITIATOR => {
                shared.streams.lock().remove(&stream_id);
            }
            _ => {
                warn!(target: LOG_TARGET, flag, "unknown mplex frame flag");
                break;
            }
        }
    }

    // Reader loop ended: the underlying connection died. Reset every stream
    // still registered so callers observe failure rather than hanging reads.
    {
        let mut streams = shared.streams.lock();
        for (_, entry) in streams.drain() {
            drop(entry.inbound_tx);
        }
    }
    let _ = closed_tx.send(true);
}

fn push_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            break;
        }
    }
}

async fn read_varint<R: AsyncRead + Unpin>(io: &mut R) -> Result<u64, Error> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        io.read_exact(&mut byte).await?;
        result |= ((byte[0] & 0x7f) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::InvalidFormat("varint too long".into()));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::{Listener, Transport};
    use futures::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn open_and_accept_roundtrip() {
        let net = MemoryNetwork::new();
        let addr = crate::multiaddr::Multiaddr::parse("/ip4/127.0.0.1/tcp/20").unwrap();
        let server_transport = net.transport();
        let mut listener = server_transport.listen(&addr).await.unwrap();

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client_task = tokio::spawn(async move {
            let conn = client_transport.dial(&addr2, None).await.unwrap();
            let muxer = MuxedConn::new(conn, false);
            let mut stream = muxer.open_stream();
            stream.write_all(b"hello libp2p!").await.unwrap();
            stream.close().await;
            muxer
        });

        let server_conn = listener.accept().await.unwrap();
        let server_muxer = MuxedConn::new(server_conn, true);
        let mut server_stream = server_muxer.accept_stream().await.unwrap();
        let mut buf = Vec::new();
        server_stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello libp2p!");

        let _client_muxer = client_task.await.unwrap();
    }

    #[tokio::test]
    async fn conn_failure_resets_live_streams() {
        let net = MemoryNetwork::new();
        let addr = crate::multiaddr::Multiaddr::parse("/ip4/127.0.0.1/tcp/21").unwrap();
        let server_transport = net.transport();
        let mut listener = server_transport.listen(&addr).await.unwrap();

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client_task = tokio::spawn(async move {
            let conn = client_transport.dial(&addr2, None).await.unwrap();
            let muxer = MuxedConn::new(conn, false);
            let mut stream = muxer.open_stream();
            stream.write_all(b"x").await.unwrap();
            muxer // keep alive until we explicitly drop it
        });

        let server_conn = listener.accept().await.unwrap();
        let server_muxer = MuxedConn::new(server_conn, true);
        let mut server_stream = server_muxer.accept_stream().await.unwrap();
        let mut one_byte = [0u8; 1];
        server_stream.read_exact(&mut one_byte).await.unwrap();

        let client_muxer = client_task.await.unwrap();
        drop(client_muxer); // drives the server's reader task to EOF

        let mut buf = Vec::new();
        let _ = server_stream.read_to_end(&mut buf).await;
        assert!(buf.is_empty());
    }
}
