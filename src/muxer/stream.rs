//! A single logical stream inside a [`super::MuxedConn`] (§4.9).

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::{OutFrame, FLAG_CLOSE_INITIATOR, FLAG_CLOSE_RECEIVER, FLAG_MESSAGE_INITIATOR, FLAG_MESSAGE_RECEIVER, FLAG_RESET_INITIATOR, FLAG_RESET_RECEIVER};

/// A bidirectional logical channel multiplexed over one connection.
///
/// Reads and writes are each strictly FIFO (§4.9); `close`/`reset` are
/// idempotent (Testable Property 8) via the `terminated` flag below.
pub struct MuxedStream {
    id: u64,
    is_initiator: bool,
    outbound_tx: mpsc::UnboundedSender<OutFrame>,
    inbound_rx: mpsc::UnboundedReceiver<Bytes>,
    read_buf: Bytes,
    write_closed: AtomicBool,
    terminated: AtomicBool,
}

impl MuxedStream {
    pub(crate) fn new(
        id: u64,
        is_initiator: bool,
        outbound_tx: mpsc::UnboundedSender<OutFrame>,
        inbound_rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        MuxedStream {
            id,
            is_initiator,
            outbound_tx,
            inbound_rx,
            read_buf: Bytes::new(),
            write_closed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn message_flag(&self) -> u8 {
        if self.is_initiator { FLAG_MESSAGE_INITIATOR } else { FLAG_MESSAGE_RECEIVER }
    }

    fn close_flag(&self) -> u8 {
        if self.is_initiator { FLAG_CLOSE_INITIATOR } else { FLAG_CLOSE_RECEIVER }
    }

    fn reset_flag(&self) -> u8 {
        if self.is_initiator { FLAG_RESET_INITIATOR } else { FLAG_RESET_RECEIVER }
    }

    /// Half-close: stop sending, remote still may send us data.
    pub async fn close_write(&self) {
        if self.write_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound_tx.send(OutFrame { stream_id: self.id, flag: self.close_flag(), payload: Bytes::new() });
    }

    /// Full close: half-close then mark the stream terminated locally.
    /// Idempotent (Testable Property 8 / scenario S6).
    pub async fn close(&self) {
        self.close_write().await;
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Abrupt termination; idempotent, safe to call after `close()`.
    pub async fn reset(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound_tx.send(OutFrame { stream_id: self.id, flag: self.reset_flag(), payload: Bytes::new() });
    }

    pub fn is_closed(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl AsyncRead for MuxedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
        if self.read_buf.is_empty() {
            match self.inbound_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buf = chunk,
                Poll::Ready(None) => return Poll::Ready(Ok(0)), // EOF
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = std::cmp::min(buf.len(), self.read_buf.len());
        buf[..n].copy_from_slice(&self.read_buf[..n]);
        self.read_buf = self.read_buf.split_off(n);
        Poll::Ready(Ok(n))
    }
}

impl AsyncWrite for MuxedStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        if self.write_closed.load(Ordering::SeqCst) {
            return Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stream write-closed")));
        }
        let frame = OutFrame { stream_id: self.id, flag: self.message_flag(), payload: Bytes::copy_from_slice(buf) };
        // The channel is unbounded: handing a frame to the writer task never
        // blocks, which keeps this poll function purely synchronous.
        if self.outbound_tx.send(frame).is_err() {
            return Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection writer gone")));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if !self.write_closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbound_tx.send(OutFrame { stream_id: self.id, flag: self.close_flag(), payload: Bytes::new() });
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_close_reset_is_idempotent() {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let stream = MuxedStream::new(0, true, outbound_tx, inbound_rx);

        stream.reset().await;
        stream.close().await;
        stream.reset().await;

        assert!(stream.is_closed());
        // Only the first reset() should have produced a wire frame.
        let frame = outbound_rx.try_recv().unwrap();
        assert_eq!(frame.flag, FLAG_RESET_INITIATOR);
        assert!(outbound_rx.try_recv().is_err());
    }
}
