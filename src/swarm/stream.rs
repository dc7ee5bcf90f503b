//! Swarm-level stream handle (§4.13): a negotiated protocol id plus a
//! resource scope whose `done()` is guaranteed to run exactly once.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::{AsyncRead, AsyncWrite};

use crate::muxer::MuxedStream;
use crate::resource::ScopeId;
use crate::resource::ResourceTree;

use super::TrackedConnection;

/// A logical stream returned by [`super::Swarm::new_stream`] or delivered to
/// an inbound protocol handler. Wraps the muxer-level stream with the
/// negotiated protocol id and ties its resource scope lifetime to
/// `close`/`reset`, each idempotent, invoking `done()` at most once
/// (Testable Property 8 / scenario S6).
pub struct Stream {
    muxed: MuxedStream,
    protocol_id: String,
    scope: ScopeId,
    resources: Arc<ResourceTree>,
    conn: Weak<TrackedConnection>,
    stream_id: u64,
    inbound: bool,
    cleaned_up: AtomicBool,
}

impl Stream {
    pub(crate) fn new(
        muxed: MuxedStream,
        protocol_id: String,
        scope: ScopeId,
        resources: Arc<ResourceTree>,
        conn: Weak<TrackedConnection>,
        inbound: bool,
    ) -> Self {
        let stream_id = muxed.id();
        Stream { muxed, protocol_id, scope, resources, conn, stream_id, inbound, cleaned_up: AtomicBool::new(false) }
    }

    pub fn protocol_id(&self) -> &str {
        &self.protocol_id
    }

    pub fn id(&self) -> u64 {
        self.stream_id
    }

    pub fn is_closed(&self) -> bool {
        self.muxed.is_closed()
    }

    /// Half-close then full close, then release the resource scope exactly once.
    pub async fn close(&self) {
        self.muxed.close().await;
        self.cleanup();
    }

    /// Abrupt termination; idempotent and safe after `close()`.
    pub async fn reset(&self) {
        self.muxed.reset().await;
        self.cleanup();
    }

    fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.resources.remove_stream(self.scope, self.inbound);
        self.resources.done(self.scope);
        if let Some(conn) = self.conn.upgrade() {
            conn.streams.lock().remove(&self.stream_id);
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl AsyncRead for Stream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.muxed).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.muxed).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.muxed).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.muxed).poll_close(cx)
    }
}
