//! Host façade (§6): `id, peerstore, addrs, network, mux, event_bus,
//! conn_manager, start, close, connect, new_stream, set_stream_handler*`.
//!
//! Owns one [`Swarm`] plus the protocol router that the swarm itself has no
//! notion of — inbound streams are dispatched here, not in the swarm, per
//! §9's "protocol router" design note (exact match wins, otherwise first
//! matching predicate in registration order).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use tracing::{debug, warn};

use crate::connmgr::ConnectionManager;
use crate::discovery::AddrInfo;
use crate::error::Error;
use crate::event_bus::EventBus;
use crate::multiaddr::Multiaddr;
use crate::multistream::{self, Router};
use crate::peerstore::{Peerstore, TTL_CONNECTED};
use crate::resource::{Limits, ResourceTree};
use crate::swarm::{Stream, Swarm, SwarmEvent, TrackedConnection};
use crate::transport::{Listener, Transport};
use crate::PeerId;

const LOG_TARGET: &str = "junction::host";

/// Invoked once a stream's protocol has been negotiated inbound; runs to
/// completion on its own spawned task.
pub type StreamHandler = Arc<dyn Fn(Stream, PeerId) -> BoxFuture<'static, ()> + Send + Sync>;

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    exact: HashMap<String, StreamHandler>,
    predicates: Vec<(String, Predicate, StreamHandler)>,
}

impl HandlerRegistry {
    fn set_exact(&mut self, protocol_id: &str, handler: StreamHandler) {
        self.exact.insert(protocol_id.to_string(), handler);
    }

    fn set_match(&mut self, name: &str, predicate: Predicate, handler: StreamHandler) {
        self.predicates.retain(|(n, _, _)| n != name);
        self.predicates.push((name.to_string(), predicate, handler));
    }

    fn remove(&mut self, protocol_id: &str) {
        self.exact.remove(protocol_id);
        self.predicates.retain(|(name, _, _)| name != protocol_id);
    }

    /// Mirrors the registry into a [`Router`] for multistream-select to
    /// negotiate against; exact entries first, predicates in registration
    /// order, matching `Router`'s own precedence rule.
    fn to_router(&self) -> Router {
        let mut router = Router::new();
        for protocol_id in self.exact.keys() {
            router.add_handler(protocol_id);
        }
        for (name, predicate, _) in &self.predicates {
            let predicate = predicate.clone();
            router.add_handler_match(name, move |candidate| predicate(candidate));
        }
        router
    }

    fn lookup(&self, negotiated: &str) -> Option<StreamHandler> {
        if let Some(handler) = self.exact.get(negotiated) {
            return Some(handler.clone());
        }
        self.predicates.iter().find(|(_, predicate, _)| predicate(negotiated)).map(|(_, _, h)| h.clone())
    }
}

/// A running [`Host`] facade over one [`Swarm`] (§6). Cloning is cheap; every
/// clone shares the same swarm, handler registry and background tasks.
pub struct Host<T: Transport> {
    swarm: Arc<Swarm<T>>,
    handlers: Arc<SyncMutex<HandlerRegistry>>,
    listen_addrs: Arc<SyncMutex<Vec<Multiaddr>>>,
    tasks: Arc<SyncMutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl<T: Transport + 'static> Host<T> {
    pub fn new(swarm: Arc<Swarm<T>>) -> Self {
        Host {
            swarm,
            handlers: Arc::new(SyncMutex::new(HandlerRegistry::default())),
            listen_addrs: Arc::new(SyncMutex::new(Vec::new())),
            tasks: Arc::new(SyncMutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &PeerId {
        self.swarm.local_peer_id()
    }

    pub fn peerstore(&self) -> &Arc<Peerstore> {
        self.swarm.peerstore()
    }

    pub fn addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.lock().clone()
    }

    pub fn network(&self) -> &Arc<Swarm<T>> {
        &self.swarm
    }

    pub fn event_bus(&self) -> &EventBus {
        self.swarm.events()
    }

    pub fn conn_manager(&self) -> &Arc<ConnectionManager> {
        self.swarm.conn_manager()
    }

    /// Protocol ids currently registered, exact then predicate-named, for
    /// reporting to collaborators like identify (§6's identify response
    /// `protocols` field).
    pub fn protocols(&self) -> Vec<String> {
        let handlers = self.handlers.lock();
        let mut protos: Vec<String> = handlers.exact.keys().cloned().collect();
        protos.extend(handlers.predicates.iter().map(|(name, _, _)| name.clone()));
        protos
    }

    /// Start accepting connections on `listener` and dispatching inbound
    /// streams to registered handlers. May be called more than once to
    /// listen on several addresses; each call adds its own background tasks.
    pub fn start<L>(&self, listener: L)
    where
        L: Listener + Send + 'static,
    {
        self.listen_addrs.lock().push(listener.listen_addr().clone());

        let swarm = self.swarm.clone();
        let listen_task = tokio::spawn(async move {
            swarm.run_listener(listener).await;
        });
        self.tasks.lock().push(listen_task);

        let swarm = self.swarm.clone();
        let handlers = self.handlers.clone();
        let mut events = self.swarm.subscribe();
        let dispatch_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SwarmEvent::Connected(peer) = event {
                    if let Some(tracked) = swarm.connection(&peer) {
                        spawn_protocol_dispatch(swarm.resources().clone(), handlers.clone(), peer, tracked);
                    }
                }
            }
        });
        self.tasks.lock().push(dispatch_task);
    }

    /// Abort every background task started by `start`. Existing connections
    /// and open streams are left alone; only accept/dispatch loops stop.
    pub fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Dial `addr_info.peer`, remembering its addresses in the peerstore
    /// first so a later `dial` elsewhere in the process can reuse them.
    pub async fn connect(&self, addr_info: &AddrInfo) -> Result<Arc<TrackedConnection>, Error> {
        self.swarm.peerstore().add_addrs(&addr_info.peer, &addr_info.addrs, TTL_CONNECTED);
        self.swarm.clone().dial(&addr_info.peer, &addr_info.addrs).await
    }

    pub async fn new_stream(&self, peer: &PeerId, protocols: &[String]) -> Result<Stream, Error> {
        self.swarm.clone().new_stream(peer, protocols).await
    }

    pub fn set_stream_handler(&self, protocol_id: &str, handler: StreamHandler) {
        self.handlers.lock().set_exact(protocol_id, handler);
    }

    pub fn set_stream_handler_match<F>(&self, name: &str, predicate: F, handler: StreamHandler)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.handlers.lock().set_match(name, Arc::new(predicate), handler);
    }

    pub fn remove_stream_handler(&self, protocol_id: &str) {
        self.handlers.lock().remove(protocol_id);
    }
}

impl<T: Transport> Clone for Host<T> {
    fn clone(&self) -> Self {
        Host {
            swarm: self.swarm.clone(),
            handlers: self.handlers.clone(),
            listen_addrs: self.listen_addrs.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

/// Loops `accept_stream` on one connection for its whole lifetime, handing
/// each accepted stream to its own negotiation-then-dispatch task so one slow
/// handler never blocks accepting the next stream (§5).
fn spawn_protocol_dispatch(
    resources: Arc<ResourceTree>,
    handlers: Arc<SyncMutex<HandlerRegistry>>,
    peer: PeerId,
    tracked: Arc<TrackedConnection>,
) {
    tokio::spawn(async move {
        loop {
            let muxed = match tracked.conn.muxer.accept_stream().await {
                Ok(s) => s,
                Err(_) => break,
            };

            let scope = resources.new_stream_scope(&tracked.conn.scope, Limits::unbounded());
            if let Err(e) = resources.add_stream(scope, true) {
                debug!(target: LOG_TARGET, peer = %peer, error = %e, "dropping inbound stream, resource limit hit");
                resources.done(scope);
                muxed.reset().await;
                continue;
            }

            let router = handlers.lock().to_router();
            let peer = peer.clone();
            let handlers = handlers.clone();
            let resources = resources.clone();
            let tracked = tracked.clone();
            tokio::spawn(async move {
                negotiate_and_dispatch(muxed, scope, router, handlers, resources, peer, tracked).await;
            });
        }
    });
}

#[allow(clippy::too_many_arguments)]
async fn negotiate_and_dispatch(
    mut muxed: crate::muxer::MuxedStream,
    scope: crate::resource::ScopeId,
    router: Router,
    handlers: Arc<SyncMutex<HandlerRegistry>>,
    resources: Arc<ResourceTree>,
    peer: PeerId,
    tracked: Arc<TrackedConnection>,
) {
    let negotiated = match multistream::negotiate_inbound(&mut muxed, &router).await {
        Ok(id) => id,
        Err(e) => {
            debug!(target: LOG_TARGET, peer = %peer, error = %e, "inbound protocol negotiation failed");
            muxed.reset().await;
            resources.remove_stream(scope, true);
            resources.done(scope);
            return;
        }
    };

    let handler = handlers.lock().lookup(&negotiated);
    let Some(handler) = handler else {
        warn!(target: LOG_TARGET, peer = %peer, protocol = %negotiated, "negotiated protocol has no handler");
        muxed.reset().await;
        resources.remove_stream(scope, true);
        resources.done(scope);
        return;
    };

    tracked.streams.lock().insert(muxed.id());
    let stream = Stream::new(muxed, negotiated, scope, resources, Arc::downgrade(&tracked), true);
    handler(stream, peer).await;
}
