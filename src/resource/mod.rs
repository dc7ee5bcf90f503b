//! Resource scope tree (§4.6, §9 Design Notes).
//!
//! Scopes form a DAG rooted at `system`, expressed as arena-indexed nodes with
//! ancestor pointers rather than an `Rc`/`Arc` ownership cycle, per the
//! Design Notes' explicit guidance. Locking is ancestor-first to avoid
//! inversion (§5).

mod arena;
mod scope;
mod span;

pub use scope::{Limits, ResourceScope, ScopeId, ScopeKind, Stat};
pub use span::Span;

use parking_lot::RwLock;

use crate::error::Error;
use arena::Arena;

/// Owns the whole scope DAG for a [`crate::host::Host`].
pub struct ResourceTree {
    arena: RwLock<Arena>,
    system: ScopeId,
    transient: ScopeId,
}

impl ResourceTree {
    pub fn new(system_limits: Limits) -> Self {
        let mut arena = Arena::new();
        let system = arena.insert(ScopeKind::System, None, system_limits);
        let transient = arena.insert(ScopeKind::Transient, Some(system), Limits::unbounded());
        ResourceTree { arena: RwLock::new(arena), system, transient }
    }

    pub fn system(&self) -> ScopeId {
        self.system
    }

    pub fn transient(&self) -> ScopeId {
        self.transient
    }

    /// Singleton scope for a named peer, created on first reference, parented
    /// on `system` per §4.6.
    pub fn peer_scope(&self, peer: &crate::PeerId, limits: Limits) -> ScopeId {
        let mut arena = self.arena.write();
        arena.singleton(ScopeKind::Peer(peer.clone()), self.system, limits)
    }

    pub fn protocol_scope(&self, protocol: &str, limits: Limits) -> ScopeId {
        let mut arena = self.arena.write();
        arena.singleton(ScopeKind::Protocol(protocol.to_string()), self.system, limits)
    }

    /// A connection scope is a child of `transient` and, once the peer is
    /// known, also counted against the peer scope (§4.6); we model the
    /// "and of" relationship by reserving against both parents explicitly
    /// rather than giving a scope two DAG parents.
    pub fn new_connection_scope(&self, peer: Option<&crate::PeerId>, limits: Limits) -> ConnectionScope {
        let mut arena = self.arena.write();
        let conn = arena.insert(ScopeKind::Connection, Some(self.transient), limits);
        let peer_scope = peer.map(|p| arena.singleton(ScopeKind::Peer(p.clone()), self.system, Limits::unbounded()));
        ConnectionScope { id: conn, peer_scope }
    }

    pub fn new_stream_scope(&self, conn: &ConnectionScope, limits: Limits) -> ScopeId {
        let mut arena = self.arena.write();
        let parent = conn.peer_scope.unwrap_or(self.transient);
        arena.insert(ScopeKind::Stream, Some(parent), limits)
    }

    pub fn reserve_memory(&self, scope: ScopeId, bytes: usize, priority: u8) -> Result<(), Error> {
        let mut arena = self.arena.write();
        arena.reserve_memory(scope, bytes, priority)
    }

    pub fn release_memory(&self, scope: ScopeId, bytes: usize) {
        let mut arena = self.arena.write();
        arena.release_memory(scope, bytes);
    }

    pub fn add_stream(&self, scope: ScopeId, inbound: bool) -> Result<(), Error> {
        let mut arena = self.arena.write();
        arena.add_stream(scope, inbound)
    }

    pub fn remove_stream(&self, scope: ScopeId, inbound: bool) {
        let mut arena = self.arena.write();
        arena.remove_stream(scope, inbound);
    }

    pub fn add_conn(&self, scope: ScopeId, inbound: bool, uses_fd: bool) -> Result<(), Error> {
        let mut arena = self.arena.write();
        arena.add_conn(scope, inbound, uses_fd)
    }

    pub fn remove_conn(&self, scope: ScopeId, inbound: bool, used_fd: bool) {
        let mut arena = self.arena.write();
        arena.remove_conn(scope, inbound, used_fd);
    }

    pub fn stat(&self, scope: ScopeId) -> Stat {
        self.arena.read().stat(scope)
    }

    pub fn done(&self, scope: ScopeId) {
        let mut arena = self.arena.write();
        arena.done(scope);
    }

    pub fn is_unused(&self, scope: ScopeId) -> bool {
        self.arena.read().is_unused(scope)
    }

    /// Sweep sticky-free peer/protocol singleton scopes with no refs and zero
    /// counters (§4.6 GC note); returns the number removed.
    pub fn gc(&self) -> usize {
        let mut arena = self.arena.write();
        arena.gc(self.system)
    }

    pub fn span(&self, parent: ScopeId, limits: Limits) -> Span {
        let id = {
            let mut arena = self.arena.write();
            arena.insert(ScopeKind::Span, Some(parent), limits)
        };
        Span::new(self, id)
    }
}

/// A connection's scope plus, if the remote peer is known, the peer scope it
/// is additionally counted against (§4.6).
pub struct ConnectionScope {
    pub id: ScopeId,
    pub peer_scope: Option<ScopeId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_rolls_back_on_ancestor_rejection() {
        let tree = ResourceTree::new(Limits::memory(1024 * 1024));
        tree.reserve_memory(tree.transient(), 800 * 1024, 0).unwrap();

        let span = tree.span(tree.transient(), Limits::unbounded());
        let child = span.id();
        let err = tree.reserve_memory(child, 300 * 1024, 0);
        assert!(err.is_err());

        assert_eq!(tree.stat(tree.transient()).memory, 800 * 1024);
        assert_eq!(tree.stat(child).memory, 0);
    }

    #[test]
    fn release_never_fails_and_clamps() {
        let tree = ResourceTree::new(Limits::unbounded());
        tree.release_memory(tree.system(), 100); // underflow clamps, does not panic
        assert_eq!(tree.stat(tree.system()).memory, 0);
    }

    #[test]
    fn span_done_is_idempotent() {
        let tree = ResourceTree::new(Limits::unbounded());
        let span = tree.span(tree.system(), Limits::unbounded());
        span.done();
        span.done();
    }

    #[test]
    fn scope_closed_after_done() {
        let tree = ResourceTree::new(Limits::unbounded());
        let span = tree.span(tree.system(), Limits::unbounded());
        let id = span.id();
        span.done();
        assert!(matches!(tree.reserve_memory(id, 1, 0), Err(Error::ScopeClosed)));
    }
}
