//! A single node in the resource-scope DAG.

use crate::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(super) usize);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    System,
    Transient,
    Service(String),
    Protocol(String),
    Peer(PeerId),
    Connection,
    Stream,
    Span,
}

/// Per-kind limits a scope enforces against its own counters (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub memory: usize,
    pub inbound_streams: usize,
    pub outbound_streams: usize,
    pub inbound_conns: usize,
    pub outbound_conns: usize,
    pub fds: usize,
}

impl Limits {
    pub fn unbounded() -> Self {
        Limits {
            memory: usize::MAX,
            inbound_streams: usize::MAX,
            outbound_streams: usize::MAX,
            inbound_conns: usize::MAX,
            outbound_conns: usize::MAX,
            fds: usize::MAX,
        }
    }

    pub fn memory(bytes: usize) -> Self {
        Limits { memory: bytes, ..Limits::unbounded() }
    }
}

/// Point-in-time snapshot of a scope's counters (§3, §B).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub memory: usize,
    pub inbound_streams: usize,
    pub outbound_streams: usize,
    pub inbound_conns: usize,
    pub outbound_conns: usize,
    pub fds: usize,
}

/// Internal mutable node state; the public view is [`Stat`].
pub(super) struct ResourceScope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub limits: Limits,
    pub stat: Stat,
    pub refs: usize,
    pub done: bool,
}

impl ResourceScope {
    pub fn new(kind: ScopeKind, parent: Option<ScopeId>, limits: Limits) -> Self {
        ResourceScope { kind, parent, limits, stat: Stat::default(), refs: 0, done: false }
    }
}
