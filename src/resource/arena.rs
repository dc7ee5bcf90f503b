//! Index-based arena backing the scope DAG (§9 Design Notes).

use std::collections::HashMap;

use tracing::warn;

use crate::error::Error;
use crate::resource::scope::{Limits, ResourceScope, ScopeId, ScopeKind, Stat};

const LOG_TARGET: &str = "junction::resource";

pub(super) struct Arena {
    nodes: Vec<ResourceScope>,
    /// Singleton index for named (peer/protocol) scopes, so repeated lookups
    /// by name return the same node (§4.6).
    singletons: HashMap<ScopeKind, ScopeId>,
}

impl Arena {
    pub fn new() -> Self {
        Arena { nodes: Vec::new(), singletons: HashMap::new() }
    }

    pub fn insert(&mut self, kind: ScopeKind, parent: Option<ScopeId>, limits: Limits) -> ScopeId {
        let id = ScopeId(self.nodes.len());
        self.nodes.push(ResourceScope::new(kind, parent, limits));
        id
    }

    pub fn singleton(&mut self, kind: ScopeKind, parent: ScopeId, limits: Limits) -> ScopeId {
        if let Some(&id) = self.singletons.get(&kind) {
            self.nodes[id.0].refs += 1;
            return id;
        }
        let id = self.insert(kind.clone(), Some(parent), limits);
        self.nodes[id.0].refs += 1;
        self.singletons.insert(kind, id);
        id
    }

    /// Ancestor chain, nearest-first, including `scope` itself.
    fn chain(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut chain = vec![scope];
        let mut cur = self.nodes[scope.0].parent;
        while let Some(p) = cur {
            chain.push(p);
            cur = self.nodes[p.0].parent;
        }
        chain
    }

    fn check_closed(&self, scope: ScopeId) -> Result<(), Error> {
        if self.nodes[scope.0].done {
            return Err(Error::ScopeClosed);
        }
        Ok(())
    }

    pub fn reserve_memory(&mut self, scope: ScopeId, bytes: usize, _priority: u8) -> Result<(), Error> {
        self.check_closed(scope)?;
        let chain = self.chain(scope);
        // Ancestor-first locking order (§5): we walk root-to-leaf when
        // checking limits so a deeply nested scope never holds a lock on
        // itself while waiting on an ancestor.
        for &id in chain.iter().rev() {
            let node = &self.nodes[id.0];
            if node.stat.memory + bytes > node.limits.memory {
                return Err(Error::ResourceLimitExceeded);
            }
        }
        for &id in &chain {
            self.nodes[id.0].stat.memory += bytes;
        }
        Ok(())
    }

    pub fn release_memory(&mut self, scope: ScopeId, bytes: usize) {
        for &id in &self.chain(scope) {
            let node = &mut self.nodes[id.0];
            node.stat.memory = node.stat.memory.saturating_sub(bytes);
        }
    }

    pub fn add_stream(&mut self, scope: ScopeId, inbound: bool) -> Result<(), Error> {
        self.check_closed(scope)?;
        let chain = self.chain(scope);
        for &id in chain.iter().rev() {
            let node = &self.nodes[id.0];
            let (count, limit) = if inbound {
                (node.stat.inbound_streams, node.limits.inbound_streams)
            } else {
                (node.stat.outbound_streams, node.limits.outbound_streams)
            };
            if count + 1 > limit {
                return Err(Error::ResourceLimitExceeded);
            }
        }
        for &id in &chain {
            let node = &mut self.nodes[id.0];
            if inbound {
                node.stat.inbound_streams += 1;
            } else {
                node.stat.outbound_streams += 1;
            }
        }
        Ok(())
    }

    pub fn remove_stream(&mut self, scope: ScopeId, inbound: bool) {
        for &id in &self.chain(scope) {
            let node = &mut self.nodes[id.0];
            if inbound {
                node.stat.inbound_streams = checked_dec(node.stat.inbound_streams, "inbound_streams");
            } else {
                node.stat.outbound_streams = checked_dec(node.stat.outbound_streams, "outbound_streams");
            }
        }
    }

    pub fn add_conn(&mut self, scope: ScopeId, inbound: bool, uses_fd: bool) -> Result<(), Error> {
        self.check_closed(scope)?;
        let chain = self.chain(scope);
        for &id in chain.iter().rev() {
            let node = &self.nodes[id.0];
            let (count, limit) = if inbound {
                (node.stat.inbound_conns, node.limits.inbound_conns)
            } else {
                (node.stat.outbound_conns, node.limits.outbound_conns)
            };
            if count + 1 > limit || (uses_fd && node.stat.fds + 1 > node.limits.fds) {
                return Err(Error::ResourceLimitExceeded);
            }
        }
        for &id in &chain {
            let node = &mut self.nodes[id.0];
            if inbound {
                node.stat.inbound_conns += 1;
            } else {
                node.stat.outbound_conns += 1;
            }
            if uses_fd {
                node.stat.fds += 1;
            }
        }
        Ok(())
    }

    pub fn remove_conn(&mut self, scope: ScopeId, inbound: bool, used_fd: bool) {
        for &id in &self.chain(scope) {
            let node = &mut self.nodes[id.0];
            if inbound {
                node.stat.inbound_conns = checked_dec(node.stat.inbound_conns, "inbound_conns");
            } else {
                node.stat.outbound_conns = checked_dec(node.stat.outbound_conns, "outbound_conns");
            }
            if used_fd {
                node.stat.fds = checked_dec(node.stat.fds, "fds");
            }
        }
    }

    pub fn stat(&self, scope: ScopeId) -> Stat {
        self.nodes[scope.0].stat
    }

    pub fn done(&mut self, scope: ScopeId) {
        self.nodes[scope.0].done = true;
    }

    pub fn is_unused(&self, scope: ScopeId) -> bool {
        let node = &self.nodes[scope.0];
        node.refs == 0
            && node.stat == Stat::default()
    }

    pub fn gc(&mut self, system: ScopeId) -> usize {
        let mut removed = 0;
        let targets: Vec<ScopeId> = self
            .singletons
            .iter()
            .filter(|(_, &id)| id != system && self.is_unused(id))
            .map(|(_, &id)| id)
            .collect();
        for id in targets {
            self.nodes[id.0].done = true;
            self.singletons.retain(|_, v| *v != id);
            removed += 1;
        }
        removed
    }
}

fn checked_dec(v: usize, what: &str) -> usize {
    if v == 0 {
        warn!(target: LOG_TARGET, what, "resource counter underflow clamped to zero");
        0
    } else {
        v - 1
    }
}
