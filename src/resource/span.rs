//! Stack-allocated span handle guaranteeing release on every exit path (§4.6, §9).

use std::sync::atomic::{AtomicBool, Ordering};

use crate::resource::{ResourceTree, ScopeId};

/// A short-lived child scope whose `done()` runs exactly once, even if called
/// explicitly and then dropped, or dropped without an explicit call.
pub struct Span<'a> {
    tree: &'a ResourceTree,
    id: ScopeId,
    finished: AtomicBool,
}

impl<'a> Span<'a> {
    pub(super) fn new(tree: &'a ResourceTree, id: ScopeId) -> Self {
        Span { tree, id, finished: AtomicBool::new(false) }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Idempotent: only the first call has any effect (Testable Property 8's
    /// idempotence requirement, generalized to spans).
    pub fn done(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tree.done(self.id);
    }
}

impl<'a> Drop for Span<'a> {
    fn drop(&mut self) {
        self.done();
    }
}
