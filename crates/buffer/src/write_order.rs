//! Write-order dependency graph: if page B's recovery depends on page A
//! being durable first (e.g. a foster-child split that B's parent pointer
//! assumes), the buffer pool must not flush B before A. Registering a cycle
//! is a logic error in the caller (the B+tree operator never creates one
//! by construction) and surfaces as `StorageError::WriteOrderLoop`.
//!
//! Grounded on spec §4.C's write-order dependency requirement; no direct
//! teacher counterpart, so the graph itself is a small adjacency-list
//! reachability check rather than a port of existing code.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use mini_aurora_common::{PageId, StorageError};

#[derive(Default)]
pub struct WriteOrderGraph {
    /// edges[a] = set of pages that must be durable before `a` is flushed.
    edges: Mutex<HashMap<PageId, HashSet<PageId>>>,
}

impl WriteOrderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register that `dependent` must not be flushed before `depends_on`.
    /// Rejects the edge if it would close a cycle.
    pub fn register(&self, dependent: PageId, depends_on: PageId) -> Result<(), StorageError> {
        if dependent == depends_on {
            return Err(StorageError::WriteOrderLoop(dependent));
        }
        let mut edges = self.edges.lock();
        if Self::reaches(&edges, depends_on, dependent) {
            return Err(StorageError::WriteOrderLoop(dependent));
        }
        edges.entry(dependent).or_default().insert(depends_on);
        Ok(())
    }

    fn reaches(edges: &HashMap<PageId, HashSet<PageId>>, from: PageId, to: PageId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = edges.get(&node) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Remove all edges pointing at `page` (called once `page` is durable).
    pub fn resolve(&self, page: PageId) {
        let mut edges = self.edges.lock();
        for deps in edges.values_mut() {
            deps.remove(&page);
        }
        edges.remove(&page);
    }

    /// Pages that must be durable before `page` may be flushed.
    pub fn predecessors(&self, page: PageId) -> Vec<PageId> {
        self.edges
            .lock()
            .get(&page)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }
}
