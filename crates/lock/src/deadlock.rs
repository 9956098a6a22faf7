//! Waits-for graph cycle detection and victim selection.
//!
//! Grounded on spec §4.D: a background detector periodically assembles the
//! waits-for graph from `LockTable::waits_for_edges` for every blocked
//! transaction, finds cycles, and picks the youngest transaction on each
//! cycle as the victim (lowest cost to abort, since it has done the least
//! work). "Youngest" is approximated by `TxnId` ordering: transaction ids
//! are assigned from a monotonically increasing sequence, so a larger id
//! is always younger.

use std::collections::{HashMap, HashSet};

use mini_aurora_common::TxnId;

/// A snapshot of the waits-for graph: `txn -> {txns it is blocked behind}`.
pub type WaitsForGraph = HashMap<TxnId, HashSet<TxnId>>;

/// Find all transactions that sit on at least one cycle.
pub fn find_cycle_members(graph: &WaitsForGraph) -> HashSet<TxnId> {
    let mut on_cycle = HashSet::new();
    for &start in graph.keys() {
        if on_cycle.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        let mut visiting = HashSet::new();
        let mut node = start;
        loop {
            if visiting.contains(&node) {
                if let Some(pos) = path.iter().position(|&n| n == node) {
                    on_cycle.extend(path[pos..].iter().copied());
                }
                break;
            }
            visiting.insert(node);
            path.push(node);
            match graph.get(&node).and_then(|next| next.iter().next()) {
                Some(&next) => node = next,
                None => break,
            }
        }
    }
    on_cycle
}

/// Pick the youngest transaction among `candidates` (the largest id).
pub fn youngest_victim(candidates: &HashSet<TxnId>) -> Option<TxnId> {
    candidates.iter().copied().max()
}

/// Run detection once: returns `Some(victim)` if a cycle exists.
pub fn detect(graph: &WaitsForGraph) -> Option<TxnId> {
    let members = find_cycle_members(graph);
    youngest_victim(&members)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(TxnId, TxnId)]) -> WaitsForGraph {
        let mut g = WaitsForGraph::new();
        for &(a, b) in pairs {
            g.entry(a).or_default().insert(b);
        }
        g
    }

    #[test]
    fn no_cycle_detects_nothing() {
        let g = edges(&[(1, 2), (2, 3)]);
        assert_eq!(detect(&g), None);
    }

    #[test]
    fn two_cycle_picks_younger() {
        let g = edges(&[(1, 2), (2, 1)]);
        assert_eq!(detect(&g), Some(2));
    }

    #[test]
    fn longer_cycle_detected() {
        let g = edges(&[(1, 2), (2, 3), (3, 1)]);
        let victim = detect(&g).unwrap();
        assert!([1, 2, 3].contains(&victim));
    }

    #[test]
    fn disjoint_component_does_not_pollute_victim_pool() {
        let g = edges(&[(1, 2), (2, 1), (10, 11)]);
        assert_eq!(detect(&g), Some(2));
    }
}
