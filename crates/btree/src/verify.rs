//! Structural consistency checks, grounded on `btree_m::verify_tree`: walk
//! every node and confirm fence-key bounds and child linkage are
//! consistent, without needing a separate physical page format to inspect.

use crate::page::NodeBody;
use crate::tree::BTree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub consistent: bool,
    pub violations: Vec<String>,
}

pub fn verify_tree(tree: &BTree) -> VerifyReport {
    let mut violations = Vec::new();
    walk(tree, tree.root_id(), &mut violations);
    VerifyReport {
        consistent: violations.is_empty(),
        violations,
    }
}

fn walk(tree: &BTree, page_id: u64, violations: &mut Vec<String>) {
    let node = match tree.node(page_id) {
        Some(n) => n,
        None => {
            violations.push(format!("dangling child pointer to page {page_id}"));
            return;
        }
    };

    match &node.body {
        NodeBody::Leaf { entries } => {
            for (key, _) in entries {
                if !node.in_fence(key) {
                    violations.push(format!(
                        "key {key:?} in leaf {page_id} violates fence bounds"
                    ));
                }
            }
            for w in entries.windows(2) {
                if w[0].0 >= w[1].0 {
                    violations.push(format!("leaf {page_id} keys out of order"));
                }
            }
        }
        NodeBody::Internal { separators, children } => {
            if children.len() != separators.len() + 1 {
                violations.push(format!(
                    "internal {page_id} has {} children but {} separators",
                    children.len(),
                    separators.len()
                ));
            }
            for sep in separators {
                if !node.in_fence(sep) {
                    violations.push(format!(
                        "separator {sep:?} in internal {page_id} violates fence bounds"
                    ));
                }
            }
            for &child in children {
                walk(tree, child, violations);
            }
        }
    }

    if let Some(foster) = node.foster_child {
        violations.push(format!(
            "node {page_id} has an un-adopted foster child {foster}"
        ));
    }
}
