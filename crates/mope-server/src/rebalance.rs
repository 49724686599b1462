//! Bounded local rebuild
//!
//! A node `n` violates the balance bound when the heights of its two
//! subtrees differ by more than the threshold `N`. Repairing it never needs a
//! plaintext comparison: the tree's in-order sequence is already correct, so
//! the rebuild only reshapes a fixed-size region and preserves that sequence.
//!
//! ## Slots
//!
//! Starting at `n`, the rebuild follows the taller child (ties go right) for
//! `N + 1` steps, giving a spine of `N + 2` nodes. Each spine step also hangs
//! off the other child, and the last spine node contributes both children,
//! for `2N + 5` slots in total:
//!
//! ```text
//! slot 1          n
//! slots 2..=N+2   spine nodes below n
//! slots N+3..     hanging subtrees, real or virtual (empty)
//! ```
//!
//! Spine nodes are always real. Hanging subtrees are moved whole and never
//! opened up.
//!
//! ## Rebuild
//!
//! Slots are listed in in-order. Heap positions `1..=2N+5` of a complete
//! binary tree (children of `k` at `2k` and `2k + 1`) are listed in in-order
//! too, once per threshold. The `j`-th slot goes to the `j`-th heap position.
//! Both shapes are full binary trees with `N + 2` internal positions, so
//! internal positions always receive spine nodes and leaf positions receive
//! hanging subtrees.
//!
//! A single rebuild can leave a node inside the region over the bound (a
//! hanging subtree can be much taller than its new sibling), so the region is
//! settled bottom-up afterwards.

use std::time::{Duration, Instant};

use mope_core::Direction;

use crate::error::{Result, ServerError};
use crate::tree::{IndexTree, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Real(NodeId),
    Virtual,
}

impl Slot {
    fn from_child(child: Option<NodeId>) -> Self {
        child.map_or(Slot::Virtual, Slot::Real)
    }

    fn node(self) -> Option<NodeId> {
        match self {
            Slot::Real(id) => Some(id),
            Slot::Virtual => None,
        }
    }
}

/// What an upward rebalancing walk changed
#[derive(Debug, Default)]
pub struct RebalanceOutcome {
    /// Number of local rebuilds performed
    pub rebuilds: u32,
    /// Nodes whose path changed (may repeat; sorted and deduplicated by
    /// [`take_relabelled`](Self::take_relabelled))
    pub(crate) relabelled: Vec<NodeId>,
    /// Time spent inside rebuilds
    pub elapsed: Duration,
}

impl RebalanceOutcome {
    pub fn take_relabelled(&mut self) -> Vec<NodeId> {
        let mut nodes = std::mem::take(&mut self.relabelled);
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }
}

/// Local rebuild for one balance threshold
#[derive(Debug, Clone)]
pub struct Rebalancer {
    threshold: u32,
    /// In-order listing of heap positions `1..=2N+5`
    heap_order: Vec<usize>,
}

impl Rebalancer {
    pub fn new(threshold: u32) -> Self {
        let slot_count = 2 * threshold as usize + 5;
        Self {
            threshold,
            heap_order: heap_in_order(slot_count),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn slot_count(&self) -> usize {
        self.heap_order.len()
    }

    fn spine_len(&self) -> usize {
        self.threshold as usize + 2
    }

    pub fn violates(&self, tree: &IndexTree, id: NodeId) -> bool {
        tree.imbalance(id) > self.threshold
    }

    /// Walk from a freshly attached node's parent to the root, refreshing
    /// heights and rebalancing every ancestor on the way; fixes the tree root
    /// at the end
    pub fn rebalance_upwards(&self, tree: &mut IndexTree, from: NodeId) -> Result<RebalanceOutcome> {
        let mut outcome = RebalanceOutcome::default();
        let mut cursor = from;

        loop {
            tree.refresh_height(cursor);
            let top = self.rebalance(tree, cursor, &mut outcome)?;
            match tree.node(top).parent() {
                Some(parent) => cursor = parent,
                None => {
                    tree.set_root(top);
                    return Ok(outcome);
                }
            }
        }
    }

    /// Rebuild at `id` if it violates the bound; returns the root of the
    /// (possibly new) subtree occupying `id`'s old position
    pub fn rebalance(&self, tree: &mut IndexTree, id: NodeId, outcome: &mut RebalanceOutcome) -> Result<NodeId> {
        if !self.violates(tree, id) {
            return Ok(id);
        }

        let started = Instant::now();
        let (region_root, internal) = self.rebuild(tree, id, outcome)?;
        outcome.elapsed += started.elapsed();

        let region_parent = tree.node(region_root).parent();
        for &inner in internal.iter().filter(|&&inner| inner != region_root) {
            if !self.violates(tree, inner) {
                continue;
            }
            let settled = self.rebalance(tree, inner, outcome)?;
            let mut cursor = tree.node(settled).parent();
            while let Some(up) = cursor {
                if Some(up) == region_parent {
                    break;
                }
                tree.refresh_height(up);
                cursor = tree.node(up).parent();
            }
        }

        self.rebalance(tree, region_root, outcome)
    }

    /// One local rebuild at `n`; returns the new region root and the region's
    /// internal nodes, deepest first
    fn rebuild(&self, tree: &mut IndexTree, n: NodeId, outcome: &mut RebalanceOutcome) -> Result<(NodeId, Vec<NodeId>)> {
        let slot_count = self.slot_count();
        let spine_len = self.spine_len();

        let mut slots = vec![Slot::Virtual; slot_count + 1];
        let mut spine_dirs = vec![Direction::Right; spine_len];
        slots[1] = Slot::Real(n);

        let mut cursor = n;
        for i in 1..spine_len {
            let node = tree.node(cursor);
            let taller = if tree.height(node.left()) > tree.height(node.right()) {
                Direction::Left
            } else {
                Direction::Right
            };
            let spine = node.child(taller).ok_or_else(|| {
                ServerError::Corrupt(format!("spine ends early below \"{}\"", node.path()))
            })?;

            spine_dirs[i] = taller;
            slots[i + 1] = Slot::Real(spine);
            slots[i + spine_len + 1] = Slot::from_child(node.child(taller.opposite()));
            cursor = spine;
        }
        let last = tree.node(cursor);
        slots[spine_len + 1] = Slot::from_child(last.left());
        slots[slot_count] = Slot::from_child(last.right());

        let slot_order = self.slot_in_order(&spine_dirs);
        let mut at = vec![0usize; slot_count + 1];
        for (&position, &slot) in self.heap_order.iter().zip(slot_order.iter()) {
            at[position] = slot;
        }
        let placed = |position: usize| slots[at[position]];

        let parent = tree.node(n).parent();
        let path = tree.node(n).path().clone();

        let mut internal = Vec::with_capacity(spine_len);
        for position in 1..=slot_count / 2 {
            let Slot::Real(node) = placed(position) else {
                return Err(ServerError::Corrupt(
                    "virtual slot at an internal position".to_string(),
                ));
            };
            tree.link(node, Direction::Left, placed(2 * position).node());
            tree.link(node, Direction::Right, placed(2 * position + 1).node());
            internal.push(node);
        }
        internal.reverse();
        for &node in &internal {
            tree.refresh_height(node);
        }

        let Some(&region_root) = internal.last() else {
            return Err(ServerError::Corrupt("empty rebuild region".to_string()));
        };
        match (parent, path.last()) {
            (Some(parent), Some(direction)) => tree.link(parent, direction, Some(region_root)),
            (None, _) => tree.set_root(region_root),
            (Some(_), None) => {
                return Err(ServerError::Corrupt("non-root node with empty path".to_string()))
            }
        }

        let relabelled = tree.relabel(region_root, path.clone());
        tracing::debug!(
            at = %path,
            threshold = self.threshold,
            relabelled = relabelled.len(),
            "Rebuilt subtree"
        );
        outcome.relabelled.extend(relabelled);
        outcome.rebuilds += 1;

        Ok((region_root, internal))
    }

    /// In-order listing of slot indices; spine slot `i < N + 2` has children
    /// `i + 1` (spine) and `i + N + 3` (hanging) on the sides recorded in
    /// `spine_dirs`, and the last spine slot has `N + 3` and `2N + 5`
    fn slot_in_order(&self, spine_dirs: &[Direction]) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.slot_count());
        self.visit_slot(1, spine_dirs, &mut out);
        out
    }

    fn visit_slot(&self, slot: usize, spine_dirs: &[Direction], out: &mut Vec<usize>) {
        let spine_len = self.spine_len();
        if slot > spine_len {
            out.push(slot);
            return;
        }

        let (left, right) = if slot < spine_len {
            let (spine, hanging) = (slot + 1, slot + spine_len + 1);
            match spine_dirs[slot] {
                Direction::Left => (spine, hanging),
                Direction::Right => (hanging, spine),
            }
        } else {
            (spine_len + 1, self.slot_count())
        };

        self.visit_slot(left, spine_dirs, out);
        out.push(slot);
        self.visit_slot(right, spine_dirs, out);
    }
}

/// In-order listing of heap positions `1..=count`
fn heap_in_order(count: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(count);
    let mut stack = Vec::new();
    let mut cursor = 1;

    while cursor <= count || !stack.is_empty() {
        while cursor <= count {
            stack.push(cursor);
            cursor *= 2;
        }
        if let Some(position) = stack.pop() {
            out.push(position);
            cursor = 2 * position + 1;
        }
    }

    out
}

/// Largest sibling height difference anywhere in the tree
pub fn max_imbalance(tree: &IndexTree) -> u32 {
    tree.in_order()
        .into_iter()
        .map(|id| tree.imbalance(id))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mope_core::{Ciphertext, Path};
    use proptest::prelude::*;
    use rand::seq::SliceRandom;

    fn ct(v: u64) -> Ciphertext {
        Ciphertext::new(v.to_be_bytes().to_vec())
    }

    fn plain(tree: &IndexTree, id: NodeId) -> u64 {
        let bytes: [u8; 8] = tree.node(id).value().as_bytes().try_into().unwrap();
        u64::from_be_bytes(bytes)
    }

    /// Client-side walk done locally: compare, descend, attach, rebalance
    fn insert(tree: &mut IndexTree, rebalancer: &Rebalancer, v: u64) -> Vec<NodeId> {
        let Some(mut cursor) = tree.root() else {
            tree.insert_root(ct(v), v).unwrap();
            return Vec::new();
        };
        loop {
            let here = plain(tree, cursor);
            let direction = match v.cmp(&here) {
                std::cmp::Ordering::Less => Direction::Left,
                std::cmp::Ordering::Greater => Direction::Right,
                std::cmp::Ordering::Equal => {
                    tree.append_record(cursor, v);
                    return Vec::new();
                }
            };
            match tree.child(cursor, direction) {
                Some(child) => cursor = child,
                None => {
                    let new = tree.attach(cursor, direction, ct(v)).unwrap();
                    tree.append_record(new, v);
                    let mut outcome = rebalancer.rebalance_upwards(tree, cursor).unwrap();
                    let mut path_check = Some(new);
                    while let Some(id) = path_check {
                        assert!(tree.imbalance(id) <= rebalancer.threshold());
                        path_check = tree.node(id).parent();
                    }
                    return outcome.take_relabelled();
                }
            }
        }
    }

    fn assert_sound(tree: &IndexTree, threshold: u32, mut expected: Vec<u64>) {
        tree.verify().unwrap();
        expected.sort_unstable();
        expected.dedup();
        let in_order: Vec<u64> = tree.in_order().into_iter().map(|id| plain(tree, id)).collect();
        assert_eq!(in_order, expected);
        assert!(max_imbalance(tree) <= threshold);
    }

    #[test]
    fn test_heap_in_order() {
        assert_eq!(heap_in_order(7), vec![4, 2, 5, 1, 6, 3, 7]);
        assert_eq!(heap_in_order(1), vec![1]);
    }

    #[test]
    fn test_slot_in_order_right_spine() {
        let rebalancer = Rebalancer::new(1);
        let dirs = vec![Direction::Right; 3];
        assert_eq!(rebalancer.slot_in_order(&dirs), vec![5, 1, 6, 2, 4, 3, 7]);
    }

    #[test]
    fn test_three_ascending_rotate_to_middle() {
        let rebalancer = Rebalancer::new(1);
        let mut tree = IndexTree::new();
        for v in [1, 2, 3] {
            insert(&mut tree, &rebalancer, v);
        }

        let root = tree.root().unwrap();
        assert_eq!(plain(&tree, root), 2);
        let left = tree.node(root).left().unwrap();
        let right = tree.node(root).right().unwrap();
        assert_eq!(plain(&tree, left), 1);
        assert_eq!(plain(&tree, right), 3);
        assert_eq!(tree.node(left).path(), &"0".parse::<Path>().unwrap());
        assert_eq!(tree.node(right).path(), &"1".parse::<Path>().unwrap());
        assert_sound(&tree, 1, vec![1, 2, 3]);
    }

    #[test]
    fn test_small_inserts_do_not_rebuild() {
        let rebalancer = Rebalancer::new(5);
        let mut tree = IndexTree::new();
        for v in [5, 3, 8, 1] {
            assert!(insert(&mut tree, &rebalancer, v).is_empty());
        }
        assert_eq!(plain(&tree, tree.root().unwrap()), 5);
        assert_sound(&tree, 5, vec![5, 3, 8, 1]);
    }

    #[test]
    fn test_sorted_and_reversed_stay_bounded() {
        for threshold in [1, 2, 5] {
            let rebalancer = Rebalancer::new(threshold);

            let mut ascending = IndexTree::new();
            let values: Vec<u64> = (0..600).collect();
            for &v in &values {
                insert(&mut ascending, &rebalancer, v);
            }
            assert_sound(&ascending, threshold, values.clone());

            let mut descending = IndexTree::new();
            for &v in values.iter().rev() {
                insert(&mut descending, &rebalancer, v);
            }
            assert_sound(&descending, threshold, values);
        }
    }

    #[test]
    fn test_shuffled_stays_bounded() {
        let mut rng = rand::thread_rng();
        for threshold in [1, 2, 3, 5] {
            let rebalancer = Rebalancer::new(threshold);
            let mut values: Vec<u64> = (0..1500).map(|v| v * 7 + 100_000).collect();
            values.shuffle(&mut rng);

            let mut tree = IndexTree::new();
            for &v in &values {
                insert(&mut tree, &rebalancer, v);
            }
            assert_sound(&tree, threshold, values);
        }
    }

    #[test]
    fn test_relabelled_nodes_match_path_changes() {
        let rebalancer = Rebalancer::new(1);
        let mut tree = IndexTree::new();
        for v in 0..20 {
            let before: Vec<(NodeId, Path)> = tree
                .in_order()
                .into_iter()
                .map(|id| (id, tree.node(id).path().clone()))
                .collect();
            let relabelled = insert(&mut tree, &rebalancer, v);

            let changed: Vec<NodeId> = before
                .into_iter()
                .filter(|(id, path)| tree.node(*id).path() != path)
                .map(|(id, _)| id)
                .collect();
            for id in changed {
                assert!(relabelled.contains(&id));
            }
        }
    }

    #[test]
    fn test_duplicates_leave_shape_alone() {
        let rebalancer = Rebalancer::new(2);
        let mut tree = IndexTree::new();
        for v in [10, 5, 20, 1] {
            insert(&mut tree, &rebalancer, v);
        }
        let paths: Vec<Path> = tree.in_order().into_iter().map(|id| tree.node(id).path().clone()).collect();

        insert(&mut tree, &rebalancer, 5);
        let after: Vec<Path> = tree.in_order().into_iter().map(|id| tree.node(id).path().clone()).collect();
        assert_eq!(paths, after);
        assert_eq!(tree.node(tree.find(&ct(5)).unwrap()).record_ids(), &[5, 5]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_any_order_is_bounded(
            values in prop::collection::vec(any::<u32>(), 1..400),
            threshold in 1u32..=5,
        ) {
            let rebalancer = Rebalancer::new(threshold);
            let mut tree = IndexTree::new();
            for &v in &values {
                insert(&mut tree, &rebalancer, v as u64);
            }
            tree.verify().unwrap();
            prop_assert!(max_imbalance(&tree) <= threshold);

            let in_order: Vec<u64> = tree.in_order().into_iter().map(|id| plain(&tree, id)).collect();
            let mut expected: Vec<u64> = values.iter().map(|&v| v as u64).collect();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(in_order, expected);
        }
    }
}
