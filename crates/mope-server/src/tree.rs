//! Server-side index tree
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. The tree
//! never compares ciphertexts: every placement decision arrives from the
//! client as a direction, and the tree only checks that the request is
//! structurally consistent.
//!
//! ## Invariants
//!
//! - `path(child) = path(parent) + edge`; the root has the empty path.
//! - Exactly one node has no parent, and every node is reachable from it.
//! - `height` is the cached subtree height (leaf = 1, empty = 0).
//! - Each ciphertext labels at most one node; repeated insertions of the same
//!   value only append record ids.

use std::collections::HashMap;

use mope_core::{Ciphertext, Direction, Opc, Path, Record, RecordId};

use crate::error::{Result, ServerError};

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct TreeNode {
    value: Ciphertext,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    path: Path,
    record_ids: Vec<RecordId>,
    height: u32,
}

impl TreeNode {
    fn new(value: Ciphertext, path: Path, record_ids: Vec<RecordId>) -> Self {
        Self {
            value,
            left: None,
            right: None,
            parent: None,
            path,
            record_ids,
            height: 1,
        }
    }

    pub fn value(&self) -> &Ciphertext {
        &self.value
    }

    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    pub fn child(&self, direction: Direction) -> Option<NodeId> {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_ids(&self) -> &[RecordId] {
        &self.record_ids
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn child_mut(&mut self, direction: Direction) -> &mut Option<NodeId> {
        match direction {
            Direction::Left => &mut self.left,
            Direction::Right => &mut self.right,
        }
    }
}

/// Arena-backed binary search tree keyed by ciphertext
#[derive(Debug, Default)]
pub struct IndexTree {
    nodes: Vec<TreeNode>,
    by_value: HashMap<Ciphertext, NodeId>,
    root: Option<NodeId>,
}

impl IndexTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.0]
    }

    pub fn find(&self, value: &Ciphertext) -> Option<NodeId> {
        self.by_value.get(value).copied()
    }

    /// Like [`find`](Self::find), but an unknown value is a protocol error
    pub fn lookup(&self, value: &Ciphertext) -> Result<NodeId> {
        self.find(value)
            .ok_or_else(|| ServerError::UnknownCiphertext(value.clone()))
    }

    pub fn child(&self, id: NodeId, direction: Direction) -> Option<NodeId> {
        self.node(id).child(direction)
    }

    /// Height of a possibly empty subtree
    pub fn height(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| self.node(id).height)
    }

    /// `|height(left) - height(right)|`
    pub fn imbalance(&self, id: NodeId) -> u32 {
        let node = self.node(id);
        self.height(node.left).abs_diff(self.height(node.right))
    }

    /// Node at `path`, if any
    pub fn resolve(&self, path: &Path) -> Option<NodeId> {
        let mut cursor = self.root?;
        for direction in path.iter() {
            cursor = self.child(cursor, direction)?;
        }
        Some(cursor)
    }

    /// Lowest common ancestor of two nodes
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let prefix = self.node(a).path.common_prefix(&self.node(b).path);
        self.resolve(&prefix)
    }

    /// Place the first value of an empty tree
    pub fn insert_root(&mut self, value: Ciphertext, record_id: RecordId) -> Result<NodeId> {
        if self.root.is_some() {
            return Err(ServerError::RootExists);
        }
        if self.by_value.contains_key(&value) {
            return Err(ServerError::DuplicateNode(value));
        }

        let id = self.push(TreeNode::new(value, Path::root(), vec![record_id]));
        self.root = Some(id);
        Ok(id)
    }

    /// Check that `value` may become the `direction` child of `parent`
    pub fn check_slot(&self, parent: NodeId, direction: Direction, value: &Ciphertext) -> Result<Path> {
        let node = self.node(parent);
        if node.child(direction).is_some() {
            return Err(ServerError::SlotOccupied {
                parent: node.value.clone(),
                direction,
            });
        }
        if self.by_value.contains_key(value) {
            return Err(ServerError::DuplicateNode(value.clone()));
        }
        Ok(node.path.child(direction))
    }

    /// Link a new leaf under `parent`; heights above it are left stale for
    /// the rebalancing walk to refresh. The leaf carries no record ids until
    /// [`append_record`](Self::append_record) is called for it.
    pub fn attach(&mut self, parent: NodeId, direction: Direction, value: Ciphertext) -> Result<NodeId> {
        let path = self.check_slot(parent, direction, &value)?;
        let id = self.push(TreeNode::new(value, path, Vec::new()));
        self.link(parent, direction, Some(id));
        Ok(id)
    }

    pub fn append_record(&mut self, id: NodeId, record_id: RecordId) {
        self.node_mut(id).record_ids.push(record_id);
    }

    fn push(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_value.insert(node.value.clone(), id);
        self.nodes.push(node);
        id
    }

    /// Set `parent`'s child slot and the child's back-pointer
    pub(crate) fn link(&mut self, parent: NodeId, direction: Direction, child: Option<NodeId>) {
        *self.node_mut(parent).child_mut(direction) = child;
        if let Some(child) = child {
            self.node_mut(child).parent = Some(parent);
        }
    }

    pub(crate) fn set_root(&mut self, id: NodeId) {
        self.node_mut(id).parent = None;
        self.root = Some(id);
    }

    pub(crate) fn refresh_height(&mut self, id: NodeId) {
        let node = self.node(id);
        let height = 1 + self.height(node.left).max(self.height(node.right));
        self.node_mut(id).height = height;
    }

    /// Reassign paths below `id`, starting from `path`; returns the nodes
    /// whose path changed
    pub(crate) fn relabel(&mut self, id: NodeId, path: Path) -> Vec<NodeId> {
        let mut changed = Vec::new();
        let mut stack = vec![(id, path)];

        while let Some((id, path)) = stack.pop() {
            let node = self.node(id);
            let (left, right) = (node.left, node.right);
            if let Some(left) = left {
                stack.push((left, path.child(Direction::Left)));
            }
            if let Some(right) = right {
                stack.push((right, path.child(Direction::Right)));
            }
            if node.path != path {
                self.node_mut(id).path = path;
                changed.push(id);
            }
        }

        changed
    }

    /// Node ids in in-order (ascending plaintext order)
    pub fn in_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();
        let mut cursor = self.root;

        while cursor.is_some() || !stack.is_empty() {
            while let Some(id) = cursor {
                stack.push(id);
                cursor = self.node(id).left;
            }
            if let Some(id) = stack.pop() {
                out.push(id);
                cursor = self.node(id).right;
            }
        }

        out
    }

    /// Rebuild from persisted rows
    ///
    /// Rows are grouped by value into one node each; the OPC of a group is
    /// decoded to the node's path and nodes are linked by path prefix.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let mut records: Vec<Record> = records.into_iter().collect();
        records.sort_by_key(|record| record.id);

        let mut group_of: HashMap<Ciphertext, usize> = HashMap::new();
        let mut groups: Vec<(Ciphertext, Opc, Vec<RecordId>)> = Vec::new();
        for record in records {
            match group_of.get(&record.value) {
                Some(&index) => {
                    let (_, opc, ids) = &mut groups[index];
                    if *opc != record.opc {
                        tracing::warn!(
                            value = %record.value,
                            kept = %opc,
                            ignored = %record.opc,
                            record_id = record.id,
                            "Duplicate rows disagree on OPC"
                        );
                    }
                    ids.push(record.id);
                }
                None => {
                    group_of.insert(record.value.clone(), groups.len());
                    groups.push((record.value, record.opc, vec![record.id]));
                }
            }
        }

        let mut placed = groups
            .into_iter()
            .map(|(value, opc, ids)| -> Result<_> { Ok((opc.decode()?, value, ids)) })
            .collect::<Result<Vec<_>>>()?;
        placed.sort_by_key(|(path, ..)| path.len());

        let mut tree = Self::new();
        let mut by_path: HashMap<Path, NodeId> = HashMap::new();

        for (path, value, ids) in placed {
            if by_path.contains_key(&path) {
                return Err(ServerError::Corrupt(format!(
                    "two values stored at path \"{}\"",
                    path
                )));
            }

            let parent = match (path.parent(), path.last()) {
                (Some(parent_path), Some(direction)) => {
                    let parent = by_path.get(&parent_path).copied().ok_or_else(|| {
                        ServerError::Corrupt(format!("node at path \"{}\" has no parent", path))
                    })?;
                    Some((parent, direction))
                }
                _ => None,
            };

            let id = tree.push(TreeNode::new(value, path.clone(), ids));
            match parent {
                Some((parent, direction)) => tree.link(parent, direction, Some(id)),
                None => tree.root = Some(id),
            }
            by_path.insert(path, id);
        }

        if !tree.is_empty() && tree.root.is_none() {
            return Err(ServerError::Corrupt("rows contain no root".to_string()));
        }

        // Pushed shallowest first, so reverse arena order is deepest first.
        for index in (0..tree.nodes.len()).rev() {
            tree.refresh_height(NodeId(index));
        }

        Ok(tree)
    }

    /// Check every structural invariant
    pub fn verify(&self) -> Result<()> {
        let corrupt = |message: String| -> Result<()> { Err(ServerError::Corrupt(message)) };

        let Some(root) = self.root else {
            if self.nodes.is_empty() {
                return Ok(());
            }
            return corrupt("nodes present but no root".to_string());
        };

        let root_node = self.node(root);
        if root_node.parent.is_some() || !root_node.path.is_empty() {
            return corrupt("root has a parent or a non-empty path".to_string());
        }

        let mut visited = 0usize;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            visited += 1;
            let node = self.node(id);

            if self.by_value.get(&node.value) != Some(&id) {
                return corrupt(format!("value index out of date for {}", node.value));
            }
            let expected = 1 + self.height(node.left).max(self.height(node.right));
            if node.height != expected {
                return corrupt(format!(
                    "stale height at \"{}\": cached {}, actual {}",
                    node.path, node.height, expected
                ));
            }

            for direction in [Direction::Left, Direction::Right] {
                if let Some(child) = node.child(direction) {
                    let child_node = self.node(child);
                    if child_node.parent != Some(id) {
                        return corrupt(format!("broken parent link below \"{}\"", node.path));
                    }
                    if child_node.path != node.path.child(direction) {
                        return corrupt(format!(
                            "path \"{}\" does not extend \"{}\"",
                            child_node.path, node.path
                        ));
                    }
                    stack.push(child);
                }
            }
        }

        if visited != self.nodes.len() || self.by_value.len() != self.nodes.len() {
            return corrupt(format!(
                "{} nodes reachable out of {}",
                visited,
                self.nodes.len()
            ));
        }

        Ok(())
    }
}
