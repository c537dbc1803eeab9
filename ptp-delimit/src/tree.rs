//! Rooted binary gene tree with per-node PTP statistics.
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Parent and child links are
//! indices, so the tree is dropped as one unit.
//!
//! A tree is built (programmatically or by [`crate::newick::parse`]),
//! validated, and then annotated for a minimum branch length with
//! [`PtpTree::annotate`]. Annotation fills the subtree edge statistics that
//! the optimizer and the sampler read.

use ptp_core::{PtpError, Result, Summarizable};

use crate::likelihood::log_likelihood;

/// Index into the tree's node arena.
pub type NodeId = usize;

/// Process a node belongs to in a delimitation.
///
/// The edges from a node to its children belong to the node's process: a
/// speciation node's child edges are speciation edges, a coalescent node's
/// child edges are coalescent edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Process {
    Speciation,
    Coalescent,
    #[default]
    Unassigned,
}

/// A single node of the tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes; exactly zero or two in a valid tree.
    pub children: Vec<NodeId>,
    /// Branch length from this node to its parent.
    pub branch_length: f64,
    /// Node label; required for leaves, optional for internal nodes.
    pub label: String,
    /// Number of leaves below (and including) this node.
    pub leaves: usize,
    /// Number of edges inside the subtree longer than the minimum branch
    /// length, and the sum of their lengths.
    pub edge_count: usize,
    pub edgelen_sum: f64,
    /// Log-likelihood of the subtree's edges as one coalescent population.
    pub coal_logl: f64,
    /// Counted edges on the path from the root down to (and including) this
    /// node's own edge: the speciation edges forced when this node starts a
    /// species.
    pub spec_edge_count: usize,
    pub spec_edgelen_sum: f64,
    pub process: Process,
    /// Position among the inner nodes, used by the sampler's tallies.
    pub slot: Option<usize>,
}

impl Node {
    /// A fresh, unannotated node.
    pub fn new(id: NodeId, parent: Option<NodeId>, label: String, branch_length: f64) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            branch_length,
            label,
            leaves: 0,
            edge_count: 0,
            edgelen_sum: 0.0,
            coal_logl: 0.0,
            spec_edge_count: 0,
            spec_edgelen_sum: 0.0,
            process: Process::Unassigned,
            slot: None,
        }
    }

    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Left and right child of an inner node.
    pub fn pair(&self) -> Option<(NodeId, NodeId)> {
        match self.children.as_slice() {
            &[left, right] => Some((left, right)),
            _ => None,
        }
    }
}

/// A rooted binary tree stored as an arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PtpTree {
    nodes: Vec<Node>,
    root: NodeId,
    /// Inner nodes in slot order.
    inner: Vec<NodeId>,
    /// Threshold the statistics were computed for.
    min_branch_length: Option<f64>,
}

impl PtpTree {
    /// Create a tree with a single unnamed root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(0, None, String::new(), 0.0)],
            root: 0,
            inner: Vec::new(),
            min_branch_length: None,
        }
    }

    /// Create a tree from pre-built nodes and a root index.
    ///
    /// The nodes must already form a valid rooted binary tree.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PtpError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(PtpError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        let tree = Self {
            nodes,
            root,
            inner: Vec::new(),
            min_branch_length: None,
        };
        tree.validate()?;
        Ok(tree)
    }

    /// Add a child to `parent` and return its `NodeId`.
    ///
    /// The tree is only valid again once every inner node has two children.
    pub fn add_child(&mut self, parent: NodeId, label: &str, branch_length: f64) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(PtpError::InvalidInput(format!(
                "parent index {} out of range ({})",
                parent,
                self.nodes.len()
            )));
        }
        if self.nodes[parent].children.len() >= 2 {
            return Err(PtpError::InvalidInput(format!(
                "node {} already has two children",
                parent
            )));
        }
        let id = self.nodes.len();
        self.nodes
            .push(Node::new(id, Some(parent), label.to_string(), branch_length));
        self.nodes[parent].children.push(id);
        self.min_branch_length = None;
        Ok(id)
    }

    /// Check the rooted binary tree invariants.
    ///
    /// Exactly one root, every node reachable from it exactly once, parent
    /// and child links agree, zero or two children per node, and finite
    /// non-negative branch lengths.
    pub fn validate(&self) -> Result<()> {
        let n = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.id != idx {
                return Err(PtpError::MalformedTree(format!(
                    "node at index {} carries id {}",
                    idx, node.id
                )));
            }
            if !(node.branch_length >= 0.0 && node.branch_length.is_finite()) {
                return Err(PtpError::MalformedTree(format!(
                    "node {} has invalid branch length {}",
                    idx, node.branch_length
                )));
            }
            if node.children.len() == 1 || node.children.len() > 2 {
                return Err(PtpError::MalformedTree(format!(
                    "node {} has {} children, expected 0 or 2",
                    idx,
                    node.children.len()
                )));
            }
            match node.parent {
                None if idx != self.root => {
                    return Err(PtpError::MalformedTree(format!(
                        "node {} has no parent but is not the root",
                        idx
                    )));
                }
                Some(_) if idx == self.root => {
                    return Err(PtpError::MalformedTree("root has a parent".into()));
                }
                Some(p) if p >= n || !self.nodes[p].children.contains(&idx) => {
                    return Err(PtpError::MalformedTree(format!(
                        "node {} is not a child of its parent {}",
                        idx, p
                    )));
                }
                _ => {}
            }
        }

        let mut seen = vec![false; n];
        let mut stack = vec![self.root];
        let mut visited = 0;
        while let Some(id) = stack.pop() {
            if seen[id] {
                return Err(PtpError::MalformedTree(format!("node {} reached twice", id)));
            }
            seen[id] = true;
            visited += 1;
            for &child in &self.nodes[id].children {
                if child >= n || self.nodes[child].parent != Some(id) {
                    return Err(PtpError::MalformedTree(format!(
                        "child link {} -> {} is not mirrored by a parent link",
                        id, child
                    )));
                }
                stack.push(child);
            }
        }
        if visited != n {
            return Err(PtpError::MalformedTree(format!(
                "{} of {} nodes unreachable from the root",
                n - visited,
                n
            )));
        }
        Ok(())
    }

    /// Compute the per-node statistics for `min_branch_length`.
    ///
    /// Only edges strictly longer than the threshold are counted. Process
    /// tags are reset to [`Process::Unassigned`] and slots are assigned to
    /// the inner nodes in preorder.
    pub fn annotate(&mut self, min_branch_length: f64) -> Result<()> {
        self.validate()?;
        if !(min_branch_length >= 0.0 && min_branch_length.is_finite()) {
            return Err(PtpError::InvalidInput(format!(
                "min_branch_length must be finite and >= 0, got {}",
                min_branch_length
            )));
        }

        let postorder: Vec<NodeId> = self.iter_postorder().collect();
        for &id in &postorder {
            let (leaves, edge_count, edgelen_sum) = match self.nodes[id].pair() {
                None => (1, 0, 0.0),
                Some((left, right)) => {
                    let mut leaves = 0;
                    let mut edge_count = 0;
                    let mut edgelen_sum = 0.0;
                    for child in [left, right] {
                        let c = &self.nodes[child];
                        leaves += c.leaves;
                        edge_count += c.edge_count;
                        edgelen_sum += c.edgelen_sum;
                        if c.branch_length > min_branch_length {
                            edge_count += 1;
                            edgelen_sum += c.branch_length;
                        }
                    }
                    (leaves, edge_count, edgelen_sum)
                }
            };
            let node = &mut self.nodes[id];
            node.leaves = leaves;
            node.edge_count = edge_count;
            node.edgelen_sum = edgelen_sum;
            node.coal_logl = log_likelihood(edge_count, edgelen_sum);
        }

        self.inner.clear();
        let preorder: Vec<NodeId> = self.iter_preorder().collect();
        for id in preorder {
            let (count, sum) = match self.nodes[id].parent {
                None => (0, 0.0),
                Some(p) => {
                    let parent = &self.nodes[p];
                    let own = self.nodes[id].branch_length;
                    if own > min_branch_length {
                        (parent.spec_edge_count + 1, parent.spec_edgelen_sum + own)
                    } else {
                        (parent.spec_edge_count, parent.spec_edgelen_sum)
                    }
                }
            };
            let slot = if self.nodes[id].is_leaf() {
                None
            } else {
                self.inner.push(id);
                Some(self.inner.len() - 1)
            };
            let node = &mut self.nodes[id];
            node.spec_edge_count = count;
            node.spec_edgelen_sum = sum;
            node.process = Process::Unassigned;
            node.slot = slot;
        }

        self.min_branch_length = Some(min_branch_length);
        Ok(())
    }

    /// Threshold of the last [`annotate`](Self::annotate) call, if the tree
    /// has not changed shape since.
    pub fn min_branch_length(&self) -> Option<f64> {
        self.min_branch_length
    }

    /// Annotate unless the statistics already match `min_branch_length`.
    pub fn ensure_annotated(&mut self, min_branch_length: f64) -> Result<()> {
        if self.min_branch_length == Some(min_branch_length) {
            return Ok(());
        }
        self.annotate(min_branch_length)
    }

    pub(crate) fn require_annotated(&self) -> Result<f64> {
        self.min_branch_length.ok_or_else(|| {
            PtpError::InvalidInput("tree statistics missing; call annotate() first".into())
        })
    }

    /// Whether the edge above `id` takes part in the likelihood.
    pub(crate) fn is_counted(&self, id: NodeId) -> bool {
        match (self.nodes[id].parent, self.min_branch_length) {
            (Some(_), Some(min)) => self.nodes[id].branch_length > min,
            _ => false,
        }
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable access to a node by id.
    ///
    /// Changing shape or branch lengths through this handle invalidates the
    /// annotation; call [`annotate`](Self::annotate) again afterwards.
    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Node by id; `id` must come from this tree.
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// All nodes in arena order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// All leaf node ids.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Inner (non-leaf) node ids, root included, in slot order.
    ///
    /// Empty until the tree is annotated.
    pub fn inner_nodes(&self) -> &[NodeId] {
        &self.inner
    }

    /// Counted edges of the whole tree and the sum of their lengths.
    pub fn edge_totals(&self) -> (usize, f64) {
        let root = &self.nodes[self.root];
        (root.edge_count, root.edgelen_sum)
    }

    /// Pre-order (parent before children) traversal yielding node ids.
    pub fn iter_preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Post-order (children before parent) traversal yielding node ids.
    pub fn iter_postorder(&self) -> PostorderIter {
        // Reverse of a preorder that visits right children first.
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            result.push(id);
            for &child in &self.nodes[id].children {
                stack.push(child);
            }
        }
        result.reverse();
        PostorderIter {
            sequence: result,
            pos: 0,
        }
    }

    /// Leaves of the subtree rooted at `id`, left to right.
    pub fn subtree_leaves(&self, id: NodeId) -> Result<Vec<NodeId>> {
        if id >= self.nodes.len() {
            return Err(PtpError::UnknownNode(id));
        }
        Ok(self.leaves_below(id))
    }

    pub(crate) fn leaves_below(&self, id: NodeId) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let node = &self.nodes[cur];
            if node.is_leaf() {
                leaves.push(cur);
            }
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        leaves
    }

    /// Sorted list of leaf labels.
    pub fn leaf_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.label.clone())
            .collect();
        names.sort();
        names
    }

    /// Resolve leaf labels to node ids, in the order given.
    pub fn find_leaves(&self, labels: &[&str]) -> Result<Vec<NodeId>> {
        labels
            .iter()
            .map(|&label| {
                self.nodes
                    .iter()
                    .find(|n| n.is_leaf() && n.label == label)
                    .map(|n| n.id)
                    .ok_or_else(|| PtpError::InvalidInput(format!("no leaf labelled '{}'", label)))
            })
            .collect()
    }

    /// A copy of the tree without the subtree rooted at `id`.
    ///
    /// The parent of `id` is spliced out: its other child takes its place,
    /// and the two branch lengths are merged. If the parent is the root, the
    /// sibling becomes the new root. Node ids are renumbered in preorder and
    /// the copy is unannotated.
    pub fn crop(&self, id: NodeId) -> Result<PtpTree> {
        let node = self.nodes.get(id).ok_or(PtpError::UnknownNode(id))?;
        let parent = node
            .parent
            .ok_or_else(|| PtpError::InvalidInput("cannot crop the root".into()))?;
        let sibling = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| c != id)
            .ok_or_else(|| PtpError::MalformedTree(format!("node {} has no sibling", id)))?;

        let mut nodes: Vec<Node> = Vec::with_capacity(self.nodes.len().saturating_sub(2));
        let mut stack: Vec<(NodeId, Option<NodeId>, f64)> = if self.nodes[parent].is_root() {
            vec![(sibling, None, 0.0)]
        } else {
            vec![(self.root, None, 0.0)]
        };
        while let Some((old, new_parent, length)) = stack.pop() {
            if old == parent {
                let merged = self.nodes[parent].branch_length + self.nodes[sibling].branch_length;
                stack.push((sibling, new_parent, merged));
                continue;
            }
            let new_id = nodes.len();
            let old_node = &self.nodes[old];
            nodes.push(Node::new(new_id, new_parent, old_node.label.clone(), length));
            if let Some(p) = new_parent {
                nodes[p].children.push(new_id);
            }
            for &child in old_node.children.iter().rev() {
                if child != id {
                    stack.push((child, Some(new_id), self.nodes[child].branch_length));
                }
            }
        }
        PtpTree::from_nodes(nodes, 0)
    }

    /// Current process tag of every node, indexed by `NodeId`.
    pub fn processes(&self) -> Vec<Process> {
        self.nodes.iter().map(|n| n.process).collect()
    }

    /// Overwrite the process tag of every node.
    pub fn set_processes(&mut self, processes: &[Process]) -> Result<()> {
        if processes.len() != self.nodes.len() {
            return Err(PtpError::InvalidInput(format!(
                "expected {} process tags, got {}",
                self.nodes.len(),
                processes.len()
            )));
        }
        for (node, &process) in self.nodes.iter_mut().zip(processes) {
            node.process = process;
        }
        Ok(())
    }

    /// Species induced by the current tags: the leaves below every
    /// coalescent node whose parent is a speciation node (or below the root
    /// if the root is coalescent), in preorder.
    pub fn species(&self) -> Vec<Vec<NodeId>> {
        species_roots(self, &self.processes())
            .into_iter()
            .map(|r| self.leaves_below(r))
            .collect()
    }

    /// Check that the current tags form a valid delimitation.
    pub fn validate_delimitation(&self) -> Result<()> {
        check_delimitation(self, &self.processes())
    }
}

/// Nodes that start a species under `processes`, in preorder.
pub(crate) fn species_roots(tree: &PtpTree, processes: &[Process]) -> Vec<NodeId> {
    tree.iter_preorder()
        .filter(|&id| {
            processes[id] == Process::Coalescent
                && tree.nodes[id]
                    .parent
                    .map_or(true, |p| processes[p] == Process::Speciation)
        })
        .collect()
}

/// Speciation nodes must be inner nodes whose parent is speciation (or the
/// root); every node must carry a tag.
pub(crate) fn check_delimitation(tree: &PtpTree, processes: &[Process]) -> Result<()> {
    if processes.len() != tree.nodes.len() {
        return Err(PtpError::InvalidInput(format!(
            "expected {} process tags, got {}",
            tree.nodes.len(),
            processes.len()
        )));
    }
    for node in &tree.nodes {
        match processes[node.id] {
            Process::Unassigned => {
                return Err(PtpError::InvalidInput(format!(
                    "node {} has no process assigned",
                    node.id
                )));
            }
            Process::Speciation if node.is_leaf() => {
                return Err(PtpError::InvalidInput(format!(
                    "leaf {} cannot be a speciation node",
                    node.id
                )));
            }
            Process::Speciation => {
                if let Some(p) = node.parent {
                    if processes[p] != Process::Speciation {
                        return Err(PtpError::InvalidInput(format!(
                            "speciation node {} below coalescent node {}",
                            node.id, p
                        )));
                    }
                }
            }
            Process::Coalescent => {}
        }
    }
    Ok(())
}

impl Default for PtpTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Summarizable for PtpTree {
    fn summary(&self) -> String {
        let leaves = self.leaf_count();
        let (edges, length) = self.edge_totals();
        format!(
            "PtpTree: {} nodes ({} leaves), {} counted edges, length {:.6}",
            self.node_count(),
            leaves,
            edges,
            length
        )
    }
}

/// Pre-order iterator over node ids.
pub struct PreorderIter<'a> {
    tree: &'a PtpTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        // Push children in reverse order so leftmost is visited first.
        for &child in self.tree.nodes[id].children.iter().rev() {
            self.stack.push(child);
        }
        Some(id)
    }
}

/// Post-order iterator over node ids.
pub struct PostorderIter {
    sequence: Vec<NodeId>,
    pos: usize,
}

impl Iterator for PostorderIter {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.sequence.get(self.pos)?;
        self.pos += 1;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> PtpTree {
        // ((A:1,B:1):5,(C:1,D:1):5);
        let mut tree = PtpTree::new();
        let ab = tree.add_child(0, "", 5.0).unwrap();
        let cd = tree.add_child(0, "", 5.0).unwrap();
        tree.add_child(ab, "A", 1.0).unwrap();
        tree.add_child(ab, "B", 1.0).unwrap();
        tree.add_child(cd, "C", 1.0).unwrap();
        tree.add_child(cd, "D", 1.0).unwrap();
        tree
    }

    #[test]
    fn new_tree_has_single_root() {
        let tree = PtpTree::new();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.leaf_count(), 1);
        assert!(tree.get_node(0).unwrap().is_root());
    }

    #[test]
    fn add_child_rejects_third_child() {
        let mut tree = sample_tree();
        assert!(tree.add_child(0, "E", 1.0).is_err());
        assert!(tree.add_child(99, "E", 1.0).is_err());
    }

    #[test]
    fn validate_accepts_binary_tree() {
        assert!(sample_tree().validate().is_ok());
    }

    #[test]
    fn validate_rejects_unary_node() {
        let mut tree = PtpTree::new();
        tree.add_child(0, "A", 1.0).unwrap();
        assert!(matches!(tree.validate(), Err(PtpError::MalformedTree(_))));
    }

    #[test]
    fn validate_rejects_negative_length() {
        let mut tree = sample_tree();
        tree.get_node_mut(3).unwrap().branch_length = -0.5;
        assert!(matches!(tree.validate(), Err(PtpError::MalformedTree(_))));
    }

    #[test]
    fn validate_rejects_broken_parent_link() {
        let mut tree = sample_tree();
        tree.get_node_mut(3).unwrap().parent = Some(2);
        assert!(matches!(tree.validate(), Err(PtpError::MalformedTree(_))));
    }

    #[test]
    fn annotate_counts_edges_and_leaves() {
        let mut tree = sample_tree();
        tree.annotate(0.0).unwrap();
        let root = tree.get_node(0).unwrap();
        assert_eq!(root.leaves, 4);
        assert_eq!(root.edge_count, 6);
        assert!((root.edgelen_sum - 14.0).abs() < 1e-12);
        let ab = tree.get_node(1).unwrap();
        assert_eq!(ab.edge_count, 2);
        assert!((ab.coal_logl - -2.0).abs() < 1e-12);
        assert_eq!(ab.spec_edge_count, 1);
        assert!((ab.spec_edgelen_sum - 5.0).abs() < 1e-12);
        let a = tree.get_node(3).unwrap();
        assert_eq!(a.spec_edge_count, 2);
        assert!((a.spec_edgelen_sum - 6.0).abs() < 1e-12);
    }

    #[test]
    fn annotate_skips_short_edges() {
        let mut tree = sample_tree();
        tree.annotate(1.0).unwrap();
        let (edges, length) = tree.edge_totals();
        assert_eq!(edges, 2);
        assert!((length - 10.0).abs() < 1e-12);
        assert!(!tree.is_counted(3));
        assert!(tree.is_counted(1));
    }

    #[test]
    fn annotate_assigns_slots_to_inner_nodes() {
        let mut tree = sample_tree();
        tree.annotate(0.0).unwrap();
        assert_eq!(tree.inner_nodes(), &[0, 1, 2]);
        assert_eq!(tree.get_node(2).unwrap().slot, Some(2));
        assert_eq!(tree.get_node(4).unwrap().slot, None);
    }

    #[test]
    fn subtree_leaves_by_id() {
        let tree = sample_tree();
        assert_eq!(tree.subtree_leaves(0).unwrap(), vec![3, 4, 5, 6]);
        assert_eq!(tree.subtree_leaves(2).unwrap(), vec![5, 6]);
        assert_eq!(tree.subtree_leaves(4).unwrap(), vec![4]);
        assert_eq!(tree.subtree_leaves(99), Err(PtpError::UnknownNode(99)));
    }

    #[test]
    fn preorder_traversal() {
        let tree = sample_tree();
        let order: Vec<NodeId> = tree.iter_preorder().collect();
        assert_eq!(order, vec![0, 1, 3, 4, 2, 5, 6]);
    }

    #[test]
    fn postorder_traversal() {
        let tree = sample_tree();
        let order: Vec<NodeId> = tree.iter_postorder().collect();
        assert_eq!(order, vec![3, 4, 1, 5, 6, 2, 0]);
    }

    #[test]
    fn find_leaves_by_label() {
        let tree = sample_tree();
        assert_eq!(tree.find_leaves(&["D", "A"]).unwrap(), vec![6, 3]);
        assert!(tree.find_leaves(&["Z"]).is_err());
    }

    #[test]
    fn crop_splices_out_parent() {
        let tree = sample_tree();
        // Remove A: B hangs directly below the root with length 5 + 1.
        let cropped = tree.crop(3).unwrap();
        assert_eq!(cropped.leaf_count(), 3);
        assert_eq!(cropped.leaf_names(), vec!["B", "C", "D"]);
        let b = cropped.find_leaves(&["B"]).unwrap()[0];
        assert_eq!(cropped.get_node(b).unwrap().parent, Some(cropped.root()));
        assert!((cropped.get_node(b).unwrap().branch_length - 6.0).abs() < 1e-12);
    }

    #[test]
    fn crop_below_root_promotes_sibling() {
        let tree = sample_tree();
        let cropped = tree.crop(1).unwrap();
        assert_eq!(cropped.leaf_names(), vec!["C", "D"]);
        assert_eq!(cropped.node_count(), 3);
        assert_eq!(cropped.get_node(cropped.root()).unwrap().branch_length, 0.0);
    }

    #[test]
    fn crop_root_is_error() {
        assert!(sample_tree().crop(0).is_err());
        assert!(matches!(sample_tree().crop(42), Err(PtpError::UnknownNode(42))));
    }

    #[test]
    fn species_follow_process_tags() {
        let mut tree = sample_tree();
        tree.annotate(0.0).unwrap();
        let mut tags = vec![Process::Coalescent; tree.node_count()];
        tags[0] = Process::Speciation;
        tree.set_processes(&tags).unwrap();
        assert!(tree.validate_delimitation().is_ok());
        assert_eq!(tree.species(), vec![vec![3, 4], vec![5, 6]]);
    }

    #[test]
    fn speciation_below_coalescent_is_invalid() {
        let mut tree = sample_tree();
        let mut tags = vec![Process::Coalescent; tree.node_count()];
        tags[1] = Process::Speciation;
        tree.set_processes(&tags).unwrap();
        assert!(tree.validate_delimitation().is_err());
    }

    #[test]
    fn unassigned_tags_are_invalid() {
        let tree = sample_tree();
        assert!(tree.validate_delimitation().is_err());
    }

    #[test]
    fn summary_format() {
        let mut tree = sample_tree();
        tree.annotate(0.0).unwrap();
        assert_eq!(
            tree.summary(),
            "PtpTree: 7 nodes (4 leaves), 6 counted edges, length 14.000000"
        );
    }
}
