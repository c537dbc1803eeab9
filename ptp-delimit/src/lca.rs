//! Lowest common ancestor queries in constant time.
//!
//! The tree is reduced to its Euler tour (every node listed each time the
//! walk enters or returns to it) with the depth of each tour position. The
//! LCA of two nodes is the shallowest node in the tour between their first
//! occurrences, answered with a sparse table of range minima.

use ptp_core::{PtpError, Result};

use crate::tree::{NodeId, PtpTree};

/// Preprocessed LCA index for one tree.
///
/// Node ids refer to the tree the index was built from; rebuild after the
/// tree is replaced (e.g. by [`PtpTree::crop`]).
#[derive(Debug, Clone)]
pub struct Lca {
    tour: Vec<NodeId>,
    depth: Vec<usize>,
    first: Vec<usize>,
    /// `table[k][i]` is the tour position of the shallowest node in
    /// `tour[i .. i + 2^k]`.
    table: Vec<Vec<usize>>,
}

impl Lca {
    /// Build the Euler tour and sparse table.
    pub fn new(tree: &PtpTree) -> Self {
        let n = tree.node_count();
        let mut tour = Vec::with_capacity(2 * n);
        let mut depth = Vec::with_capacity(2 * n);
        let mut first = vec![usize::MAX; n];

        // (node, depth, index of the next child to descend into); a node is
        // recorded on entry and again after each child returns.
        let mut stack: Vec<(NodeId, usize, usize)> = vec![(tree.root(), 0, 0)];
        while let Some(top) = stack.last_mut() {
            let (id, d, next) = *top;
            if first[id] == usize::MAX {
                first[id] = tour.len();
            }
            tour.push(id);
            depth.push(d);
            match tree.node(id).children.get(next) {
                Some(&child) => {
                    top.2 += 1;
                    stack.push((child, d + 1, 0));
                }
                None => {
                    stack.pop();
                }
            }
        }

        let table = build_sparse_table(&depth);
        Self {
            tour,
            depth,
            first,
            table,
        }
    }

    /// Number of nodes covered by the index.
    pub fn node_count(&self) -> usize {
        self.first.len()
    }

    /// First tour position of `id`; nodes the walk from the root never
    /// reached are unknown.
    fn position(&self, id: NodeId) -> Result<usize> {
        self.first
            .get(id)
            .copied()
            .filter(|&pos| pos != usize::MAX)
            .ok_or(PtpError::UnknownNode(id))
    }

    /// Lowest common ancestor of `a` and `b`.
    pub fn lca(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let fa = self.position(a)?;
        let fb = self.position(b)?;
        let (lo, hi) = if fa <= fb { (fa, fb) } else { (fb, fa) };
        Ok(self.tour[self.range_min(lo, hi)])
    }

    /// Lowest common ancestor of every node in `ids`.
    pub fn lca_of(&self, ids: &[NodeId]) -> Result<NodeId> {
        let (&head, rest) = ids
            .split_first()
            .ok_or_else(|| PtpError::InvalidInput("LCA of an empty node list".into()))?;
        self.position(head)?;
        rest.iter().try_fold(head, |acc, &id| self.lca(acc, id))
    }

    /// Tour position of the shallowest node in `tour[lo..=hi]`.
    fn range_min(&self, lo: usize, hi: usize) -> usize {
        let len = hi - lo + 1;
        let k = (usize::BITS - 1 - len.leading_zeros()) as usize;
        let left = self.table[k][lo];
        let right = self.table[k][hi + 1 - (1 << k)];
        if self.depth[left] <= self.depth[right] {
            left
        } else {
            right
        }
    }
}

fn build_sparse_table(depth: &[usize]) -> Vec<Vec<usize>> {
    let m = depth.len();
    let mut table: Vec<Vec<usize>> = vec![(0..m).collect()];
    let mut k = 1;
    while (1 << k) <= m {
        let half = 1 << (k - 1);
        let prev = &table[k - 1];
        let row: Vec<usize> = (0..=m - (1 << k))
            .map(|i| {
                let (l, r) = (prev[i], prev[i + half]);
                if depth[l] <= depth[r] {
                    l
                } else {
                    r
                }
            })
            .collect();
        table.push(row);
        k += 1;
    }
    table
}

/// Node whose subtree is exactly spanned by the outgroup `labels`.
///
/// Returns the LCA of the labelled leaves; cropping it removes the outgroup
/// from the tree.
pub fn outgroup_root(tree: &PtpTree, labels: &[&str]) -> Result<NodeId> {
    let leaves = tree.find_leaves(labels)?;
    Lca::new(tree).lca_of(&leaves)
}
