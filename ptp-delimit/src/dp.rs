//! Maximum-likelihood delimitation by dynamic programming.
//!
//! Every node keeps a table indexed by the number `i` of speciation edges
//! inside its subtree. Entry `i` holds the best configuration of the subtree
//! with exactly `i` speciation edges, assuming the whole path from the root
//! down to the node is speciation. Entry 0 starts out as the configuration
//! in which the node itself starts a species.
//!
//! Tables are filled in postorder by combining every pair of filled child
//! entries, then the best root entry is backtracked into process tags.

use ptp_core::{PtpError, Result, Scored, Summarizable};

use crate::config::{DelimitConfig, PtpMethod};
use crate::likelihood::{
    aic, log_likelihood, lrt_df, null_logl, parameter_count, DelimitationScore, LrtOutcome,
    INVALID_SCORE,
};
use crate::tree::{Node, NodeId, Process, PtpTree};

/// How a speciation node's child is configured in a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildChoice {
    /// The child starts a species.
    Coalescent,
    /// The child is speciation, with this many speciation edges below it.
    Speciation(usize),
}

impl ChildChoice {
    /// Index of the referenced entry in the child's table.
    pub fn index(self) -> usize {
        match self {
            ChildChoice::Coalescent => 0,
            ChildChoice::Speciation(k) => k,
        }
    }
}

/// Best configuration of a subtree for one speciation edge count.
#[derive(Debug, Clone, PartialEq)]
pub struct DpEntry {
    pub score_single: f64,
    pub score_multi: f64,
    /// Total length of the speciation edges inside the subtree.
    pub spec_edgelen_sum: f64,
    /// Sum of the coalescent log-likelihoods of the species in the subtree.
    pub coal_multi_logl: f64,
    pub species_count: usize,
    /// `None` when the node starts a species.
    pub children: Option<[ChildChoice; 2]>,
}

impl DpEntry {
    fn start(node: &Node) -> Self {
        let spec_logl = log_likelihood(node.spec_edge_count, node.spec_edgelen_sum);
        Self {
            score_single: spec_logl + node.coal_logl,
            score_multi: spec_logl + node.coal_logl,
            spec_edgelen_sum: 0.0,
            coal_multi_logl: node.coal_logl,
            species_count: 1,
            children: None,
        }
    }

    pub fn score(&self, method: PtpMethod) -> f64 {
        match method {
            PtpMethod::Single => self.score_single,
            PtpMethod::Multi => self.score_multi,
        }
    }

    /// How a parent refers to this entry, stored at `index` of its table.
    fn as_choice(&self, index: usize) -> ChildChoice {
        match self.children {
            None => ChildChoice::Coalescent,
            Some(_) => ChildChoice::Speciation(index),
        }
    }

    /// Strictly better score, or an equal score with fewer species.
    fn beats(&self, other: &DpEntry, method: PtpMethod) -> bool {
        let (a, b) = (self.score(method), other.score(method));
        a > b || (a == b && self.species_count < other.species_count)
    }
}

/// Table of one node, indexed by speciation edge count.
pub type DpTable = Vec<Option<DpEntry>>;

/// Result of the ML search.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MlDelimitation {
    pub method: PtpMethod,
    /// Log-likelihood of the best delimitation.
    pub score: f64,
    /// Log-likelihood of the one-species null model.
    pub null_logl: f64,
    pub species_count: usize,
    pub spec_edge_count: usize,
    pub spec_edgelen_sum: f64,
    pub lrt: LrtOutcome,
    /// Corrected AIC of the best delimitation; `None` for a single leaf.
    pub aic: Option<f64>,
    /// Corrected AIC of the null model.
    pub null_aic: Option<f64>,
    /// Leaf ids of each species, in preorder of the species roots.
    pub species: Vec<Vec<NodeId>>,
    /// Process tag of every node.
    pub processes: Vec<Process>,
}

impl Scored for MlDelimitation {
    fn score(&self) -> f64 {
        self.score
    }
}

impl Summarizable for MlDelimitation {
    fn summary(&self) -> String {
        let method = match self.method {
            PtpMethod::Single => "single-rate",
            PtpMethod::Multi => "multi-rate",
        };
        let lrt = match &self.lrt {
            LrtOutcome::Tested(r) => format!("LRT p = {:.6}", r.p_value),
            LrtOutcome::Violated { stat } => format!("LRT violated (stat {:.6})", stat),
            LrtOutcome::NotApplicable => "LRT n/a".to_string(),
        };
        format!(
            "ML {} delimitation: {} species, logl {:.6} (null {:.6}), {}",
            method, self.species_count, self.score, self.null_logl, lrt
        )
    }
}

/// Dynamic-programming search for the maximum-likelihood delimitation.
#[derive(Debug, Clone)]
pub struct DpOptimizer {
    config: DelimitConfig,
}

impl DpOptimizer {
    pub fn new(config: &DelimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &DelimitConfig {
        &self.config
    }

    /// Fill the table of every node of an annotated tree, indexed by
    /// `NodeId`.
    pub fn tables(&self, tree: &PtpTree) -> Result<Vec<DpTable>> {
        self.fill(tree, self.config.method)
    }

    fn fill(&self, tree: &PtpTree, method: PtpMethod) -> Result<Vec<DpTable>> {
        tree.require_annotated()?;
        let mut tables: Vec<DpTable> = vec![Vec::new(); tree.node_count()];

        for id in tree.iter_postorder() {
            let node = tree.node(id);
            let mut table: DpTable = vec![None; node.edge_count + 1];
            table[0] = Some(DpEntry::start(node));

            if let Some((left, right)) = node.pair() {
                let mut edges = 0;
                let mut child_sum = 0.0;
                for child in [left, right] {
                    if tree.is_counted(child) {
                        edges += 1;
                        child_sum += tree.node(child).branch_length;
                    }
                }

                for (j, le) in tables[left].iter().enumerate() {
                    let Some(le) = le else { continue };
                    for (k, re) in tables[right].iter().enumerate() {
                        let Some(re) = re else { continue };
                        let i = j + k + edges;
                        let spec_sum = le.spec_edgelen_sum + re.spec_edgelen_sum + child_sum;
                        let coal_multi = le.coal_multi_logl + re.coal_multi_logl;
                        let spec_logl = log_likelihood(
                            node.spec_edge_count + i,
                            node.spec_edgelen_sum + spec_sum,
                        );
                        let candidate = DpEntry {
                            score_single: spec_logl
                                + log_likelihood(node.edge_count - i, node.edgelen_sum - spec_sum),
                            score_multi: spec_logl + coal_multi,
                            spec_edgelen_sum: spec_sum,
                            coal_multi_logl: coal_multi,
                            species_count: le.species_count + re.species_count,
                            children: Some([le.as_choice(j), re.as_choice(k)]),
                        };
                        match &table[i] {
                            Some(current) if !candidate.beats(current, method) => {}
                            _ => table[i] = Some(candidate),
                        }
                    }
                }
            }
            tables[id] = table;
        }
        Ok(tables)
    }

    /// Find the best delimitation and write its process tags into `tree`.
    pub fn optimize(&self, tree: &mut PtpTree) -> Result<MlDelimitation> {
        tree.ensure_annotated(self.config.min_branch_length)?;
        let method = self.config.method;
        let root = tree.root();

        if tree.node(root).is_leaf() {
            tracing::warn!("tree has a single leaf; nothing to delimit");
            let processes = vec![Process::Coalescent; tree.node_count()];
            tree.set_processes(&processes)?;
            return Ok(MlDelimitation {
                method,
                score: INVALID_SCORE,
                null_logl: INVALID_SCORE,
                species_count: 1,
                spec_edge_count: 0,
                spec_edgelen_sum: 0.0,
                lrt: LrtOutcome::NotApplicable,
                aic: None,
                null_aic: None,
                species: vec![vec![root]],
                processes,
            });
        }

        let tables = self.fill(tree, method)?;
        let best_index = best_root_index(&tables[root], method)?;
        tracing::debug!(
            entries = tables[root].iter().flatten().count(),
            best_index,
            "root table filled"
        );
        let mut processes = backtrack(tree, &tables, best_index)?;
        let mut counts = DelimitationScore::evaluate(tree, &processes)?;

        if method == PtpMethod::Multi {
            // Per-species rates never score a delimitation below one shared
            // rate, so the single-rate optimum bounds the multi-rate one.
            let single = self.fill(tree, PtpMethod::Single)?;
            let index = best_root_index(&single[root], PtpMethod::Single)?;
            let candidate = backtrack(tree, &single, index)?;
            let candidate_counts = DelimitationScore::evaluate(tree, &candidate)?;
            if candidate_counts.score(method) > counts.score(method) {
                tracing::debug!(
                    multi = counts.score(method),
                    single = candidate_counts.score(method),
                    "single-rate optimum scores higher under multi-rate"
                );
                processes = candidate;
                counts = candidate_counts;
            }
        }
        tree.set_processes(&processes)?;
        let score = counts.score(method);

        let species_count = counts.species_count();
        let null = null_logl(tree);
        let (n_edges, _) = tree.edge_totals();
        let lrt = LrtOutcome::evaluate(
            null,
            score,
            lrt_df(method, species_count),
            self.config.p_value,
        );
        let result = MlDelimitation {
            method,
            score,
            null_logl: null,
            species_count,
            spec_edge_count: counts.spec_edge_count,
            spec_edgelen_sum: counts.spec_edgelen_sum,
            lrt,
            aic: Some(aic(score, parameter_count(method, species_count), n_edges)),
            null_aic: Some(aic(null, 1, n_edges)),
            species: counts
                .species_roots
                .iter()
                .map(|&r| tree.leaves_below(r))
                .collect(),
            processes,
        };
        tracing::info!(
            species = result.species_count,
            score = result.score,
            null = result.null_logl,
            rejects_null = result.lrt.rejects_null(),
            "ML delimitation found"
        );
        Ok(result)
    }
}

/// Index of the best root entry under `method`.
fn best_root_index(root_table: &[Option<DpEntry>], method: PtpMethod) -> Result<usize> {
    root_table
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
        .fold(None::<(usize, &DpEntry)>, |acc, (i, e)| match acc {
            Some((_, cur)) if !e.beats(cur, method) => acc,
            _ => Some((i, e)),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| PtpError::Other("root table has no filled entry".into()))
}

/// Turn the chosen root entry into process tags, top-down.
fn backtrack(tree: &PtpTree, tables: &[DpTable], root_index: usize) -> Result<Vec<Process>> {
    let mut processes = vec![Process::Coalescent; tree.node_count()];
    let mut stack = vec![(tree.root(), root_index)];
    while let Some((id, index)) = stack.pop() {
        let entry = tables[id]
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| PtpError::Other(format!("missing entry {} at node {}", index, id)))?;
        let Some(choices) = entry.children else {
            continue;
        };
        let (left, right) = tree
            .node(id)
            .pair()
            .ok_or_else(|| PtpError::MalformedTree(format!("leaf {} marked speciation", id)))?;
        processes[id] = Process::Speciation;
        for (child, choice) in [(left, choices[0]), (right, choices[1])] {
            if let ChildChoice::Speciation(k) = choice {
                stack.push((child, k));
            }
        }
    }
    Ok(processes)
}
