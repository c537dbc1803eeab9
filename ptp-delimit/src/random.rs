//! Random delimitations drawn top-down from the root.
//!
//! Starting at the root, each reached internal node becomes a speciation
//! node with a per-node probability and passes the walk on to its children;
//! otherwise it starts a species. Leaves always start a species.
//!
//! By default the probabilities make every valid delimitation equally
//! likely. With `c(leaf) = 1` and `c(u) = 1 + c(left)·c(right)` counting the
//! delimitations of a subtree whose root is reachable, node `u` becomes
//! speciation with probability `c(left)·c(right) / c(u)`. Counts grow doubly
//! exponentially with depth, so they are kept as logarithms.
//!
//! A fixed bias (the same probability at every node) is available as an
//! alternative through [`RandomGenerator::biased`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ptp_core::{PtpError, Result, Scored};

use crate::config::{DelimitConfig, PtpMethod};
use crate::likelihood::DelimitationScore;
use crate::tree::{NodeId, Process, PtpTree};

/// One random delimitation and its statistics.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomDelimitation {
    pub species_count: usize,
    pub coal_edge_count: usize,
    pub coal_edgelen_sum: f64,
    pub spec_edge_count: usize,
    pub spec_edgelen_sum: f64,
    pub coal_multi_logl: f64,
    /// Log-likelihood under the method it was drawn for.
    pub score: f64,
    pub processes: Vec<Process>,
}

impl Scored for RandomDelimitation {
    fn score(&self) -> f64 {
        self.score
    }
}

/// Natural log of `c(u)` for every node, indexed by `NodeId`.
fn log_counts(tree: &PtpTree) -> Vec<f64> {
    let mut log_count: Vec<f64> = vec![0.0; tree.node_count()];
    for id in tree.iter_postorder() {
        if let Some((left, right)) = tree.node(id).pair() {
            let a = log_count[left] + log_count[right];
            // ln(1 + e^a) without overflow.
            log_count[id] = if a > 0.0 {
                a + (-a).exp().ln_1p()
            } else {
                a.exp().ln_1p()
            };
        }
    }
    log_count
}

/// Natural log of the number of valid delimitations of `tree`.
pub fn log_delimitation_count(tree: &PtpTree) -> f64 {
    log_counts(tree)[tree.root()]
}

/// Per-node speciation probabilities for top-down sampling.
#[derive(Debug, Clone)]
pub struct RandomGenerator {
    /// Probability that a reached node becomes speciation; 0 for leaves.
    speciation_prob: Vec<f64>,
}

impl RandomGenerator {
    /// Every valid delimitation of `tree` equally likely.
    pub fn uniform(tree: &PtpTree) -> Self {
        let log_count = log_counts(tree);
        let speciation_prob = tree
            .nodes()
            .iter()
            .map(|node| match node.pair() {
                None => 0.0,
                Some((left, right)) => {
                    let a = log_count[left] + log_count[right];
                    1.0 / (1.0 + (-a).exp())
                }
            })
            .collect();
        Self { speciation_prob }
    }

    /// Every reached internal node becomes speciation with probability
    /// `bias`.
    pub fn biased(tree: &PtpTree, bias: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&bias) {
            return Err(PtpError::InvalidInput(format!(
                "bias must be in [0, 1], got {}",
                bias
            )));
        }
        let speciation_prob = tree
            .nodes()
            .iter()
            .map(|node| if node.is_leaf() { 0.0 } else { bias })
            .collect();
        Ok(Self { speciation_prob })
    }

    /// Uniform unless the configuration sets a bias.
    pub fn from_config(tree: &PtpTree, config: &DelimitConfig) -> Result<Self> {
        match config.random_bias {
            None => Ok(Self::uniform(tree)),
            Some(bias) => Self::biased(tree, bias),
        }
    }

    /// Speciation probability of node `id` once the walk reaches it.
    pub fn speciation_probability(&self, id: NodeId) -> Option<f64> {
        self.speciation_prob.get(id).copied()
    }

    fn check_tree(&self, tree: &PtpTree) -> Result<()> {
        if self.speciation_prob.len() != tree.node_count() {
            return Err(PtpError::InvalidInput(format!(
                "generator built for {} nodes, tree has {}",
                self.speciation_prob.len(),
                tree.node_count()
            )));
        }
        Ok(())
    }

    /// Draw one delimitation of an annotated tree.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        tree: &PtpTree,
        method: PtpMethod,
        rng: &mut R,
    ) -> Result<RandomDelimitation> {
        self.check_tree(tree)?;
        let mut processes = vec![Process::Coalescent; tree.node_count()];
        let mut stack = vec![tree.root()];
        while let Some(id) = stack.pop() {
            if let Some((left, right)) = tree.node(id).pair() {
                if rng.gen::<f64>() < self.speciation_prob[id] {
                    processes[id] = Process::Speciation;
                    stack.push(right);
                    stack.push(left);
                }
            }
        }

        let stats = DelimitationScore::evaluate(tree, &processes)?;
        Ok(RandomDelimitation {
            species_count: stats.species_count(),
            coal_edge_count: stats.coal_edge_count,
            coal_edgelen_sum: stats.coal_edgelen_sum,
            spec_edge_count: stats.spec_edge_count,
            spec_edgelen_sum: stats.spec_edgelen_sum,
            coal_multi_logl: stats.coal_multi_logl,
            score: stats.score(method),
            processes,
        })
    }

    /// Expected species count of [`draw`](Self::draw).
    ///
    /// `E(leaf) = 1`, `E(u) = (1 − p_u) + p_u·(E(left) + E(right))`.
    pub fn expected_species_count(&self, tree: &PtpTree) -> Result<f64> {
        self.check_tree(tree)?;
        Ok(self.expected_unchecked(tree))
    }

    fn expected_unchecked(&self, tree: &PtpTree) -> f64 {
        let mut expected = vec![0.0; tree.node_count()];
        for id in tree.iter_postorder() {
            expected[id] = match tree.node(id).pair() {
                None => 1.0,
                Some((left, right)) => {
                    let p = self.speciation_prob[id];
                    (1.0 - p) + p * (expected[left] + expected[right])
                }
            };
        }
        expected[tree.root()]
    }
}

/// Draw a uniformly random valid delimitation of an annotated tree.
pub fn random_delimitation<R: Rng + ?Sized>(
    tree: &PtpTree,
    method: PtpMethod,
    rng: &mut R,
) -> Result<RandomDelimitation> {
    RandomGenerator::uniform(tree).draw(tree, method, rng)
}

/// Expected species count of a uniformly random valid delimitation.
pub fn expected_species_count(tree: &PtpTree) -> f64 {
    RandomGenerator::uniform(tree).expected_unchecked(tree)
}

/// Scores of `draws` random delimitations, seeded from `config.seed`.
///
/// Gives a reference distribution to compare the ML score against.
pub fn random_null_distribution(
    tree: &mut PtpTree,
    config: &DelimitConfig,
    draws: usize,
) -> Result<Vec<f64>> {
    config.validate()?;
    tree.ensure_annotated(config.min_branch_length)?;
    let generator = RandomGenerator::from_config(tree, config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let scores = (0..draws)
        .map(|_| generator.draw(tree, config.method, &mut rng).map(|d| d.score))
        .collect::<Result<Vec<f64>>>()?;
    tracing::debug!(draws, "random delimitation scores drawn");
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;
    use std::collections::HashMap;

    fn annotated(newick: &str) -> PtpTree {
        let mut tree = newick::parse(newick).unwrap();
        tree.annotate(0.0).unwrap();
        tree
    }

    const CATERPILLAR: &str = "((((A:1,B:1):1,C:2):1,D:3):1,(E:1,F:2):2);";
    const TWO_CLADES: &str = "((A:1,B:1):5,(C:1,D:1):5);";

    #[test]
    fn counts_valid_delimitations() {
        let tree = annotated(TWO_CLADES);
        assert!((log_delimitation_count(&tree) - 5f64.ln()).abs() < 1e-12);
        let tree = annotated("((A:1,B:1):1,C:1);");
        assert!((log_delimitation_count(&tree) - 3f64.ln()).abs() < 1e-12);
        let tree = annotated("A:1;");
        assert_eq!(log_delimitation_count(&tree), 0.0);
    }

    #[test]
    fn uniform_probabilities_follow_counts() {
        let tree = annotated(TWO_CLADES);
        let generator = RandomGenerator::uniform(&tree);
        // root: 4 of 5 delimitations split it; (A,B): 1 of 2.
        assert!((generator.speciation_probability(0).unwrap() - 0.8).abs() < 1e-12);
        assert!((generator.speciation_probability(1).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(generator.speciation_probability(2), Some(0.0));
        assert_eq!(generator.speciation_probability(99), None);
    }

    #[test]
    fn log_count_survives_deep_balanced_trees() {
        // Balanced tree with 2^12 leaves: the count overflows an f64.
        let mut layer: Vec<String> = (0..4096).map(|i| format!("t{}:1", i)).collect();
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| format!("({},{}):1", pair[0], pair[1]))
                .collect();
        }
        let tree = annotated(&format!("{};", layer[0]));
        let log_count = log_delimitation_count(&tree);
        assert!(log_count.is_finite() && log_count > 700.0);
        let mut rng = StdRng::seed_from_u64(4);
        let d = random_delimitation(&tree, PtpMethod::Multi, &mut rng).unwrap();
        assert!(d.species_count >= 1 && d.species_count <= 4096);
    }

    #[test]
    fn uniform_over_valid_delimitations() {
        let tree = annotated(TWO_CLADES);
        let mut rng = StdRng::seed_from_u64(17);
        let draws = 20_000;
        let mut seen: HashMap<Vec<Process>, usize> = HashMap::new();
        for _ in 0..draws {
            let d = random_delimitation(&tree, PtpMethod::Multi, &mut rng).unwrap();
            *seen.entry(d.processes).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 5);
        for (tags, count) in &seen {
            let freq = *count as f64 / draws as f64;
            assert!((freq - 0.2).abs() < 0.015, "{:?} drawn with frequency {}", tags, freq);
        }
    }

    #[test]
    fn bias_zero_is_null_delimitation() {
        let tree = annotated(CATERPILLAR);
        let mut rng = StdRng::seed_from_u64(1);
        let d = RandomGenerator::biased(&tree, 0.0)
            .unwrap()
            .draw(&tree, PtpMethod::Multi, &mut rng)
            .unwrap();
        assert_eq!(d.species_count, 1);
        assert_eq!(d.spec_edge_count, 0);
        assert!(d.processes.iter().all(|&p| p == Process::Coalescent));
    }

    #[test]
    fn bias_one_splits_every_leaf() {
        let tree = annotated(CATERPILLAR);
        let mut rng = StdRng::seed_from_u64(1);
        let d = RandomGenerator::biased(&tree, 1.0)
            .unwrap()
            .draw(&tree, PtpMethod::Multi, &mut rng)
            .unwrap();
        assert_eq!(d.species_count, tree.leaf_count());
        assert_eq!(d.coal_edge_count, 0);
    }

    #[test]
    fn rejects_bias_out_of_range() {
        let tree = annotated(CATERPILLAR);
        assert!(RandomGenerator::biased(&tree, 1.5).is_err());
    }

    #[test]
    fn generator_must_match_tree() {
        let small = annotated("((A:1,B:1):1,C:1);");
        let tree = annotated(CATERPILLAR);
        let generator = RandomGenerator::uniform(&small);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(generator.draw(&tree, PtpMethod::Multi, &mut rng).is_err());
        assert!(generator.expected_species_count(&tree).is_err());
    }

    #[test]
    fn draws_are_valid_delimitations() {
        let mut tree = annotated(CATERPILLAR);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = random_delimitation(&tree, PtpMethod::Single, &mut rng).unwrap();
            tree.set_processes(&d.processes).unwrap();
            assert!(tree.validate_delimitation().is_ok());
            assert_eq!(d.spec_edge_count + d.coal_edge_count, 10);
        }
    }

    #[test]
    fn expected_count_closed_form() {
        let tree = annotated("((A:1,B:1):1,C:1);");
        // Three delimitations with 1, 2 and 3 species.
        assert!((expected_species_count(&tree) - 2.0).abs() < 1e-12);
        // 1, 2, 3, 3 and 4 species.
        let tree = annotated(TWO_CLADES);
        assert!((expected_species_count(&tree) - 2.6).abs() < 1e-12);

        let tree = annotated("((A:1,B:1):1,C:1);");
        let biased = RandomGenerator::biased(&tree, 0.5).unwrap();
        // E(AB) = 0.5 + 0.5*2 = 1.5; E(root) = 0.5 + 0.5*(1.5 + 1) = 1.75
        assert!((biased.expected_species_count(&tree).unwrap() - 1.75).abs() < 1e-12);
    }

    #[test]
    fn mean_species_count_matches_expectation() {
        let tree = annotated(CATERPILLAR);
        let mut rng = StdRng::seed_from_u64(2024);
        let draws = 20_000;
        let total: usize = (0..draws)
            .map(|_| {
                random_delimitation(&tree, PtpMethod::Multi, &mut rng)
                    .unwrap()
                    .species_count
            })
            .sum();
        let mean = total as f64 / draws as f64;
        let expected = expected_species_count(&tree);
        assert!(
            (mean - expected).abs() < 0.1,
            "mean {} vs expected {}",
            mean,
            expected
        );
    }

    #[test]
    fn null_distribution_is_reproducible() {
        let mut tree = newick::parse(CATERPILLAR).unwrap();
        let config = DelimitConfig::default().with_min_branch_length(0.0).with_seed(9);
        let a = random_null_distribution(&mut tree, &config, 50).unwrap();
        let b = random_null_distribution(&mut tree, &config, 50).unwrap();
        assert_eq!(a.len(), 50);
        assert_eq!(a, b);
        let biased = config.with_random_bias(0.3);
        assert_eq!(random_null_distribution(&mut tree, &biased, 10).unwrap().len(), 10);
    }
}
