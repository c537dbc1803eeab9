//! Multi-chain Metropolis sampler over delimitations.
//!
//! Each step picks an inner node uniformly at random and flips its process
//! tag. A flip that would disconnect the speciation crown (turning a node
//! into speciation below a coalescent parent, or turning a node coalescent
//! above a speciation child) is rejected outright, which keeps the proposal
//! symmetric. Score changes are applied incrementally: a flip only moves the
//! two child edges between the speciation and coalescent populations and
//! swaps one species for two (or two for one).
//!
//! Chains are independent and run on the rayon pool when the `parallel`
//! feature is enabled. After all chains finish, per-node speciation support
//! and the credible delimitation are derived from the recorded samples.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ptp_core::{PtpError, Result, Summarizable};

use crate::config::{DelimitConfig, PtpMethod, StartPolicy};
use crate::dp::DpOptimizer;
use crate::likelihood::{log_likelihood, DelimitationScore};
use crate::random::RandomGenerator;
use crate::tree::{NodeId, Process, PtpTree};

/// One recorded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceRow {
    pub log_likelihood: f64,
    pub species_count: usize,
}

impl fmt::Display for TraceRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{}", self.log_likelihood, self.species_count)
    }
}

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    Initializing,
    BurnIn,
    Sampling,
    Finished,
}

/// Metropolis acceptance of a move changing the log score by `log_ratio`.
pub fn metropolis_accept<R: Rng + ?Sized>(log_ratio: f64, rng: &mut R) -> bool {
    if log_ratio >= 0.0 {
        true
    } else {
        rng.gen::<f64>() < log_ratio.exp()
    }
}

/// Effective sample size of an autocorrelated trace.
///
/// Sums the autocorrelation up to the first negative lag.
pub fn effective_sample_size(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return n as f64;
    }
    let (Ok(mean), Ok(var)) = (ptp_stats::mean(values), ptp_stats::variance(values, 0)) else {
        return n as f64;
    };
    if var < 1e-30 {
        return n as f64;
    }

    let mut sum_rho = 0.0;
    for lag in 1..n {
        let mut rho = 0.0;
        for i in 0..(n - lag) {
            rho += (values[i] - mean) * (values[i + lag] - mean);
        }
        rho /= n as f64 * var;

        if rho < 0.0 {
            break;
        }
        sum_rho += rho;
    }

    let ess = n as f64 / (1.0 + 2.0 * sum_rho);
    ess.max(1.0)
}

/// Mutable state of one chain.
#[derive(Debug, Clone)]
pub struct ChainState {
    processes: Vec<Process>,
    spec_edge_count: usize,
    spec_edgelen_sum: f64,
    coal_multi_logl: f64,
    species_count: usize,
    score: f64,
    step: usize,
    accepted: usize,
    phase: ChainPhase,
    rng: StdRng,
}

impl ChainState {
    /// Start a chain from `processes` on an annotated tree.
    pub fn new(tree: &PtpTree, processes: Vec<Process>, method: PtpMethod, rng: StdRng) -> Result<Self> {
        let stats = DelimitationScore::evaluate(tree, &processes)?;
        Ok(Self {
            spec_edge_count: stats.spec_edge_count,
            spec_edgelen_sum: stats.spec_edgelen_sum,
            coal_multi_logl: stats.coal_multi_logl,
            species_count: stats.species_count(),
            score: stats.score(method),
            processes,
            step: 0,
            accepted: 0,
            phase: ChainPhase::Initializing,
            rng,
        })
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn species_count(&self) -> usize {
        self.species_count
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn phase(&self) -> ChainPhase {
        self.phase
    }

    fn row(&self) -> TraceRow {
        TraceRow {
            log_likelihood: self.score,
            species_count: self.species_count,
        }
    }

    /// One proposal and its Metropolis decision. Returns whether the move
    /// was accepted.
    pub fn advance(&mut self, tree: &PtpTree, method: PtpMethod) -> bool {
        self.step += 1;
        let inner = tree.inner_nodes();
        if inner.is_empty() {
            return false;
        }
        let id = inner[self.rng.gen_range(0..inner.len())];
        let node = tree.node(id);
        let Some((left, right)) = node.pair() else {
            return false;
        };

        let to_speciation = match self.processes[id] {
            Process::Coalescent => {
                let crown = node
                    .parent
                    .map_or(true, |p| self.processes[p] == Process::Speciation);
                if !crown {
                    return false;
                }
                true
            }
            Process::Speciation => {
                if self.processes[left] == Process::Speciation
                    || self.processes[right] == Process::Speciation
                {
                    return false;
                }
                false
            }
            Process::Unassigned => return false,
        };

        let mut edges = 0;
        let mut length = 0.0;
        for child in [left, right] {
            if tree.is_counted(child) {
                edges += 1;
                length += tree.node(child).branch_length;
            }
        }
        let split = tree.node(left).coal_logl + tree.node(right).coal_logl - node.coal_logl;
        let (spec_edge_count, spec_edgelen_sum, coal_multi_logl, species_count) = if to_speciation {
            (
                self.spec_edge_count + edges,
                self.spec_edgelen_sum + length,
                self.coal_multi_logl + split,
                self.species_count + 1,
            )
        } else {
            (
                self.spec_edge_count - edges,
                self.spec_edgelen_sum - length,
                self.coal_multi_logl - split,
                self.species_count - 1,
            )
        };
        let proposed = score_of(tree, method, spec_edge_count, spec_edgelen_sum, coal_multi_logl);

        if !metropolis_accept(proposed - self.score, &mut self.rng) {
            return false;
        }
        self.processes[id] = if to_speciation {
            Process::Speciation
        } else {
            Process::Coalescent
        };
        self.spec_edge_count = spec_edge_count;
        self.spec_edgelen_sum = spec_edgelen_sum;
        self.coal_multi_logl = coal_multi_logl;
        self.species_count = species_count;
        self.score = proposed;
        self.accepted += 1;
        true
    }
}

fn score_of(
    tree: &PtpTree,
    method: PtpMethod,
    spec_edge_count: usize,
    spec_edgelen_sum: f64,
    coal_multi_logl: f64,
) -> f64 {
    let spec = log_likelihood(spec_edge_count, spec_edgelen_sum);
    match method {
        PtpMethod::Multi => spec + coal_multi_logl,
        PtpMethod::Single => {
            let (total_count, total_sum) = tree.edge_totals();
            spec + log_likelihood(total_count - spec_edge_count, total_sum - spec_edgelen_sum)
        }
    }
}

/// Convergence diagnostics of one chain.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainDiagnostics {
    pub acceptance_rate: f64,
    /// Mean recorded log-likelihood; `None` without samples.
    pub mean_logl: Option<f64>,
    pub ess: f64,
}

/// Output of one finished chain.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainResult {
    pub chain: usize,
    pub seed: u64,
    pub trace: Vec<TraceRow>,
    /// Speciation count per inner-node slot over the recorded samples.
    pub tally: Vec<usize>,
    pub diagnostics: ChainDiagnostics,
    /// Tags at the last step.
    pub final_processes: Vec<Process>,
    pub final_score: f64,
}

impl ChainResult {
    pub fn samples(&self) -> usize {
        self.trace.len()
    }
}

/// Aggregated result of all chains.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct McmcSummary {
    pub method: PtpMethod,
    pub chains: Vec<ChainResult>,
    /// Fraction of samples in which each node was speciation, by `NodeId`.
    /// Always 0 for leaves.
    pub support: Vec<f64>,
    /// Tags of the credible delimitation.
    pub credible: Vec<Process>,
    pub credible_species_count: usize,
    /// Lowest and highest recorded log-likelihood over all chains.
    pub logl_bounds: Option<(f64, f64)>,
    /// Mean over inner nodes of the standard deviation of support across
    /// chains; 0 for a single chain.
    pub support_std_dev: f64,
}

impl McmcSummary {
    pub fn total_samples(&self) -> usize {
        self.chains.iter().map(ChainResult::samples).sum()
    }
}

impl Summarizable for McmcSummary {
    fn summary(&self) -> String {
        let bounds = match self.logl_bounds {
            Some((lo, hi)) => format!("logl [{:.6}, {:.6}]", lo, hi),
            None => "no samples".to_string(),
        };
        format!(
            "MCMC: {} chains, {} samples, {}, credible delimitation {} species, support sd {:.6}",
            self.chains.len(),
            self.total_samples(),
            bounds,
            self.credible_species_count,
            self.support_std_dev
        )
    }
}

/// Runs the configured number of chains and aggregates them.
#[derive(Debug, Clone)]
pub struct Sampler {
    config: DelimitConfig,
}

impl Sampler {
    pub fn new(config: &DelimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &DelimitConfig {
        &self.config
    }

    /// Run every chain, then write the credible delimitation into `tree`.
    pub fn run(&self, tree: &mut PtpTree) -> Result<McmcSummary> {
        tree.ensure_annotated(self.config.min_branch_length)?;
        if tree.inner_nodes().is_empty() {
            return Err(PtpError::InvalidInput(
                "tree has a single leaf; nothing to sample".into(),
            ));
        }

        let start = match self.config.mcmc.start {
            StartPolicy::Optimal => {
                let ml = DpOptimizer::new(&self.config)?.optimize(tree)?;
                Some(ml.processes)
            }
            StartPolicy::Null | StartPolicy::Random => None,
        };

        let shared: &PtpTree = tree;
        let n_chains = self.config.mcmc.chains;

        #[cfg(feature = "parallel")]
        let results: Vec<Result<ChainResult>> = {
            use rayon::prelude::*;
            (0..n_chains)
                .into_par_iter()
                .map(|c| self.run_chain(shared, c, start.as_deref()))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<ChainResult>> = (0..n_chains)
            .map(|c| self.run_chain(shared, c, start.as_deref()))
            .collect();

        let chains = results.into_iter().collect::<Result<Vec<_>>>()?;
        let summary = self.aggregate(shared, chains)?;
        tree.set_processes(&summary.credible)?;

        tracing::info!(
            chains = summary.chains.len(),
            samples = summary.total_samples(),
            credible_species = summary.credible_species_count,
            support_std_dev = summary.support_std_dev,
            "MCMC sampling finished"
        );
        Ok(summary)
    }

    /// Run chain `chain` on an annotated tree.
    ///
    /// `start` overrides the configured start policy with fixed tags.
    pub fn run_chain(
        &self,
        tree: &PtpTree,
        chain: usize,
        start: Option<&[Process]>,
    ) -> Result<ChainResult> {
        tree.require_annotated()?;
        let method = self.config.method;
        let mcmc = &self.config.mcmc;
        let seed = self.config.seed.wrapping_add(chain as u64);
        let mut rng = StdRng::seed_from_u64(seed);

        let processes = match (start, mcmc.start) {
            (Some(tags), _) => tags.to_vec(),
            (None, StartPolicy::Random) => {
                RandomGenerator::from_config(tree, &self.config)?
                    .draw(tree, method, &mut rng)?
                    .processes
            }
            (None, _) => vec![Process::Coalescent; tree.node_count()],
        };
        let mut state = ChainState::new(tree, processes, method, rng)?;
        tracing::debug!(chain, seed, start_score = state.score(), "chain initialized");

        let inner = tree.inner_nodes();
        let expected = (mcmc.runs - mcmc.burnin) / mcmc.sample_every;
        let mut trace = Vec::with_capacity(expected);
        let mut tally = vec![0usize; inner.len()];
        state.phase = if mcmc.burnin > 0 {
            ChainPhase::BurnIn
        } else {
            ChainPhase::Sampling
        };

        for step in 1..=mcmc.runs {
            state.advance(tree, method);
            if step <= mcmc.burnin {
                continue;
            }
            state.phase = ChainPhase::Sampling;
            if (step - mcmc.burnin) % mcmc.sample_every != 0 {
                continue;
            }
            trace.push(state.row());
            for (slot, &id) in inner.iter().enumerate() {
                if state.processes[id] == Process::Speciation {
                    tally[slot] += 1;
                }
            }
        }
        state.phase = ChainPhase::Finished;

        let logls: Vec<f64> = trace.iter().map(|r| r.log_likelihood).collect();
        let diagnostics = ChainDiagnostics {
            acceptance_rate: state.accepted as f64 / mcmc.runs as f64,
            mean_logl: ptp_stats::mean(&logls).ok(),
            ess: effective_sample_size(&logls),
        };
        tracing::debug!(
            chain,
            samples = trace.len(),
            acceptance_rate = diagnostics.acceptance_rate,
            ess = diagnostics.ess,
            "chain finished"
        );

        Ok(ChainResult {
            chain,
            seed,
            trace,
            tally,
            diagnostics,
            final_score: state.score,
            final_processes: state.processes,
        })
    }

    fn aggregate(&self, tree: &PtpTree, chains: Vec<ChainResult>) -> Result<McmcSummary> {
        let inner: &[NodeId] = tree.inner_nodes();
        let total: usize = chains.iter().map(ChainResult::samples).sum();
        if total == 0 {
            tracing::warn!("no samples recorded; support is zero everywhere");
        }

        let mut support = vec![0.0; tree.node_count()];
        if total > 0 {
            for (slot, &id) in inner.iter().enumerate() {
                let count: usize = chains.iter().map(|c| c.tally[slot]).sum();
                support[id] = count as f64 / total as f64;
            }
        }

        let support_std_dev = if chains.len() > 1 && !inner.is_empty() {
            let mut acc = 0.0;
            for slot in 0..inner.len() {
                let per_chain: Vec<f64> = chains
                    .iter()
                    .map(|c| {
                        if c.samples() == 0 {
                            0.0
                        } else {
                            c.tally[slot] as f64 / c.samples() as f64
                        }
                    })
                    .collect();
                acc += ptp_stats::std_dev(&per_chain, 1)?;
            }
            acc / inner.len() as f64
        } else {
            0.0
        };

        let credible = credible_delimitation(tree, &support, self.config.mcmc.credible);
        let credible_species_count = credible
            .iter()
            .filter(|&&p| p == Process::Speciation)
            .count()
            + 1;

        let logl_bounds = chains
            .iter()
            .flat_map(|c| c.trace.iter().map(|r| r.log_likelihood))
            .fold(None, |acc: Option<(f64, f64)>, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            });

        Ok(McmcSummary {
            method: self.config.method,
            chains,
            support,
            credible,
            credible_species_count,
            logl_bounds,
            support_std_dev,
        })
    }
}

/// Inner nodes whose support reaches `threshold`, kept only while their
/// parent is kept too.
pub fn credible_delimitation(tree: &PtpTree, support: &[f64], threshold: f64) -> Vec<Process> {
    let mut processes = vec![Process::Coalescent; tree.node_count()];
    for id in tree.iter_preorder() {
        let node = tree.node(id);
        if node.is_leaf() || support[id] < threshold {
            continue;
        }
        let crown = node
            .parent
            .map_or(true, |p| processes[p] == Process::Speciation);
        if crown {
            processes[id] = Process::Speciation;
        }
    }
    processes
}
