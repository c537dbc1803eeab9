//! Exponential branch-length likelihoods, the likelihood-ratio test against
//! the one-species null model, and AIC.
//!
//! Every process (speciation, or coalescence inside one species) models its
//! branch lengths as exponential draws at the maximum-likelihood rate, so a
//! population of `k` edges summing to `s` scores `k·(ln k − 1 − ln s)`.

use ptp_core::{PtpError, Result};
use ptp_stats::{ChiSquared, Distribution, Exponential};

use crate::config::PtpMethod;
use crate::tree::{check_delimitation, species_roots, NodeId, Process, PtpTree};

/// Score of a configuration that cannot be evaluated (e.g. positive edge
/// count with zero total length). Loses every comparison.
pub const INVALID_SCORE: f64 = f64::NEG_INFINITY;

/// Statistics below this are reported as violations instead of clamped.
const NEGATIVE_STAT_TOLERANCE: f64 = -1e-6;

/// Default significance level of the likelihood-ratio test.
pub const DEFAULT_ALPHA: f64 = 0.001;

/// Log-likelihood of `edge_count` exponential branch lengths summing to
/// `edgelen_sum`, at the fitted rate.
///
/// An empty population contributes 0.
pub fn log_likelihood(edge_count: usize, edgelen_sum: f64) -> f64 {
    match Exponential::fit(edge_count, edgelen_sum) {
        Some(dist) => dist.log_likelihood(edge_count, edgelen_sum),
        None if edge_count == 0 => 0.0,
        None => INVALID_SCORE,
    }
}

/// Result of a likelihood ratio test.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LrtResult {
    pub stat: f64,
    pub df: usize,
    pub p_value: f64,
    /// True if the null model is rejected at the test's significance level.
    pub reject: bool,
}

/// Outcome of testing a delimitation against the null model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LrtOutcome {
    Tested(LrtResult),
    /// The alternative scored clearly below the null model.
    Violated { stat: f64 },
    /// Nothing to test (single-leaf tree or non-finite scores).
    NotApplicable,
}

impl LrtOutcome {
    /// Run [`lrt_at`] and fold its diagnostics into the outcome.
    pub fn evaluate(null_logl: f64, alt_logl: f64, df: usize, alpha: f64) -> Self {
        if !(null_logl.is_finite() && alt_logl.is_finite()) {
            return LrtOutcome::NotApplicable;
        }
        match lrt_at(null_logl, alt_logl, df, alpha) {
            Ok(result) => LrtOutcome::Tested(result),
            Err(PtpError::NegativeStatistic(stat)) => {
                tracing::warn!(stat, "LRT statistic is negative; null model scores higher");
                LrtOutcome::Violated { stat }
            }
            Err(err) => {
                tracing::warn!(%err, "LRT could not be computed");
                LrtOutcome::NotApplicable
            }
        }
    }

    /// True only for a test that rejected the null model.
    pub fn rejects_null(&self) -> bool {
        matches!(self, LrtOutcome::Tested(r) if r.reject)
    }
}

/// Likelihood ratio test at the default significance level 0.001.
pub fn lrt(null_logl: f64, alt_logl: f64, df: usize) -> Result<LrtResult> {
    lrt_at(null_logl, alt_logl, df, DEFAULT_ALPHA)
}

/// Likelihood ratio test of `alt_logl` against `null_logl` with `df`
/// degrees of freedom.
///
/// The statistic `2·(alt − null)` is compared against the upper tail of a
/// chi-squared distribution. Tiny negative statistics are clamped to 0;
/// anything below `-1e-6` is returned as [`PtpError::NegativeStatistic`].
pub fn lrt_at(null_logl: f64, alt_logl: f64, df: usize, alpha: f64) -> Result<LrtResult> {
    let stat = 2.0 * (alt_logl - null_logl);
    if stat < NEGATIVE_STAT_TOLERANCE {
        return Err(PtpError::NegativeStatistic(stat));
    }
    let stat = stat.max(0.0);
    let p_value = ChiSquared::new(df as f64)?.sf(stat);
    Ok(LrtResult {
        stat,
        df,
        p_value,
        reject: p_value < alpha,
    })
}

/// Small-sample corrected AIC: `−2·logl + 2k`, plus `2k(k+1)/(n−k−1)` when
/// `n/k < 40`.
///
/// Infinite when the correction is undefined (`n ≤ k + 1`).
pub fn aic(logl: f64, k: usize, n: usize) -> f64 {
    let kf = k as f64;
    let nf = n as f64;
    let base = -2.0 * logl + 2.0 * kf;
    if k == 0 || nf / kf >= 40.0 {
        return base;
    }
    if nf > kf + 1.0 {
        base + 2.0 * kf * (kf + 1.0) / (nf - kf - 1.0)
    } else {
        f64::INFINITY
    }
}

/// Number of free parameters of a delimitation with `species` species.
pub fn parameter_count(method: PtpMethod, species: usize) -> usize {
    match method {
        PtpMethod::Single => 2,
        PtpMethod::Multi => species + 1,
    }
}

/// Degrees of freedom of the test against the one-species null model.
pub fn lrt_df(method: PtpMethod, species: usize) -> usize {
    match method {
        PtpMethod::Single => 1,
        PtpMethod::Multi => species,
    }
}

/// Edge statistics of one delimitation, from which both scores follow.
#[derive(Debug, Clone, PartialEq)]
pub struct DelimitationScore {
    pub species_roots: Vec<NodeId>,
    pub spec_edge_count: usize,
    pub spec_edgelen_sum: f64,
    pub coal_edge_count: usize,
    pub coal_edgelen_sum: f64,
    /// Sum of per-species coalescent log-likelihoods.
    pub coal_multi_logl: f64,
}

impl DelimitationScore {
    /// Score the delimitation given by `processes` on an annotated tree.
    pub fn evaluate(tree: &PtpTree, processes: &[Process]) -> Result<Self> {
        tree.require_annotated()?;
        check_delimitation(tree, processes)?;

        let mut spec_edge_count = 0;
        let mut spec_edgelen_sum = 0.0;
        for node in tree.nodes() {
            if let Some(p) = node.parent {
                if processes[p] == Process::Speciation && tree.is_counted(node.id) {
                    spec_edge_count += 1;
                    spec_edgelen_sum += node.branch_length;
                }
            }
        }
        let (total_count, total_sum) = tree.edge_totals();
        let roots = species_roots(tree, processes);
        let coal_multi_logl = roots.iter().map(|&r| tree.node(r).coal_logl).sum();

        Ok(Self {
            species_roots: roots,
            spec_edge_count,
            spec_edgelen_sum,
            coal_edge_count: total_count - spec_edge_count,
            coal_edgelen_sum: total_sum - spec_edgelen_sum,
            coal_multi_logl,
        })
    }

    pub fn species_count(&self) -> usize {
        self.species_roots.len()
    }

    pub fn spec_logl(&self) -> f64 {
        log_likelihood(self.spec_edge_count, self.spec_edgelen_sum)
    }

    /// One shared coalescent rate.
    pub fn single_score(&self) -> f64 {
        self.spec_logl() + log_likelihood(self.coal_edge_count, self.coal_edgelen_sum)
    }

    /// One coalescent rate per species.
    pub fn multi_score(&self) -> f64 {
        self.spec_logl() + self.coal_multi_logl
    }

    pub fn score(&self, method: PtpMethod) -> f64 {
        match method {
            PtpMethod::Single => self.single_score(),
            PtpMethod::Multi => self.multi_score(),
        }
    }
}

/// Log-likelihood of the whole tree as a single coalescent population.
pub fn null_logl(tree: &PtpTree) -> f64 {
    let (count, sum) = tree.edge_totals();
    log_likelihood(count, sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn sample() -> PtpTree {
        let mut tree = newick::parse("((A:1,B:1):5,(C:1,D:1):5);").unwrap();
        tree.annotate(0.0).unwrap();
        tree
    }

    #[test]
    fn log_likelihood_known_values() {
        assert_close(log_likelihood(2, 2.0), -2.0);
        assert_close(log_likelihood(6, 14.0), 6.0 * (6f64.ln() - 1.0 - 14f64.ln()));
    }

    #[test]
    fn log_likelihood_edge_cases() {
        assert_eq!(log_likelihood(0, 0.0), 0.0);
        assert_eq!(log_likelihood(0, 3.0), 0.0);
        assert_eq!(log_likelihood(3, 0.0), INVALID_SCORE);
    }

    #[test]
    fn lrt_statistic_and_df() {
        let r = lrt(-11.0, -9.0, 2).unwrap();
        assert_close(r.stat, 4.0);
        // Chi-squared with 2 df has survival exp(-x/2).
        assert!((r.p_value - (-2.0f64).exp()).abs() < 1e-6);
        assert!(!r.reject);
    }

    #[test]
    fn lrt_rejects_with_large_statistic() {
        let r = lrt(-200.0, -100.0, 1).unwrap();
        assert!(r.reject);
        assert!(r.p_value < 0.001);
    }

    #[test]
    fn lrt_custom_alpha() {
        let r = lrt_at(-11.0, -9.0, 2, 0.2).unwrap();
        assert!(r.reject);
    }

    #[test]
    fn lrt_clamps_tiny_negative() {
        let r = lrt(-10.0, -10.0 - 1e-9, 1).unwrap();
        assert_eq!(r.stat, 0.0);
        assert!(r.p_value > 0.99);
    }

    #[test]
    fn lrt_negative_statistic() {
        assert!(matches!(
            lrt(-10.0, -12.0, 1),
            Err(PtpError::NegativeStatistic(s)) if (s + 4.0).abs() < 1e-12
        ));
        assert_eq!(
            LrtOutcome::evaluate(-10.0, -12.0, 1, DEFAULT_ALPHA),
            LrtOutcome::Violated { stat: -4.0 }
        );
    }

    #[test]
    fn lrt_outcome_not_applicable() {
        let outcome = LrtOutcome::evaluate(-10.0, INVALID_SCORE, 1, DEFAULT_ALPHA);
        assert_eq!(outcome, LrtOutcome::NotApplicable);
        assert!(!outcome.rejects_null());
    }

    #[test]
    fn aic_with_and_without_correction() {
        // n/k >= 40: plain AIC.
        assert_close(aic(-100.0, 2, 80), 204.0);
        // n = 6, k = 2: 2*2*3/(6-2-1) = 4.
        assert_close(aic(-10.0, 2, 6), 28.0);
        assert_eq!(aic(-10.0, 3, 4), f64::INFINITY);
    }

    #[test]
    fn parameter_counts() {
        assert_eq!(parameter_count(PtpMethod::Single, 5), 2);
        assert_eq!(parameter_count(PtpMethod::Multi, 5), 6);
        assert_eq!(lrt_df(PtpMethod::Single, 5), 1);
        assert_eq!(lrt_df(PtpMethod::Multi, 5), 5);
    }

    #[test]
    fn null_delimitation_matches_null_logl() {
        let tree = sample();
        let tags = vec![Process::Coalescent; tree.node_count()];
        let score = DelimitationScore::evaluate(&tree, &tags).unwrap();
        assert_eq!(score.species_count(), 1);
        assert_close(score.single_score(), null_logl(&tree));
        assert_close(score.multi_score(), null_logl(&tree));
    }

    #[test]
    fn two_species_score() {
        let tree = sample();
        let mut tags = vec![Process::Coalescent; tree.node_count()];
        tags[0] = Process::Speciation;
        let score = DelimitationScore::evaluate(&tree, &tags).unwrap();
        let expected = 2.0 * (2f64.ln() - 1.0 - 10f64.ln()) - 4.0;
        assert_eq!(score.species_count(), 2);
        assert_eq!(score.spec_edge_count, 2);
        assert_close(score.multi_score(), expected);
        // Both species share the rate 1, so pooling changes nothing.
        assert_close(score.single_score(), expected);
    }

    #[test]
    fn evaluate_requires_annotation_and_valid_tags() {
        let tree = newick::parse("((A:1,B:1):5,(C:1,D:1):5);").unwrap();
        let tags = vec![Process::Coalescent; tree.node_count()];
        assert!(DelimitationScore::evaluate(&tree, &tags).is_err());

        let tree = sample();
        let mut tags = vec![Process::Coalescent; tree.node_count()];
        tags[3] = Process::Speciation;
        assert!(DelimitationScore::evaluate(&tree, &tags).is_err());
    }

    #[test]
    fn short_edges_are_ignored() {
        let mut tree = newick::parse("((A:1,B:1):5,(C:1,D:1):5);").unwrap();
        tree.annotate(1.0).unwrap();
        let mut tags = vec![Process::Coalescent; tree.node_count()];
        tags[0] = Process::Speciation;
        let score = DelimitationScore::evaluate(&tree, &tags).unwrap();
        assert_eq!(score.coal_edge_count, 0);
        assert_close(score.multi_score(), 2.0 * (2f64.ln() - 1.0 - 10f64.ln()));
    }
}
