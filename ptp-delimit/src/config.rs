//! Run configuration for the ML optimizer, the random generator and the
//! MCMC sampler.
//!
//! One [`DelimitConfig`] value is built up front, validated once, and passed
//! by reference into [`DpOptimizer::new`](crate::dp::DpOptimizer::new) and
//! [`Sampler::new`](crate::mcmc::Sampler::new).

use ptp_core::{PtpError, Result};

/// Which coalescent model to score delimitations under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PtpMethod {
    /// One coalescent rate shared by all species (PTP).
    Single,
    /// One coalescent rate per species (mPTP).
    #[default]
    Multi,
}

/// Starting delimitation of every MCMC chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StartPolicy {
    /// All nodes coalescent: the whole tree is one species.
    #[default]
    Null,
    /// The maximum-likelihood delimitation found by the DP optimizer.
    Optimal,
    /// An independent random delimitation per chain.
    Random,
}

/// MCMC sampler configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct McmcConfig {
    /// Number of independent chains.
    pub chains: usize,
    /// Steps discarded before recording starts.
    pub burnin: usize,
    /// Total steps per chain, burn-in included.
    pub runs: usize,
    /// Record every `sample_every`-th step after burn-in.
    pub sample_every: usize,
    /// Support threshold of the credible delimitation.
    pub credible: f64,
    pub start: StartPolicy,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            chains: 2,
            burnin: 10_000,
            runs: 100_000,
            sample_every: 100,
            credible: 0.95,
            start: StartPolicy::Null,
        }
    }
}

/// Complete configuration of a delimitation run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DelimitConfig {
    /// Edges not longer than this are ignored by every likelihood.
    pub min_branch_length: f64,
    pub method: PtpMethod,
    /// Significance level of the likelihood-ratio test against the null model.
    pub p_value: f64,
    /// Base seed; chain `c` uses `seed + c`.
    pub seed: u64,
    /// Fixed probability that the random generator turns a reachable
    /// internal node into a speciation node. `None` draws uniformly over
    /// all valid delimitations.
    pub random_bias: Option<f64>,
    pub mcmc: McmcConfig,
}

impl Default for DelimitConfig {
    fn default() -> Self {
        Self {
            min_branch_length: 0.0001,
            method: PtpMethod::Multi,
            p_value: 0.001,
            seed: 42,
            random_bias: None,
            mcmc: McmcConfig::default(),
        }
    }
}

impl DelimitConfig {
    pub fn with_min_branch_length(mut self, min_branch_length: f64) -> Self {
        self.min_branch_length = min_branch_length;
        self
    }

    pub fn with_method(mut self, method: PtpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_p_value(mut self, p_value: f64) -> Self {
        self.p_value = p_value;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_random_bias(mut self, random_bias: f64) -> Self {
        self.random_bias = Some(random_bias);
        self
    }

    pub fn with_mcmc(mut self, mcmc: McmcConfig) -> Self {
        self.mcmc = mcmc;
        self
    }

    /// Check every parameter against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_branch_length >= 0.0 && self.min_branch_length.is_finite()) {
            return Err(PtpError::InvalidConfig(format!(
                "min_branch_length must be finite and >= 0, got {}",
                self.min_branch_length
            )));
        }
        if !(self.p_value > 0.0 && self.p_value < 1.0) {
            return Err(PtpError::InvalidConfig(format!(
                "p_value must be in (0, 1), got {}",
                self.p_value
            )));
        }
        if let Some(bias) = self.random_bias {
            if !(0.0..=1.0).contains(&bias) {
                return Err(PtpError::InvalidConfig(format!(
                    "random_bias must be in [0, 1], got {}",
                    bias
                )));
            }
        }
        let mcmc = &self.mcmc;
        if mcmc.chains == 0 {
            return Err(PtpError::InvalidConfig("at least one chain is required".into()));
        }
        if mcmc.sample_every == 0 {
            return Err(PtpError::InvalidConfig("sample_every must be >= 1".into()));
        }
        if mcmc.burnin >= mcmc.runs {
            return Err(PtpError::InvalidConfig(format!(
                "burnin ({}) must be smaller than runs ({})",
                mcmc.burnin, mcmc.runs
            )));
        }
        if !(0.0..=1.0).contains(&mcmc.credible) {
            return Err(PtpError::InvalidConfig(format!(
                "credible must be in [0, 1], got {}",
                mcmc.credible
            )));
        }
        Ok(())
    }
}
