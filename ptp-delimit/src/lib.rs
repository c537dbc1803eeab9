//! Species delimitation with the Poisson Tree Process.
//!
//! - **Tree model** — [`PtpTree`], a rooted binary arena tree annotated with
//!   per-subtree edge statistics; Newick reading and writing in [`newick`]
//! - **Likelihood** — exponential branch-length log-likelihoods, the
//!   likelihood-ratio test against the one-species null model, and AIC
//! - **ML delimitation** — [`DpOptimizer`], dynamic programming over
//!   speciation edge counts, single-rate (PTP) or multi-rate (mPTP)
//! - **Bayesian support** — [`Sampler`], independent Metropolis chains with
//!   per-node speciation support and a credible delimitation
//! - **Random delimitations** — [`random_delimitation`], uniform over valid
//!   delimitations, and its closed-form expected species count
//! - **Outgroups** — [`Lca`] queries and [`PtpTree::crop`]
//!
//! ```
//! use ptp_delimit::{newick, DelimitConfig, DpOptimizer};
//!
//! let mut tree = newick::parse("((A:1,B:1):5,(C:1,D:1):5);").unwrap();
//! let config = DelimitConfig::default().with_min_branch_length(0.0);
//! let ml = DpOptimizer::new(&config).unwrap().optimize(&mut tree).unwrap();
//! assert_eq!(ml.species_count, 2);
//! ```

pub mod config;
pub mod dp;
pub mod lca;
pub mod likelihood;
pub mod mcmc;
pub mod newick;
pub mod random;
pub mod tree;

pub use config::{DelimitConfig, McmcConfig, PtpMethod, StartPolicy};
pub use dp::{ChildChoice, DpEntry, DpOptimizer, MlDelimitation};
pub use lca::{outgroup_root, Lca};
pub use likelihood::{aic, log_likelihood, lrt, lrt_at, LrtOutcome, LrtResult};
pub use mcmc::{ChainResult, McmcSummary, Sampler, TraceRow};
pub use random::{
    expected_species_count, log_delimitation_count, random_delimitation, RandomDelimitation,
    RandomGenerator,
};
pub use tree::{Node, NodeId, Process, PtpTree};
