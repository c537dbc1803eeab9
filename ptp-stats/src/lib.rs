//! Statistical helpers for the PTP species delimitation crates.
//!
//! - **Distributions** — [`Exponential`] branch-length model and the
//!   [`ChiSquared`] reference distribution of the likelihood-ratio test
//! - **Special functions** — [`ln_gamma`], [`gammainc`]
//! - **Descriptive statistics** — [`mean`], [`variance`], [`std_dev`]

pub mod descriptive;
pub mod distribution;

pub use descriptive::{mean, std_dev, variance};
pub use distribution::{gammainc, ln_gamma, ChiSquared, Distribution, Exponential};
