//! Shared primitives for the PTP species delimitation crates.
//!
//! - **Error types** — [`PtpError`] and [`Result`] for structured error handling
//! - **Traits** — [`Scored`] and [`Summarizable`], implemented by trees and
//!   delimitation results

pub mod error;
pub mod traits;

pub use error::{PtpError, Result};
pub use traits::*;
