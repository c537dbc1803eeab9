//! Probability distributions and numerical helpers.
//!
//! Provides the [`Distribution`] trait with the two distributions the PTP
//! model needs: [`Exponential`] for branch lengths and [`ChiSquared`] for
//! the likelihood-ratio test, plus the special functions behind them
//! ([`ln_gamma`], [`gammainc`], [`gammaincc`]).

use core::f64::consts::PI;

use ptp_core::{PtpError, Result};

// ── Numerical helpers ──────────────────────────────────────────────────────

/// Natural log of the gamma function via the Lanczos approximation (g=7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // Reflection formula: Γ(x) = π / (sin(πx) · Γ(1-x))
        let log_pi_over_sin = (PI / (PI * x).sin()).ln();
        log_pi_over_sin - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5; // g + 0.5
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

// ── Regularized incomplete gamma functions ────────────────────────────────

/// Regularized lower incomplete gamma function P(a, x) = γ(a, x) / Γ(a).
///
/// Uses the series expansion when x < a + 1 and the continued fraction
/// representation (computing Q = 1 - P) otherwise.
pub fn gammainc(a: f64, x: f64) -> Result<f64> {
    check_gamma_args(a, x)?;
    if x == 0.0 {
        return Ok(0.0);
    }
    if x < a + 1.0 {
        gammainc_series(a, x)
    } else {
        Ok(1.0 - gammainc_cf(a, x)?)
    }
}

/// Regularized upper incomplete gamma function Q(a, x) = 1 - P(a, x).
///
/// Computed directly from the continued fraction in the upper tail so that
/// small tail probabilities keep their precision.
pub fn gammaincc(a: f64, x: f64) -> Result<f64> {
    check_gamma_args(a, x)?;
    if x == 0.0 {
        return Ok(1.0);
    }
    if x < a + 1.0 {
        Ok(1.0 - gammainc_series(a, x)?)
    } else {
        gammainc_cf(a, x)
    }
}

fn check_gamma_args(a: f64, x: f64) -> Result<()> {
    if a <= 0.0 {
        return Err(PtpError::InvalidInput("gammainc: a must be positive".into()));
    }
    if x < 0.0 || x.is_nan() {
        return Err(PtpError::InvalidInput("gammainc: x must be non-negative".into()));
    }
    Ok(())
}

/// Series expansion for P(a, x).
fn gammainc_series(a: f64, x: f64) -> Result<f64> {
    let max_iter = 200;
    let eps = 1e-12;
    let ln_prefix = a * x.ln() - x - ln_gamma(a);

    let mut sum = 1.0 / a;
    let mut term = 1.0 / a;

    for n in 1..=max_iter {
        term *= x / (a + n as f64);
        sum += term;
        if term.abs() < sum.abs() * eps {
            return Ok(sum * ln_prefix.exp());
        }
    }

    Ok(sum * ln_prefix.exp())
}

/// Continued fraction for Q(a, x) = 1 - P(a, x) via modified Lentz's method.
fn gammainc_cf(a: f64, x: f64) -> Result<f64> {
    let max_iter = 200;
    let eps = 1e-12;
    let tiny = 1e-30_f64;
    let ln_prefix = a * x.ln() - x - ln_gamma(a);

    let mut b = x + 1.0 - a;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;

    for i in 1..=max_iter {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < tiny {
            d = tiny;
        }
        c = b + an / c;
        if c.abs() < tiny {
            c = tiny;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < eps {
            break;
        }
    }

    Ok(h * ln_prefix.exp())
}

// ── Distribution trait ─────────────────────────────────────────────────────

/// A probability distribution with basic statistical properties.
pub trait Distribution {
    /// Probability density (or mass) function at `x`.
    fn pdf(&self, x: f64) -> f64;

    /// Cumulative distribution function at `x`.
    fn cdf(&self, x: f64) -> f64;

    /// Distribution mean.
    fn mean(&self) -> f64;

    /// Distribution variance.
    fn variance(&self) -> f64;

    /// Distribution standard deviation (default: sqrt of variance).
    fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Survival function `1 - cdf(x)`.
    fn sf(&self, x: f64) -> f64 {
        1.0 - self.cdf(x)
    }
}

// ── Exponential distribution ──────────────────────────────────────────────

/// Exponential distribution with rate λ.
///
/// Branch lengths of one process (speciation, or coalescence within one
/// species) are modelled as independent draws from an exponential.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exponential {
    rate: f64,
}

impl Exponential {
    /// Create an exponential distribution. `rate` must be positive and finite.
    pub fn new(rate: f64) -> Result<Self> {
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(PtpError::InvalidInput(
                "Exponential: rate must be positive and finite".into(),
            ));
        }
        Ok(Self { rate })
    }

    /// Maximum-likelihood fit to `count` observations summing to `sum`
    /// (λ̂ = count / sum).
    ///
    /// Returns `None` when there is nothing to fit (`count == 0`) or the sum
    /// is not positive.
    pub fn fit(count: usize, sum: f64) -> Option<Self> {
        if count == 0 || !(sum > 0.0) {
            return None;
        }
        Self::new(count as f64 / sum).ok()
    }

    /// Rate parameter λ.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Joint log-density of `count` observations summing to `sum`:
    /// `count · ln λ − λ · sum`.
    pub fn log_likelihood(&self, count: usize, sum: f64) -> f64 {
        count as f64 * self.rate.ln() - self.rate * sum
    }
}

impl Distribution for Exponential {
    fn pdf(&self, x: f64) -> f64 {
        if x < 0.0 {
            return 0.0;
        }
        self.rate * (-self.rate * x).exp()
    }

    fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        1.0 - (-self.rate * x).exp()
    }

    fn mean(&self) -> f64 {
        1.0 / self.rate
    }

    fn variance(&self) -> f64 {
        1.0 / (self.rate * self.rate)
    }

    fn sf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 1.0;
        }
        (-self.rate * x).exp()
    }
}

// ── Chi-squared distribution ──────────────────────────────────────────────

/// Chi-squared distribution with k degrees of freedom.
#[derive(Debug, Clone, Copy)]
pub struct ChiSquared {
    k: f64,
}

impl ChiSquared {
    /// Create a chi-squared distribution with `k` degrees of freedom.
    pub fn new(k: f64) -> Result<Self> {
        if k <= 0.0 {
            return Err(PtpError::InvalidInput(
                "ChiSquared: k must be positive".into(),
            ));
        }
        Ok(Self { k })
    }

    /// Degrees of freedom.
    pub fn df(&self) -> f64 {
        self.k
    }
}

impl Distribution for ChiSquared {
    fn pdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        let half_k = self.k / 2.0;
        let ln_pdf = (half_k - 1.0) * x.ln() - x / 2.0 - half_k * 2.0_f64.ln() - ln_gamma(half_k);
        ln_pdf.exp()
    }

    fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        gammainc(self.k / 2.0, x / 2.0).unwrap_or(0.0)
    }

    fn mean(&self) -> f64 {
        self.k
    }

    fn variance(&self) -> f64 {
        2.0 * self.k
    }

    fn sf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 1.0;
        }
        gammaincc(self.k / 2.0, x / 2.0)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
