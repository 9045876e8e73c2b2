//! Asymmetric least squares (AsLS) baseline.
//!
//! Each iteration solves the Whittaker smoother
//!
//! ```text
//! (W + λ·DᵀD) z = W y
//! ```
//!
//! with `D` the second-difference operator, then reweights every sample:
//! `p` above the current fit, `1 - p` below it. With `p` close to 1 the
//! curve hugs the upper envelope and absorption dips do not drag it down.

use serde::{Deserialize, Serialize};

use crate::error::{CorrectionError, CorrectionResult, Stage};

/// Tuning knobs of the baseline estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineOptions {
    /// Roughness penalty λ. Larger is stiffer.
    pub smoothness: f64,
    /// Weight `p` given to samples above the fit; `1 - p` below. In (0, 1).
    pub asymmetry: f64,
    /// Hard cap on reweighting passes.
    pub max_iterations: usize,
    /// Stop once the relative change of the weight vector drops below this.
    pub tolerance: f64,
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self {
            smoothness: 1e5,
            asymmetry: 0.95,
            max_iterations: 50,
            tolerance: 1e-3,
        }
    }
}

impl BaselineOptions {
    pub fn validate(&self) -> CorrectionResult<()> {
        let stage = Stage::Baseline;
        if !(self.smoothness.is_finite() && self.smoothness > 0.0) {
            return Err(CorrectionError::invalid(
                stage,
                format!("smoothness must be positive, got {}", self.smoothness),
            ));
        }
        if !(self.asymmetry > 0.0 && self.asymmetry < 1.0) {
            return Err(CorrectionError::invalid(
                stage,
                format!("asymmetry must lie in (0, 1), got {}", self.asymmetry),
            ));
        }
        if self.max_iterations == 0 {
            return Err(CorrectionError::invalid(stage, "max_iterations must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(CorrectionError::invalid(
                stage,
                format!("tolerance must be non-negative, got {}", self.tolerance),
            ));
        }
        Ok(())
    }
}

/// Estimate the smooth continuum under `intensity`.
///
/// The penalty acts on sample index, so `wavelength` only has to match
/// `intensity` in length. Returns a fresh vector of the same length.
pub fn estimate_baseline(
    wavelength: &[f64],
    intensity: &[f64],
    options: &BaselineOptions,
) -> CorrectionResult<Vec<f64>> {
    let stage = Stage::Baseline;
    options.validate()?;

    let n = intensity.len();
    if n < 2 {
        return Err(CorrectionError::invalid(
            stage,
            format!("need at least 2 samples, got {n}"),
        ));
    }
    if wavelength.len() != n {
        return Err(CorrectionError::ShapeMismatch {
            stage,
            expected: n,
            actual: wavelength.len(),
        });
    }
    if let Some(i) = intensity.iter().position(|v| !v.is_finite()) {
        return Err(CorrectionError::invalid(
            stage,
            format!("intensity[{i}] is not finite"),
        ));
    }

    let penalty = SecondDifferencePenalty::new(n, options.smoothness);
    let p = options.asymmetry;

    let mut weights = vec![1.0; n];
    let mut baseline = Vec::new();
    let mut rhs = vec![0.0; n];

    for iteration in 1..=options.max_iterations {
        for i in 0..n {
            rhs[i] = weights[i] * intensity[i];
        }
        baseline = penalty.solve(&weights, &rhs)?;

        let new_weights: Vec<f64> = intensity
            .iter()
            .zip(&baseline)
            .map(|(&y, &z)| if y > z { p } else { 1.0 - p })
            .collect();

        let change = relative_difference(&weights, &new_weights);
        weights = new_weights;
        if change < options.tolerance {
            log::debug!("baseline converged after {iteration} iterations (Δw = {change:.2e})");
            return Ok(baseline);
        }
    }

    log::debug!(
        "baseline reached the iteration cap ({}) before converging",
        options.max_iterations
    );
    Ok(baseline)
}

/// `‖new - old‖ / ‖old‖`.
fn relative_difference(old: &[f64], new: &[f64]) -> f64 {
    let num: f64 = old
        .iter()
        .zip(new)
        .map(|(a, b)| (b - a) * (b - a))
        .sum::<f64>()
        .sqrt();
    let den: f64 = old.iter().map(|a| a * a).sum::<f64>().sqrt();
    num / den.max(f64::EPSILON)
}

// ---------------------------------------------------------------------------
// Banded system
// ---------------------------------------------------------------------------

/// The pentadiagonal matrix λ·DᵀD, stored by its three upper bands.
struct SecondDifferencePenalty {
    diag: Vec<f64>,
    upper1: Vec<f64>,
    upper2: Vec<f64>,
}

impl SecondDifferencePenalty {
    fn new(n: usize, lambda: f64) -> Self {
        let mut diag = vec![0.0; n];
        let mut upper1 = vec![0.0; n];
        let mut upper2 = vec![0.0; n];

        // Each row of D is [1, -2, 1] starting at column k.
        const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];
        for k in 0..n.saturating_sub(2) {
            for a in 0..3 {
                for b in a..3 {
                    let v = lambda * STENCIL[a] * STENCIL[b];
                    match b - a {
                        0 => diag[k + a] += v,
                        1 => upper1[k + a] += v,
                        _ => upper2[k + a] += v,
                    }
                }
            }
        }

        Self {
            diag,
            upper1,
            upper2,
        }
    }

    /// Solve `(diag(weights) + λ·DᵀD) z = rhs` by banded LDLᵀ factorization.
    fn solve(&self, weights: &[f64], rhs: &[f64]) -> CorrectionResult<Vec<f64>> {
        let n = self.diag.len();
        let mut d = vec![0.0; n];
        let mut l1 = vec![0.0; n];
        let mut l2 = vec![0.0; n];

        for i in 0..n {
            let mut di = self.diag[i] + weights[i];
            if i >= 1 {
                di -= l1[i - 1] * l1[i - 1] * d[i - 1];
            }
            if i >= 2 {
                di -= l2[i - 2] * l2[i - 2] * d[i - 2];
            }
            if !(di.is_finite() && di > 0.0) {
                return Err(CorrectionError::invalid(
                    Stage::Baseline,
                    format!("penalized system is not positive definite at row {i}"),
                ));
            }
            d[i] = di;

            let mut a1 = self.upper1[i];
            if i >= 1 {
                a1 -= l2[i - 1] * l1[i - 1] * d[i - 1];
            }
            l1[i] = a1 / di;
            l2[i] = self.upper2[i] / di;
        }

        // L y = rhs
        let mut z = rhs.to_vec();
        for i in 0..n {
            if i >= 1 {
                z[i] -= l1[i - 1] * z[i - 1];
            }
            if i >= 2 {
                z[i] -= l2[i - 2] * z[i - 2];
            }
        }
        // D w = y
        for i in 0..n {
            z[i] /= d[i];
        }
        // Lᵀ x = w
        for i in (0..n).rev() {
            if i + 1 < n {
                z[i] -= l1[i] * z[i + 1];
            }
            if i + 2 < n {
                z[i] -= l2[i] * z[i + 2];
            }
        }
        Ok(z)
    }
}
