//! Voigt line profile and a Levenberg–Marquardt fit of it.

use std::f64::consts::{PI, SQRT_2};

use nalgebra::{Matrix4, Vector4};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Faddeeva function `w(z) = exp(-z²)·erfc(-iz)` for `Im z ≥ 0`.
///
/// Humlíček's four-region rational approximation (relative error ≲ 1e-4).
pub fn faddeeva(z: Complex64) -> Complex64 {
    let x = z.re;
    let y = z.im;
    let t = Complex64::new(y, -x);
    let s = x.abs() + y;

    if s >= 15.0 {
        t * 0.5641896 / (0.5 + t * t)
    } else if s >= 5.5 {
        let u = t * t;
        t * (1.410474 + u * 0.5641896) / (0.75 + u * (3.0 + u))
    } else if y >= 0.195 * x.abs() - 0.176 {
        (16.4955 + t * (20.20933 + t * (11.96482 + t * (3.778987 + t * 0.5642236))))
            / (16.4955 + t * (38.82363 + t * (39.27121 + t * (21.69274 + t * (6.699398 + t)))))
    } else {
        let u = t * t;
        let num = t
            * (36183.31
                - u * (3321.9905
                    - u * (1540.787
                        - u * (219.0313 - u * (35.76683 - u * (1.320522 - u * 0.56419))))));
        let den = 32066.6
            - u * (24322.84
                - u * (9022.228
                    - u * (2186.181 - u * (364.2191 - u * (61.57037 - u * (1.841439 - u))))));
        u.exp() - num / den
    }
}

/// Area-normalized Voigt profile scaled by `amplitude`.
///
/// `sigma` is the Gaussian standard deviation, `gamma` the Lorentzian
/// half-width at half-maximum. Negative widths are taken by magnitude.
pub fn voigt(x: f64, amplitude: f64, center: f64, sigma: f64, gamma: f64) -> f64 {
    let sigma = sigma.abs();
    let gamma = gamma.abs();
    let z = Complex64::new(x - center, gamma) / (sigma * SQRT_2);
    amplitude * faddeeva(z).re / (sigma * (2.0 * PI).sqrt())
}

// ---------------------------------------------------------------------------
// Fit
// ---------------------------------------------------------------------------

/// Fit controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoigtFitOptions {
    /// Starting Gaussian σ (and Lorentzian γ), Å.
    pub initial_sigma: f64,
    pub max_iterations: usize,
    /// Relative cost reduction below which an accepted step counts as converged.
    pub ftol: f64,
    /// Relative parameter change below which an accepted step counts as converged.
    pub xtol: f64,
    /// Largest cosine between the residual and a free Jacobian column at
    /// which the fit counts as converged.
    pub gtol: f64,
}

impl Default for VoigtFitOptions {
    fn default() -> Self {
        Self {
            initial_sigma: 1.0,
            max_iterations: 1000,
            ftol: 1.5e-8,
            xtol: 1.5e-8,
            gtol: 1e-8,
        }
    }
}

/// Best-fit Voigt parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoigtFit {
    pub amplitude: f64,
    pub center: f64,
    pub sigma: f64,
    pub gamma: f64,
    pub iterations: usize,
}

impl VoigtFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        voigt(x, self.amplitude, self.center, self.sigma, self.gamma)
    }

    /// Model curve over `x`.
    pub fn best_fit(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&v| self.evaluate(v)).collect()
    }

    fn from_params(p: &Vector4<f64>, iterations: usize) -> Self {
        VoigtFit {
            amplitude: p[0],
            center: p[1],
            sigma: p[2].abs(),
            gamma: p[3].abs(),
            iterations,
        }
    }
}

const N_PARAMS: usize = 4;
const MAX_DAMPING: f64 = 1e10;
/// Smallest Gaussian σ, as a fraction of the mean sample spacing.
const MIN_WIDTH_FRACTION: f64 = 1e-2;

/// Box the parameters are kept in: the center stays inside the window and
/// both widths stay within the window span.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    lower: Vector4<f64>,
    upper: Vector4<f64>,
}

impl Bounds {
    fn for_window(x: &[f64]) -> Option<Self> {
        let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = hi - lo;
        if !(span.is_finite() && span > 0.0) {
            return None;
        }
        let min_width = MIN_WIDTH_FRACTION * span / (x.len() - 1) as f64;
        Some(Bounds {
            lower: Vector4::new(f64::NEG_INFINITY, lo, min_width, 0.0),
            upper: Vector4::new(f64::INFINITY, hi, span, span),
        })
    }

    fn project(&self, p: &Vector4<f64>) -> Vector4<f64> {
        let mut q = *p;
        for i in 0..N_PARAMS {
            q[i] = p[i].clamp(self.lower[i], self.upper[i]);
        }
        q
    }

    /// `true` when parameter `i` sits on a bound and the descent direction
    /// `-gradient[i]` points out of the box.
    fn blocks(&self, p: &Vector4<f64>, gradient: &Vector4<f64>, i: usize) -> bool {
        (p[i] <= self.lower[i] && gradient[i] > 0.0) || (p[i] >= self.upper[i] && gradient[i] < 0.0)
    }
}

/// Fit `amplitude · Voigt(x; center, σ, γ)` to `(x, y)` by Levenberg–Marquardt.
///
/// Starts from `amplitude = max(y)`, `center = center`, `σ = γ = initial_sigma`.
/// Every trial step is projected back into the window: `center` stays within
/// `[min x, max x]` and `σ`, `γ` within `[0, max x - min x]`.
/// The error string describes why the fit was abandoned.
pub fn fit_voigt(
    x: &[f64],
    y: &[f64],
    center: f64,
    options: &VoigtFitOptions,
) -> Result<VoigtFit, String> {
    if x.len() != y.len() {
        return Err(format!("x has {} samples but y has {}", x.len(), y.len()));
    }
    if x.len() < N_PARAMS {
        return Err(format!(
            "{} samples are too few to fit {N_PARAMS} parameters",
            x.len()
        ));
    }
    let bounds = Bounds::for_window(x).ok_or("window has no wavelength extent")?;

    let amplitude = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut params = bounds.project(&Vector4::new(
        amplitude,
        center,
        options.initial_sigma,
        options.initial_sigma,
    ));

    let mut residuals = compute_residuals(x, y, &params);
    let mut cost = sum_of_squares(&residuals);
    if !cost.is_finite() {
        return Err("initial model is not finite".to_string());
    }

    let mut damping = 1e-3;

    for iteration in 1..=options.max_iterations {
        if cost == 0.0 {
            return Ok(VoigtFit::from_params(&params, iteration));
        }

        let jacobian = jacobian(x, &params);
        let mut jtj = Matrix4::<f64>::zeros();
        let mut jtr = Vector4::<f64>::zeros();
        for (row, r) in jacobian.iter().zip(&residuals) {
            for a in 0..N_PARAMS {
                jtr[a] += row[a] * r;
                for b in 0..N_PARAMS {
                    jtj[(a, b)] += row[a] * row[b];
                }
            }
        }

        if gradient_converged(&jtj, &jtr, cost, &params, &bounds, options.gtol) {
            return finish(&params, iteration);
        }

        // Inner loop: raise the damping until a step lowers the cost.
        loop {
            let mut system = jtj;
            for a in 0..N_PARAMS {
                system[(a, a)] += damping * jtj[(a, a)].max(1e-12);
            }
            let step = match system.cholesky() {
                Some(chol) => -chol.solve(&jtr),
                None => {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        return Err("normal equations are singular".to_string());
                    }
                    continue;
                }
            };

            let trial = bounds.project(&(params + step));
            let taken = trial - params;
            let trial_residuals = residuals_checked(x, y, &trial);
            let trial_cost = trial_residuals
                .as_deref()
                .map(sum_of_squares)
                .unwrap_or(f64::INFINITY);

            if trial_cost < cost {
                let reduction = (cost - trial_cost) / cost;
                let small_step = taken.norm() <= options.xtol * (params.norm() + options.xtol);
                params = trial;
                cost = trial_cost;
                if let Some(r) = trial_residuals {
                    residuals = r;
                }
                damping = (damping / 10.0).max(1e-12);
                if reduction < options.ftol || small_step {
                    return finish(&params, iteration);
                }
                break;
            }

            damping *= 10.0;
            if damping > MAX_DAMPING {
                // No downhill direction left inside the box: a stationary point.
                return finish(&params, iteration);
            }
        }
    }

    Err(format!(
        "no convergence after {} iterations",
        options.max_iterations
    ))
}

/// Largest cosine between the residual vector and a Jacobian column, over
/// the parameters not pinned against a bound.
fn gradient_converged(
    jtj: &Matrix4<f64>,
    jtr: &Vector4<f64>,
    cost: f64,
    params: &Vector4<f64>,
    bounds: &Bounds,
    gtol: f64,
) -> bool {
    let residual_norm = cost.sqrt();
    let worst = (0..N_PARAMS)
        .filter(|&j| !bounds.blocks(params, jtr, j))
        .map(|j| {
            let column_norm = jtj[(j, j)].sqrt();
            if column_norm == 0.0 {
                0.0
            } else {
                jtr[j].abs() / (column_norm * residual_norm)
            }
        })
        .fold(0.0, f64::max);
    worst <= gtol
}

fn finish(params: &Vector4<f64>, iterations: usize) -> Result<VoigtFit, String> {
    if params.iter().any(|v| !v.is_finite()) {
        return Err("fitted parameters are not finite".to_string());
    }
    if params[2].abs() < f64::EPSILON {
        return Err("Gaussian width collapsed to zero".to_string());
    }
    Ok(VoigtFit::from_params(params, iterations))
}

fn model(x: f64, p: &Vector4<f64>) -> f64 {
    voigt(x, p[0], p[1], p[2], p[3])
}

fn compute_residuals(x: &[f64], y: &[f64], p: &Vector4<f64>) -> Vec<f64> {
    x.iter().zip(y).map(|(&xi, &yi)| model(xi, p) - yi).collect()
}

fn residuals_checked(x: &[f64], y: &[f64], p: &Vector4<f64>) -> Option<Vec<f64>> {
    if p[2].abs() < f64::EPSILON {
        return None;
    }
    let r = compute_residuals(x, y, p);
    r.iter().all(|v| v.is_finite()).then_some(r)
}

fn sum_of_squares(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Forward-difference Jacobian of the model, one row per sample.
fn jacobian(x: &[f64], p: &Vector4<f64>) -> Vec<[f64; N_PARAMS]> {
    let base: Vec<f64> = x.iter().map(|&xi| model(xi, p)).collect();
    let mut rows = vec![[0.0; N_PARAMS]; x.len()];

    for j in 0..N_PARAMS {
        let h = f64::EPSILON.sqrt() * p[j].abs().max(1e-2);
        let mut shifted = *p;
        shifted[j] += h;
        for (i, &xi) in x.iter().enumerate() {
            rows[i][j] = (model(xi, &shifted) - base[i]) / h;
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn faddeeva_matches_reference_values() {
        // w(0) = 1
        assert_abs_diff_eq!(faddeeva(Complex64::new(0.0, 0.0)).re, 1.0, epsilon = 5e-4);
        // w(i) = exp(1)·erfc(1) ≈ 0.427584
        assert_abs_diff_eq!(faddeeva(Complex64::new(0.0, 1.0)).re, 0.427584, epsilon = 5e-4);
        // Re w(x) = exp(-x²) on the real axis
        assert_abs_diff_eq!(
            faddeeva(Complex64::new(1.0, 0.0)).re,
            (-1.0f64).exp(),
            epsilon = 5e-4
        );
    }

    #[test]
    fn voigt_is_area_normalized() {
        let dx = 0.01;
        let area: f64 = (-20000..=20000)
            .map(|i| voigt(i as f64 * dx, 2.0, 0.0, 0.5, 0.2) * dx)
            .sum();
        // The Lorentzian tail beyond ±200 carries ~0.06 % of the area.
        assert_relative_eq!(area, 2.0, max_relative = 2e-3);
    }

    #[test]
    fn recovers_synthetic_absorption_line() {
        let x: Vec<f64> = (0..81).map(|i| 6556.0 + 0.05 * i as f64).collect();
        let truth = (-1.5, 6558.1, 0.3, 0.1);
        let y: Vec<f64> = x
            .iter()
            .map(|&v| voigt(v, truth.0, truth.1, truth.2, truth.3))
            .collect();

        let fit = fit_voigt(&x, &y, 6558.149, &VoigtFitOptions::default()).unwrap();
        let residual: f64 = x
            .iter()
            .zip(&y)
            .map(|(&v, &t)| (fit.evaluate(v) - t).abs())
            .fold(0.0, f64::max);
        assert!(residual < 1e-3, "max residual {residual}");
        assert_abs_diff_eq!(fit.center, truth.1, epsilon = 1e-2);
        assert_relative_eq!(fit.amplitude, truth.0, max_relative = 5e-2);
    }

    /// Uniform noise in `[-amplitude, amplitude]` from a fixed-seed LCG.
    fn noise(n: usize, amplitude: f64, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                amplitude * (2.0 * unit - 1.0)
            })
            .collect()
    }

    #[test]
    fn noisy_window_stays_inside_bounds() {
        // Shallow line on a slight offset with noise, as left by the baseline
        // next to an emission wing.
        let x: Vec<f64> = (0..81).map(|i| 6530.459 + 0.05 * i as f64).collect();
        let jitter = noise(x.len(), 0.007, 11);
        let y: Vec<f64> = x
            .iter()
            .zip(&jitter)
            .map(|(&v, n)| 0.004 + voigt(v, -0.05, 6532.459, 0.12, 0.03) + n)
            .collect();

        let fit = fit_voigt(&x, &y, 6532.459, &VoigtFitOptions::default()).unwrap();
        assert!(fit.center >= x[0] && fit.center <= x[80], "center {}", fit.center);
        assert!(fit.sigma <= 4.0 + 1e-9 && fit.gamma <= 4.0 + 1e-9);
        assert!(fit.amplitude.is_finite());
    }

    #[test]
    fn pure_noise_window_converges() {
        let x: Vec<f64> = (0..81).map(|i| 6514.0 + 0.05 * i as f64).collect();
        let y = noise(x.len(), 0.007, 3);
        let fit = fit_voigt(&x, &y, 6516.0, &VoigtFitOptions::default()).unwrap();
        assert!(fit.center >= x[0] && fit.center <= x[80]);
        let peak = fit.best_fit(&x).iter().map(|v| v.abs()).fold(0.0, f64::max);
        assert!(peak < 0.05, "fitted {peak} out of pure noise");
    }

    #[test]
    fn degenerate_window_is_an_error() {
        assert!(fit_voigt(&[1.0; 5], &[0.0; 5], 1.0, &VoigtFitOptions::default()).is_err());
    }

    #[test]
    fn too_few_samples_is_an_error() {
        assert!(fit_voigt(&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.0], 2.0, &VoigtFitOptions::default())
            .is_err());
    }

    #[test]
    fn flat_zero_window_fits_trivially() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        let fit = fit_voigt(&x, &[0.0; 10], 0.5, &VoigtFitOptions::default()).unwrap();
        for v in fit.best_fit(&x) {
            assert_abs_diff_eq!(v, 0.0);
        }
    }
}
