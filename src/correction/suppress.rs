use std::fmt;
use std::ops::Range;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::catalog::TelluricCatalog;
use super::voigt::{fit_voigt, VoigtFitOptions};
use crate::error::{CorrectionError, CorrectionResult, Side, Stage};

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How a telluric feature is removed from its window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Fit a Voigt profile to the window and subtract it.
    #[default]
    #[value(name = "model_fit")]
    ModelFit,
    /// Replace the window by a straight line between its neighbouring samples.
    #[value(name = "linear_interp")]
    LinearInterp,
}

impl CorrectionMode {
    /// Default window half-width for this mode, Å.
    pub fn default_halfwidth(self) -> f64 {
        match self {
            CorrectionMode::ModelFit => 2.0,
            CorrectionMode::LinearInterp => 0.4,
        }
    }
}

impl fmt::Display for CorrectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionMode::ModelFit => f.write_str("model_fit"),
            CorrectionMode::LinearInterp => f.write_str("linear_interp"),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What happened to one catalog line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// The feature was removed from samples `window`.
    Corrected { position: f64, window: Range<usize> },
    /// No sample falls inside the window; nothing to do.
    OutOfRange { position: f64 },
    /// The line could not be corrected; its window is left as it was.
    Skipped {
        position: f64,
        error: CorrectionError,
    },
}

/// Per-line record of one suppression pass, in catalog order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuppressionReport {
    pub outcomes: Vec<LineOutcome>,
}

impl SuppressionReport {
    pub fn corrected(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, LineOutcome::Corrected { .. }))
            .count()
    }

    pub fn out_of_range(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, LineOutcome::OutOfRange { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.failures().count()
    }

    /// Errors of the skipped lines.
    pub fn failures(&self) -> impl Iterator<Item = &CorrectionError> {
        self.outcomes.iter().filter_map(|o| match o {
            LineOutcome::Skipped { error, .. } => Some(error),
            _ => None,
        })
    }
}

impl fmt::Display for SuppressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines corrected, {} skipped, {} outside the observed range",
            self.corrected(),
            self.skipped(),
            self.out_of_range()
        )
    }
}

// ---------------------------------------------------------------------------
// Suppression
// ---------------------------------------------------------------------------

/// Remove every catalog line from the baseline-subtracted signal.
///
/// Lines are handled in catalog order on a single working copy, so a line
/// whose window overlaps an earlier one sees the already-corrected samples.
/// Per-line failures are recorded in the report and never abort the pass.
pub fn suppress_lines(
    wavelength: &[f64],
    detrended: &[f64],
    catalog: &TelluricCatalog,
    halfwidth: f64,
    mode: CorrectionMode,
    fit_options: &VoigtFitOptions,
) -> CorrectionResult<(Vec<f64>, SuppressionReport)> {
    let stage = Stage::LineSuppression;
    if detrended.len() != wavelength.len() {
        return Err(CorrectionError::ShapeMismatch {
            stage,
            expected: wavelength.len(),
            actual: detrended.len(),
        });
    }
    if !(halfwidth.is_finite() && halfwidth > 0.0) {
        return Err(CorrectionError::invalid(
            stage,
            format!("halfwidth must be positive, got {halfwidth}"),
        ));
    }

    let mut corrected = detrended.to_vec();
    let mut report = SuppressionReport::default();

    for line in catalog.iter() {
        let position = line.position;
        let window = correction_window(wavelength, position, halfwidth);
        if window.is_empty() {
            report.outcomes.push(LineOutcome::OutOfRange { position });
            continue;
        }

        let result = match mode {
            CorrectionMode::LinearInterp => {
                interpolate_window(wavelength, &mut corrected, window.clone(), position)
            }
            CorrectionMode::ModelFit => {
                subtract_voigt(wavelength, &mut corrected, window.clone(), position, fit_options)
            }
        };

        match result {
            Ok(()) => {
                log::debug!(
                    "corrected line at {position:.3} Å over samples {}..{}",
                    window.start,
                    window.end
                );
                report
                    .outcomes
                    .push(LineOutcome::Corrected { position, window });
            }
            Err(error) => {
                log::warn!("skipping telluric line: {error}");
                report.outcomes.push(LineOutcome::Skipped { position, error });
            }
        }
    }

    Ok((corrected, report))
}

/// Indices with `wavelength[i]` in `[position - halfwidth, position + halfwidth]`.
/// `wavelength` must be ascending, which makes the window contiguous.
pub fn correction_window(wavelength: &[f64], position: f64, halfwidth: f64) -> Range<usize> {
    let lo = position - halfwidth;
    let hi = position + halfwidth;
    let start = wavelength.partition_point(|&w| w < lo);
    let end = wavelength.partition_point(|&w| w <= hi);
    start..end.max(start)
}

fn interpolate_window(
    wavelength: &[f64],
    values: &mut [f64],
    window: Range<usize>,
    position: f64,
) -> CorrectionResult<()> {
    let left = window
        .start
        .checked_sub(1)
        .ok_or(CorrectionError::BoundaryMissing {
            position,
            side: Side::Left,
        })?;
    let right = window.end;
    if right >= values.len() {
        return Err(CorrectionError::BoundaryMissing {
            position,
            side: Side::Right,
        });
    }

    let (x0, y0) = (wavelength[left], values[left]);
    let (x1, y1) = (wavelength[right], values[right]);
    let slope = (y1 - y0) / (x1 - x0);
    for i in window {
        values[i] = y0 + slope * (wavelength[i] - x0);
    }
    Ok(())
}

fn subtract_voigt(
    wavelength: &[f64],
    values: &mut [f64],
    window: Range<usize>,
    position: f64,
    options: &VoigtFitOptions,
) -> CorrectionResult<()> {
    let x = &wavelength[window.clone()];
    let fit = fit_voigt(x, &values[window.clone()], position, options)
        .map_err(|reason| CorrectionError::FitConvergence { position, reason })?;

    let model = fit.best_fit(x);
    if model.iter().any(|v| !v.is_finite()) {
        return Err(CorrectionError::FitConvergence {
            position,
            reason: "model curve is not finite".to_string(),
        });
    }
    log::trace!(
        "Voigt fit at {position:.3} Å: amplitude {:.4}, center {:.3}, σ {:.3}, γ {:.3} \
         ({} iterations)",
        fit.amplitude,
        fit.center,
        fit.sigma,
        fit.gamma,
        fit.iterations
    );
    for (v, m) in values[window].iter_mut().zip(model) {
        *v -= m;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::voigt::voigt;
    use approx::assert_abs_diff_eq;

    fn axis(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn window_is_inclusive() {
        let w = axis(6500.0, 0.5, 11);
        assert_eq!(correction_window(&w, 6502.0, 1.0), 2..7);
        assert!(correction_window(&w, 6600.0, 1.0).is_empty());
        assert!(correction_window(&w, 6400.0, 1.0).is_empty());
    }

    #[test]
    fn linear_interp_bridges_the_window() {
        let w = axis(6500.0, 0.1, 41);
        let mut y = vec![0.0; 41];
        for (i, v) in y.iter_mut().enumerate() {
            if (18..=22).contains(&i) {
                *v = -3.0;
            }
        }
        let catalog = TelluricCatalog::from_positions([6502.0]);
        let (out, report) = suppress_lines(
            &w,
            &y,
            &catalog,
            0.25,
            CorrectionMode::LinearInterp,
            &VoigtFitOptions::default(),
        )
        .unwrap();

        assert_eq!(report.corrected(), 1);
        for v in &out {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }
        // Input left untouched.
        assert_eq!(y[20], -3.0);
    }

    #[test]
    fn edge_line_is_skipped_and_others_proceed() {
        let w = axis(6500.0, 0.1, 41);
        let y: Vec<f64> = (0..41).map(|i| if i == 20 || i == 40 { -1.0 } else { 0.0 }).collect();
        let catalog = TelluricCatalog::from_positions([6502.0, 6504.0, 6700.0]);
        let (out, report) = suppress_lines(
            &w,
            &y,
            &catalog,
            0.05,
            CorrectionMode::LinearInterp,
            &VoigtFitOptions::default(),
        )
        .unwrap();

        assert_eq!(report.corrected(), 1);
        assert_eq!(report.out_of_range(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(matches!(
            report.failures().next(),
            Some(CorrectionError::BoundaryMissing {
                side: Side::Right,
                ..
            })
        ));
        assert_abs_diff_eq!(out[20], 0.0, epsilon = 1e-12);
        assert_eq!(out[40], -1.0);
    }

    #[test]
    fn overlapping_windows_compound_in_catalog_order() {
        let w = axis(0.0, 1.0, 10);
        let y = vec![0.0, 0.0, 5.0, 5.0, 5.0, 5.0, 0.0, 0.0, 9.0, 0.0];
        // The first window's result feeds the second window's left anchor.
        let catalog = TelluricCatalog::from_positions([3.5, 5.5]);
        let (out, _) = suppress_lines(
            &w,
            &y,
            &catalog,
            1.5,
            CorrectionMode::LinearInterp,
            &VoigtFitOptions::default(),
        )
        .unwrap();
        // First pass: anchors 1 (0.0) and 6 (0.0) → samples 2..=5 become 0.
        // Second pass: window 4..=7, anchors 3 (0.0) and 8 (9.0).
        let expected = [0.0, 0.0, 0.0, 0.0, 1.8, 3.6, 5.4, 7.2, 9.0, 0.0];
        for (a, b) in out.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn model_fit_removes_voigt_dip() {
        let w = axis(6555.0, 0.05, 121);
        let y: Vec<f64> = w.iter().map(|&x| voigt(x, -0.8, 6558.149, 0.2, 0.05)).collect();
        let catalog = TelluricCatalog::from_positions([6558.149]);
        let (out, report) = suppress_lines(
            &w,
            &y,
            &catalog,
            2.0,
            CorrectionMode::ModelFit,
            &VoigtFitOptions::default(),
        )
        .unwrap();

        assert_eq!(report.corrected(), 1);
        let depth = y.iter().copied().fold(f64::INFINITY, f64::min);
        let left = out.iter().map(|v| v.abs()).fold(0.0, f64::max);
        assert!(left < 0.01 * depth.abs(), "residual {left} vs depth {depth}");
    }

    #[test]
    fn narrow_model_fit_window_is_skipped() {
        let w = axis(6500.0, 1.0, 20);
        let y = vec![0.0; 20];
        let catalog = TelluricCatalog::from_positions([6510.0]);
        let (out, report) = suppress_lines(
            &w,
            &y,
            &catalog,
            0.5,
            CorrectionMode::ModelFit,
            &VoigtFitOptions::default(),
        )
        .unwrap();
        assert_eq!(report.skipped(), 1);
        assert!(matches!(
            report.failures().next(),
            Some(CorrectionError::FitConvergence { .. })
        ));
        assert_eq!(out, y);
    }

    #[test]
    fn rejects_mismatched_lengths_and_bad_halfwidth() {
        let catalog = TelluricCatalog::default();
        let opts = VoigtFitOptions::default();
        assert!(matches!(
            suppress_lines(&[1.0, 2.0], &[1.0], &catalog, 1.0, CorrectionMode::ModelFit, &opts),
            Err(CorrectionError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            suppress_lines(&[1.0], &[1.0], &catalog, 0.0, CorrectionMode::ModelFit, &opts),
            Err(CorrectionError::InvalidInput { .. })
        ));
    }

    #[test]
    fn mode_names_match_config_spelling() {
        assert_eq!(
            CorrectionMode::from_str("linear_interp", false),
            Ok(CorrectionMode::LinearInterp)
        );
        assert_eq!(
            CorrectionMode::from_str("model_fit", false),
            Ok(CorrectionMode::ModelFit)
        );
        assert!(CorrectionMode::from_str("spline", false).is_err());
        for mode in CorrectionMode::value_variants() {
            let name = mode.to_possible_value().unwrap().get_name().to_string();
            assert_eq!(name, mode.to_string());
            let json: CorrectionMode = serde_json::from_str(&format!("\"{name}\"")).unwrap();
            assert_eq!(json, *mode);
        }
        assert_eq!(CorrectionMode::LinearInterp.default_halfwidth(), 0.4);
    }
}
