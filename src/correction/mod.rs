/// Telluric correction engine.
///
/// ```text
///  (wavelength, intensity)
///        │
///        ▼
///   ┌──────────┐
///   │ baseline  │  asymmetric least squares → baseline, intensity - baseline
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ suppress  │  per catalog line: Voigt subtraction or linear bridge
///   └──────────┘
///        │
///        ▼
///   ┌────────────┐
///   │ reassemble  │  corrected residual + baseline
///   └────────────┘
/// ```
pub mod baseline;
pub mod catalog;
pub mod suppress;
pub mod voigt;

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::data::model::{validate_arrays, Spectrum};
use crate::error::{CorrectionError, CorrectionResult, Stage};
use baseline::{estimate_baseline, BaselineOptions};
use catalog::TelluricCatalog;
use suppress::{suppress_lines, CorrectionMode, SuppressionReport};
use voigt::VoigtFitOptions;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// All tunables of the correction pipeline.
///
/// Every field has a default, so a JSON override file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Baseline roughness penalty λ.
    pub smoothness: f64,
    /// Baseline asymmetry `p` in (0, 1).
    pub asymmetry: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Window half-width in Å; `None` picks the mode's default.
    pub halfwidth: Option<f64>,
    pub mode: CorrectionMode,
    pub catalog: TelluricCatalog,
    pub fit: VoigtFitOptions,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        let baseline = BaselineOptions::default();
        Self {
            smoothness: baseline.smoothness,
            asymmetry: baseline.asymmetry,
            max_iterations: baseline.max_iterations,
            tolerance: baseline.tolerance,
            halfwidth: None,
            mode: CorrectionMode::default(),
            catalog: TelluricCatalog::default(),
            fit: VoigtFitOptions::default(),
        }
    }
}

impl CorrectionConfig {
    /// Load overrides from a JSON file.
    pub fn from_json_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn baseline_options(&self) -> BaselineOptions {
        BaselineOptions {
            smoothness: self.smoothness,
            asymmetry: self.asymmetry,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }

    pub fn halfwidth(&self) -> f64 {
        self.halfwidth
            .unwrap_or_else(|| self.mode.default_halfwidth())
    }

    pub fn validate(&self) -> CorrectionResult<()> {
        self.baseline_options().validate()?;
        let halfwidth = self.halfwidth();
        if !(halfwidth.is_finite() && halfwidth > 0.0) {
            return Err(CorrectionError::invalid(
                Stage::LineSuppression,
                format!("halfwidth must be positive, got {halfwidth}"),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Result of one correction run.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionOutput {
    /// Wavelength axis, passed through unchanged.
    pub wavelength: Vec<f64>,
    pub corrected: Vec<f64>,
    pub baseline: Vec<f64>,
    pub report: SuppressionReport,
}

impl CorrectionOutput {
    /// `(wavelength, corrected spectrum, baseline)`.
    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        (self.wavelength, self.corrected, self.baseline)
    }
}

/// Add the baseline back onto the corrected residual.
pub fn reassemble(
    corrected_detrended: &[f64],
    baseline: &[f64],
) -> CorrectionResult<(Vec<f64>, Vec<f64>)> {
    if corrected_detrended.len() != baseline.len() {
        return Err(CorrectionError::ShapeMismatch {
            stage: Stage::Reassembly,
            expected: baseline.len(),
            actual: corrected_detrended.len(),
        });
    }
    let corrected = corrected_detrended
        .iter()
        .zip(baseline)
        .map(|(r, b)| r + b)
        .collect();
    Ok((corrected, baseline.to_vec()))
}

/// Estimate the baseline, remove the catalog's telluric lines and add the
/// baseline back. The inputs are not modified.
pub fn remove_atmospheric_lines(
    wavelength: &[f64],
    intensity: &[f64],
    config: &CorrectionConfig,
) -> CorrectionResult<CorrectionOutput> {
    config.validate()?;
    validate_arrays(wavelength, intensity)?;

    let baseline = estimate_baseline(wavelength, intensity, &config.baseline_options())?;
    let detrended: Vec<f64> = intensity
        .iter()
        .zip(&baseline)
        .map(|(y, b)| y - b)
        .collect();

    let (corrected_detrended, report) = suppress_lines(
        wavelength,
        &detrended,
        &config.catalog,
        config.halfwidth(),
        config.mode,
        &config.fit,
    )?;

    let (corrected, baseline) = reassemble(&corrected_detrended, &baseline)?;
    if corrected.len() != wavelength.len() {
        return Err(CorrectionError::ShapeMismatch {
            stage: Stage::Reassembly,
            expected: wavelength.len(),
            actual: corrected.len(),
        });
    }

    log::info!("telluric correction ({}): {report}", config.mode);
    Ok(CorrectionOutput {
        wavelength: wavelength.to_vec(),
        corrected,
        baseline,
        report,
    })
}

/// [`remove_atmospheric_lines`] on a [`Spectrum`].
pub fn correct_spectrum(
    spectrum: &Spectrum,
    config: &CorrectionConfig,
) -> CorrectionResult<CorrectionOutput> {
    remove_atmospheric_lines(&spectrum.wavelength, &spectrum.intensity, config)
}

/// Correct several spectra independently; one bad spectrum does not stop
/// the others.
pub fn correct_batch(
    spectra: &[Spectrum],
    config: &CorrectionConfig,
) -> Vec<CorrectionResult<CorrectionOutput>> {
    spectra
        .iter()
        .enumerate()
        .map(|(i, sp)| {
            let result = correct_spectrum(sp, config);
            if let Err(e) = &result {
                log::error!("spectrum {i}: {e}");
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reassemble_adds_elementwise() {
        let (corrected, baseline) = reassemble(&[1.0, -2.0], &[10.0, 10.0]).unwrap();
        assert_eq!(corrected, vec![11.0, 8.0]);
        assert_eq!(baseline, vec![10.0, 10.0]);
    }

    #[test]
    fn reassemble_rejects_length_mismatch() {
        assert!(matches!(
            reassemble(&[1.0], &[1.0, 2.0]),
            Err(CorrectionError::ShapeMismatch {
                stage: Stage::Reassembly,
                ..
            })
        ));
    }

    #[test]
    fn halfwidth_follows_mode_unless_set() {
        let mut config = CorrectionConfig::default();
        assert_eq!(config.halfwidth(), 2.0);
        config.mode = CorrectionMode::LinearInterp;
        assert_eq!(config.halfwidth(), 0.4);
        config.halfwidth = Some(1.0);
        assert_eq!(config.halfwidth(), 1.0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: CorrectionConfig =
            serde_json::from_str(r#"{"mode": "linear_interp", "catalog": [6560.501]}"#).unwrap();
        assert_eq!(config.mode, CorrectionMode::LinearInterp);
        assert_eq!(config.catalog.len(), 1);
        assert_eq!(config.smoothness, 1e5);
        assert_eq!(config.asymmetry, 0.95);
    }

    #[test]
    fn invalid_config_aborts() {
        let config = CorrectionConfig {
            asymmetry: 0.0,
            ..Default::default()
        };
        let w: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(matches!(
            remove_atmospheric_lines(&w, &[1.0; 10], &config),
            Err(CorrectionError::InvalidInput { .. })
        ));
    }

    #[test]
    fn flat_spectrum_is_unchanged() {
        let w: Vec<f64> = (0..300).map(|i| 6500.0 + 0.1 * i as f64).collect();
        let y = vec![3.0; 300];
        for mode in [CorrectionMode::LinearInterp, CorrectionMode::ModelFit] {
            let config = CorrectionConfig {
                mode,
                ..Default::default()
            };
            let out = remove_atmospheric_lines(&w, &y, &config).unwrap();
            if mode == CorrectionMode::LinearInterp {
                assert_eq!(out.report.skipped(), 0, "{}", out.report);
            }
            for (c, b) in out.corrected.iter().zip(&out.baseline) {
                assert_abs_diff_eq!(*c, 3.0, epsilon = 1e-6);
                assert_abs_diff_eq!(*b, 3.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn batch_isolates_failures() {
        let good = Spectrum::new(vec![6500.0, 6500.1, 6500.2], vec![1.0, 1.0, 1.0]);
        let bad = Spectrum::new(vec![6500.0, 6500.1], vec![1.0, f64::NAN]);
        let results = correct_batch(&[good, bad], &CorrectionConfig::default());
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
