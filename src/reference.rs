//! Comparison spectra from the reference library.
//!
//! Fetching the library file is left to the caller; this module decides which
//! smoothing applies, smooths and normalizes the flux, and maps HD
//! identifiers to library entries.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::{CorrectionError, CorrectionResult, Stage};

/// Resolving power at and above which the high-resolution variant is used.
pub const HIGH_RESOLUTION_THRESHOLD: i64 = 5000;

/// Normalization window, Å. Continuum next to Hα.
pub const NORMALIZATION_WINDOW: (f64, f64) = (6620.0, 6640.0);

/// Remote location of library spectra; `{id}` is the library entry id.
pub const ARCHIVE_URL_TEMPLATE: &str =
    "https://royer.se/melchiors/spectra/00{id}_melchiors_spectrum.fits.gz";

// ---------------------------------------------------------------------------
// Resolution class
// ---------------------------------------------------------------------------

/// Which display variant of the reference spectrum matches the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionClass {
    HighResolution,
    LowResolution,
}

impl ResolutionClass {
    pub fn from_resolution(resolution: i64) -> Self {
        if resolution >= HIGH_RESOLUTION_THRESHOLD {
            ResolutionClass::HighResolution
        } else {
            ResolutionClass::LowResolution
        }
    }

    /// Standard deviation of the smoothing kernel, in samples.
    pub fn kernel_stddev(self) -> f64 {
        match self {
            ResolutionClass::HighResolution => 1.0,
            ResolutionClass::LowResolution => 80.0,
        }
    }
}

impl fmt::Display for ResolutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionClass::HighResolution => f.write_str("high resolution"),
            ResolutionClass::LowResolution => f.write_str("low resolution"),
        }
    }
}

// ---------------------------------------------------------------------------
// Smoothing & normalization
// ---------------------------------------------------------------------------

/// Unit-sum Gaussian kernel sampled at integer offsets.
///
/// Width is `8·stddev` rounded up to the next odd integer. `stddev` must be
/// positive and finite.
pub fn gaussian_kernel(stddev: f64) -> CorrectionResult<Vec<f64>> {
    if !(stddev.is_finite() && stddev > 0.0) {
        return Err(CorrectionError::invalid(
            Stage::Reference,
            format!("kernel standard deviation must be positive, got {stddev}"),
        ));
    }
    let mut size = (8.0 * stddev).ceil() as usize;
    if size % 2 == 0 {
        size += 1;
    }
    let half = (size / 2) as f64;
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - half;
            (-x * x / (2.0 * stddev * stddev)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    Ok(kernel)
}

/// Same-length convolution; samples beyond either end count as zero.
pub fn convolve_zero_fill(data: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = data.len() as isize;
    let half = (kernel.len() / 2) as isize;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, &kv)| {
                    let j = i + k as isize - half;
                    (0..n).contains(&j).then(|| kv * data[j as usize])
                })
                .sum::<f64>()
        })
        .collect()
}

/// A smoothed, normalized comparison spectrum ready for overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpectrum {
    pub wavelength: Vec<f64>,
    pub flux: Vec<f64>,
    pub class: ResolutionClass,
}

/// Smooth the library flux for `class` and divide it by its mean over
/// [`NORMALIZATION_WINDOW`].
pub fn prepare_reference(
    wavelength: &[f64],
    flux: &[f64],
    class: ResolutionClass,
) -> CorrectionResult<ReferenceSpectrum> {
    let stage = Stage::Reference;
    if wavelength.len() != flux.len() {
        return Err(CorrectionError::ShapeMismatch {
            stage,
            expected: wavelength.len(),
            actual: flux.len(),
        });
    }
    if let Some(i) = flux.iter().position(|v| !v.is_finite()) {
        return Err(CorrectionError::invalid(stage, format!("flux[{i}] is not finite")));
    }

    let smoothed = convolve_zero_fill(flux, &gaussian_kernel(class.kernel_stddev())?);

    let (start, end) = NORMALIZATION_WINDOW;
    let in_window: Vec<f64> = wavelength
        .iter()
        .zip(&smoothed)
        .filter(|(w, _)| **w >= start && **w <= end)
        .map(|(_, v)| *v)
        .collect();
    if in_window.is_empty() {
        return Err(CorrectionError::DiagnosticWindowEmpty { stage, start, end });
    }
    let mean = in_window.iter().sum::<f64>() / in_window.len() as f64;
    if mean == 0.0 || !mean.is_finite() {
        return Err(CorrectionError::invalid(
            stage,
            format!("mean flux over {start}–{end} Å is {mean}"),
        ));
    }

    log::debug!("reference normalized by {mean:.4} ({class})");
    Ok(ReferenceSpectrum {
        wavelength: wavelength.to_vec(),
        flux: smoothed.into_iter().map(|v| v / mean).collect(),
        class,
    })
}

// ---------------------------------------------------------------------------
// Library index
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IndexRow {
    #[serde(rename = "Name1")]
    name: String,
    #[serde(rename = "ID")]
    id: u32,
}

/// HD identifier → reference library entry id.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    entries: BTreeMap<String, u32>,
}

impl ReferenceIndex {
    /// Read a CSV export of the library table (`Name1` and `ID` columns).
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening reference index {}", path.display()))?;
        Self::from_csv_reader(reader)
    }

    pub fn from_csv_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (row_no, row) in reader.deserialize::<IndexRow>().enumerate() {
            let row = row.with_context(|| format!("reference index row {row_no}"))?;
            // First occurrence wins, as in a lookup on the first matching row.
            entries
                .entry(normalize_name(&row.name))
                .or_insert(row.id);
        }
        Ok(ReferenceIndex { entries })
    }

    pub fn lookup(&self, hd_identifier: &str) -> Option<u32> {
        self.entries.get(&normalize_name(hd_identifier)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collapse runs of whitespace so `"HD  5394"` and `"HD 5394"` match.
fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// URL of a library spectrum.
pub fn archive_url(id: u32) -> String {
    ARCHIVE_URL_TEMPLATE.replace("{id}", &id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn resolution_threshold_is_inclusive() {
        assert_eq!(
            ResolutionClass::from_resolution(5000),
            ResolutionClass::HighResolution
        );
        assert_eq!(
            ResolutionClass::from_resolution(4999),
            ResolutionClass::LowResolution
        );
    }

    #[test]
    fn kernel_sizes_and_normalization() {
        let k = gaussian_kernel(1.0).unwrap();
        assert_eq!(k.len(), 9);
        assert_relative_eq!(k.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_eq!(gaussian_kernel(80.0).unwrap().len(), 641);
        // Symmetric, peaked at the centre.
        assert_abs_diff_eq!(k[0], k[8]);
        assert!(k[4] > k[3]);
    }

    #[test]
    fn kernel_rejects_non_positive_width() {
        for stddev in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                gaussian_kernel(stddev),
                Err(CorrectionError::InvalidInput {
                    stage: Stage::Reference,
                    ..
                })
            ));
        }
    }

    #[test]
    fn zero_fill_attenuates_edges_only() {
        let data = vec![2.0; 50];
        let out = convolve_zero_fill(&data, &gaussian_kernel(1.0).unwrap());
        assert_abs_diff_eq!(out[25], 2.0, epsilon = 1e-12);
        assert!(out[0] < 2.0);
    }

    #[test]
    fn reference_is_normalized_over_window() {
        let wavelength: Vec<f64> = (0..400).map(|i| 6550.0 + 0.25 * i as f64).collect();
        let flux = vec![4.0; 400];
        let reference =
            prepare_reference(&wavelength, &flux, ResolutionClass::HighResolution).unwrap();
        let mid = wavelength.iter().position(|&w| w >= 6630.0).unwrap();
        assert_abs_diff_eq!(reference.flux[mid], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(reference.flux[200], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn missing_window_is_reported() {
        let wavelength: Vec<f64> = (0..20).map(|i| 4800.0 + i as f64).collect();
        let err = prepare_reference(&wavelength, &[1.0; 20], ResolutionClass::LowResolution)
            .unwrap_err();
        assert!(matches!(err, CorrectionError::DiagnosticWindowEmpty { .. }));
    }

    #[test]
    fn index_lookup_and_url() {
        let data = "Name1,ID\nHD 5394,123\nHD 37202,45\nHD 5394,999\n";
        let index = ReferenceIndex::from_csv_reader(csv::Reader::from_reader(data.as_bytes()))
            .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup("HD  5394"), Some(123));
        assert_eq!(index.lookup("HD 1"), None);
        assert_eq!(
            archive_url(123),
            "https://royer.se/melchiors/spectra/00123_melchiors_spectrum.fits.gz"
        );
    }
}
