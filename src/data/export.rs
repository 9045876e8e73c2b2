use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;

#[derive(Serialize)]
struct CorrectedRow {
    wavelength: f64,
    intensity: f64,
    corrected: f64,
    baseline: f64,
}

/// Write original, corrected and baseline curves side by side as CSV.
///
/// The `wavelength`/`intensity` columns make the file loadable again
/// through [`super::loader::load_file`].
pub fn write_corrected_csv(
    path: &Path,
    wavelength: &[f64],
    original: &[f64],
    corrected: &[f64],
    baseline: &[f64],
) -> Result<()> {
    let n = wavelength.len();
    if original.len() != n || corrected.len() != n || baseline.len() != n {
        bail!(
            "column lengths differ: wavelength {n}, original {}, corrected {}, baseline {}",
            original.len(),
            corrected.len(),
            baseline.len()
        );
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for i in 0..n {
        writer
            .serialize(CorrectedRow {
                wavelength: wavelength[i],
                intensity: original[i],
                corrected: corrected[i],
                baseline: baseline[i],
            })
            .with_context(|| format!("writing row {i}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

#[derive(Serialize)]
struct SpectrumRow {
    wavelength: f64,
    intensity: f64,
}

/// Write a plain two-column spectrum.
pub fn write_spectrum_csv(path: &Path, wavelength: &[f64], intensity: &[f64]) -> Result<()> {
    if wavelength.len() != intensity.len() {
        bail!(
            "wavelength has {} values but intensity has {}",
            wavelength.len(),
            intensity.len()
        );
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for (&wavelength, &intensity) in wavelength.iter().zip(intensity) {
        writer.serialize(SpectrumRow {
            wavelength,
            intensity,
        })?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}
