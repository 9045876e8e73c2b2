use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value as JsonValue;

use super::fits;
use super::model::{LoadedSpectrum, MetadataValue, Spectrum, SpectrumHeader};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a 1D spectrum from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.fits` / `.fit` / `.fts` – primary HDU with linear `CRVAL1`/`CDELT1` axis
/// * `.json` – `{ "wavelength": [...], "intensity": [...], "header": {...} }`
/// * `.csv`  – `wavelength` and `intensity` columns, one sample per row
pub fn load_file(path: &Path) -> Result<LoadedSpectrum> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let loaded = match ext.as_str() {
        "fits" | "fit" | "fts" => fits::read_fits(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    log::debug!(
        "loaded {} samples and {} header cards from {}",
        loaded.spectrum.len(),
        loaded.header.len(),
        path.display()
    );
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema:
///
/// ```json
/// {
///   "wavelength": [6500.0, 6500.1, ...],
///   "intensity":  [1.02,   0.99,   ...],
///   "header": { "OBJNAME": "gam Cas", "BSS_ITRP": 14000 }
/// }
/// ```
///
/// `header` is optional.
fn load_json(path: &Path) -> Result<LoadedSpectrum> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let obj = root
        .as_object()
        .context("Expected top-level JSON object")?;

    let wavelength = json_array_to_f64(obj.get("wavelength"), "wavelength")?;
    let intensity = json_array_to_f64(obj.get("intensity"), "intensity")?;

    if wavelength.len() != intensity.len() {
        bail!(
            "wavelength has {} values but intensity has {}",
            wavelength.len(),
            intensity.len()
        );
    }

    let mut header = SpectrumHeader::default();
    if let Some(cards) = obj.get("header") {
        let cards = cards.as_object().context("'header' is not a JSON object")?;
        for (key, val) in cards {
            header.insert(key.clone(), json_to_metadata(val));
        }
    }

    Ok(LoadedSpectrum {
        spectrum: Spectrum::new(wavelength, intensity),
        header,
    })
}

fn json_array_to_f64(val: Option<&JsonValue>, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("{col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with a `wavelength` and an `intensity` column.
/// Other columns are ignored, so files written by [`super::export`] load back.
fn load_csv(path: &Path) -> Result<LoadedSpectrum> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let w_idx = headers
        .iter()
        .position(|h| h == "wavelength")
        .context("CSV missing 'wavelength' column")?;
    let i_idx = headers
        .iter()
        .position(|h| h == "intensity")
        .context("CSV missing 'intensity' column")?;

    let mut wavelength = Vec::new();
    let mut intensity = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        wavelength.push(parse_field(record.get(w_idx), row_no, "wavelength")?);
        intensity.push(parse_field(record.get(i_idx), row_no, "intensity")?);
    }

    Ok(LoadedSpectrum {
        spectrum: Spectrum::new(wavelength, intensity),
        header: SpectrumHeader::default(),
    })
}

fn parse_field(field: Option<&str>, row: usize, col: &str) -> Result<f64> {
    let tok = field.unwrap_or("").trim();
    tok.parse::<f64>()
        .with_context(|| format!("Row {row}, {col}: '{tok}' is not a number"))
}
