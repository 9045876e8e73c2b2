use std::fmt;

use crate::error::{CorrectionError, CorrectionResult, Stage};

// ---------------------------------------------------------------------------
// MetadataValue – a single header card value
// ---------------------------------------------------------------------------

/// A dynamically-typed header value, as found in FITS header cards.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Integer view. Floats are *not* truncated: a resolution written as
    /// `5000.0` is not an integer card.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – wavelength / intensity pair
// ---------------------------------------------------------------------------

/// A 1D spectrum: index-aligned wavelength (Å, ascending) and intensity axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub wavelength: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl Spectrum {
    pub fn new(wavelength: Vec<f64>, intensity: Vec<f64>) -> Self {
        Spectrum {
            wavelength,
            intensity,
        }
    }

    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }

    /// Check the invariants every correction stage relies on: at least two
    /// samples, equal lengths, finite values and strictly increasing
    /// wavelengths.
    pub fn validate(&self) -> CorrectionResult<()> {
        validate_arrays(&self.wavelength, &self.intensity)
    }
}

pub(crate) fn validate_arrays(wavelength: &[f64], intensity: &[f64]) -> CorrectionResult<()> {
    let stage = Stage::Validation;
    if wavelength.len() != intensity.len() {
        return Err(CorrectionError::invalid(
            stage,
            format!(
                "wavelength has {} samples but intensity has {}",
                wavelength.len(),
                intensity.len()
            ),
        ));
    }
    if intensity.len() < 2 {
        return Err(CorrectionError::invalid(
            stage,
            format!("spectrum needs at least 2 samples, got {}", intensity.len()),
        ));
    }
    if let Some(i) = intensity.iter().position(|v| !v.is_finite()) {
        return Err(CorrectionError::invalid(
            stage,
            format!("intensity[{i}] is not finite"),
        ));
    }
    if let Some(i) = wavelength.iter().position(|v| !v.is_finite()) {
        return Err(CorrectionError::invalid(
            stage,
            format!("wavelength[{i}] is not finite"),
        ));
    }
    if let Some(i) = wavelength.windows(2).position(|w| w[1] <= w[0]) {
        return Err(CorrectionError::invalid(
            stage,
            format!("wavelength is not strictly increasing at index {}", i + 1),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Header & observation info
// ---------------------------------------------------------------------------

/// Ordered key/value header, as read from the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumHeader {
    pub cards: Vec<(String, MetadataValue)>,
}

impl SpectrumHeader {
    /// Last value stored under `key` (FITS allows repeats; the last one wins).
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.cards
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MetadataValue::as_f64)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) {
        self.cards.push((key.into(), value));
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// The handful of header keys the viewer shows alongside a spectrum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationInfo {
    pub object: Option<String>,
    pub date_obs: Option<String>,
    pub instrument: Option<String>,
    pub observer: Option<String>,
    /// Spectral resolving power, only when the header stores it as an integer.
    pub resolution: Option<i64>,
}

impl ObservationInfo {
    pub fn from_header(header: &SpectrumHeader) -> Self {
        let text = |key: &str| {
            header
                .get(key)
                .and_then(MetadataValue::as_str)
                .map(|s| s.trim().to_string())
        };
        ObservationInfo {
            object: text("OBJNAME"),
            date_obs: text("DATE-OBS"),
            instrument: text("BSS_INST"),
            observer: text("OBSERVER"),
            resolution: header.get("BSS_ITRP").and_then(MetadataValue::as_i64),
        }
    }

    /// `"object, date, instrument, observer"`; missing fields are left out.
    pub fn title(&self) -> String {
        [
            &self.object,
            &self.date_obs,
            &self.instrument,
            &self.observer,
        ]
        .iter()
        .filter_map(|v| v.as_deref())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// A spectrum together with the header it was read from.
#[derive(Debug, Clone)]
pub struct LoadedSpectrum {
    pub spectrum: Spectrum,
    pub header: SpectrumHeader,
}

impl LoadedSpectrum {
    pub fn info(&self) -> ObservationInfo {
        ObservationInfo::from_header(&self.header)
    }
}
