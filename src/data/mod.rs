/// Data layer: core types, loading and export.
///
/// Architecture:
/// ```text
///  .fits / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → LoadedSpectrum (Spectrum + header)
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │  correction   │  baseline → line suppression → reassembly
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  wavelength, original, corrected, baseline → CSV
///   └──────────┘
/// ```

pub mod export;
pub mod fits;
pub mod loader;
pub mod model;
