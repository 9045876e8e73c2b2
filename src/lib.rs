pub mod correction;
pub mod data;
pub mod error;
pub mod identifiers;
pub mod reference;

pub use correction::catalog::{TelluricCatalog, TelluricLine, BALMER_LINES};
pub use correction::suppress::{CorrectionMode, LineOutcome, SuppressionReport};
pub use correction::{
    correct_batch, correct_spectrum, remove_atmospheric_lines, CorrectionConfig, CorrectionOutput,
};
pub use data::model::{LoadedSpectrum, ObservationInfo, Spectrum};
pub use error::{CorrectionError, Stage};
