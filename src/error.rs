use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Stage – which part of the pipeline raised an error
// ---------------------------------------------------------------------------

/// Pipeline stage, used to name the failing step in user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Baseline,
    LineSuppression,
    Reassembly,
    Reference,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "input validation",
            Stage::Baseline => "baseline estimation",
            Stage::LineSuppression => "line suppression",
            Stage::Reassembly => "reassembly",
            Stage::Reference => "reference spectrum",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// CorrectionError
// ---------------------------------------------------------------------------

/// Errors raised by the correction engine.
///
/// `InvalidInput` and `ShapeMismatch` abort the whole pipeline.
/// `BoundaryMissing` and `FitConvergence` are per-line: the line suppressor
/// records them and moves on to the next catalog entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrectionError {
    #[error("{stage}: invalid input: {reason}")]
    InvalidInput { stage: Stage, reason: String },

    #[error("line at {position:.3} Å: no interpolation anchor on the {side} side of the window")]
    BoundaryMissing { position: f64, side: Side },

    #[error("line at {position:.3} Å: Voigt fit failed: {reason}")]
    FitConvergence { position: f64, reason: String },

    #[error("{stage}: shape mismatch: expected {expected} samples, got {actual}")]
    ShapeMismatch {
        stage: Stage,
        expected: usize,
        actual: usize,
    },

    #[error("{stage}: no samples inside the normalization window {start}–{end} Å")]
    DiagnosticWindowEmpty { stage: Stage, start: f64, end: f64 },
}

impl CorrectionError {
    pub(crate) fn invalid(stage: Stage, reason: impl Into<String>) -> Self {
        CorrectionError::InvalidInput {
            stage,
            reason: reason.into(),
        }
    }

    /// Whether this error is recoverable by skipping a single catalog line.
    pub fn is_per_line(&self) -> bool {
        matches!(
            self,
            CorrectionError::BoundaryMissing { .. } | CorrectionError::FitConvergence { .. }
        )
    }
}

/// Side of a correction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

pub type CorrectionResult<T> = Result<T, CorrectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborting_errors_name_the_stage() {
        let err = CorrectionError::invalid(Stage::Baseline, "fewer than 2 samples");
        assert_eq!(
            err.to_string(),
            "baseline estimation: invalid input: fewer than 2 samples"
        );
        assert!(!err.is_per_line());
    }

    #[test]
    fn boundary_errors_are_per_line() {
        let err = CorrectionError::BoundaryMissing {
            position: 6612.55,
            side: Side::Right,
        };
        assert!(err.is_per_line());
        assert!(err.to_string().contains("right side"));
    }
}
