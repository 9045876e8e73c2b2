use serde::{Deserialize, Serialize};

/// Telluric (mostly H₂O) absorption lines around Hα, in Å.
pub const DEFAULT_TELLURIC_LINES: [f64; 31] = [
    6508.603, 6511.999, 6512.242, 6514.727, 6516.437, 6516.543, 6516.625, 6519.467, 6523.850,
    6532.459, 6534.000, 6534.014, 6536.726, 6542.317, 6543.912, 6547.705, 6548.627, 6552.632,
    6557.181, 6558.149, 6560.501, 6564.208, 6568.806, 6572.087, 6574.860, 6580.794, 6586.559,
    6594.375, 6599.365, 6605.566, 6612.550,
];

/// Balmer series markers (Hδ, Hγ, Hβ, Hα), in Å.
pub const BALMER_LINES: [f64; 4] = [4101.0, 4340.0, 4861.0, 6563.0];

/// A wavelength at which Earth's atmosphere absorbs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelluricLine {
    /// Rest wavelength in Å.
    pub position: f64,
}

impl TelluricLine {
    pub const fn new(position: f64) -> Self {
        TelluricLine { position }
    }
}

/// Ordered list of telluric lines handed to the line suppressor.
///
/// Entries are processed in the stored order; duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelluricCatalog {
    lines: Vec<TelluricLine>,
}

impl Default for TelluricCatalog {
    fn default() -> Self {
        Self::from_positions(DEFAULT_TELLURIC_LINES)
    }
}

impl TelluricCatalog {
    pub fn from_positions(positions: impl IntoIterator<Item = f64>) -> Self {
        TelluricCatalog {
            lines: positions.into_iter().map(TelluricLine::new).collect(),
        }
    }

    pub fn lines(&self) -> &[TelluricLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelluricLine> {
        self.lines.iter()
    }

    /// Lines whose position lies within `[start, end]`.
    pub fn within(&self, start: f64, end: f64) -> impl Iterator<Item = &TelluricLine> {
        self.lines
            .iter()
            .filter(move |l| l.position >= start && l.position <= end)
    }
}
