use thiserror::Error;

/// Result type for cellmask operations
pub type Result<T> = std::result::Result<T, CellMaskError>;

/// Errors that can occur while editing, measuring or exporting label masks
#[derive(Error, Debug)]
pub enum CellMaskError {
    #[error("Invalid label mask: {0}")]
    InvalidMask(String),

    #[error("Unknown region {region} in image '{image}'")]
    UnknownRegion { image: String, region: u32 },

    #[error("Shape encloses no pixels: {0}")]
    EmptyShape(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Image index {index} out of range (batch has {len} images)")]
    ImageIndex { index: usize, len: usize },

    #[error("Image '{0}' is already part of the session")]
    DuplicateImage(String),

    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid ROI data: {0}")]
    RoiFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),
}

impl CellMaskError {
    /// Returns true if the error only rejects a single edit and leaves the
    /// session usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownRegion { .. } | Self::EmptyShape(_) | Self::ImageIndex { .. }
        )
    }

    /// Returns true if the error aborts a save before anything was written
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Non-fatal conditions reported alongside a successful edit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditWarning {
    /// The polygon was not closed within tolerance and was closed implicitly
    #[error("Shape not closed (gap of {gap:.1} px), closing it implicitly")]
    OpenShape { gap: f64 },
}
