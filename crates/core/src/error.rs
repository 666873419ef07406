//! Error types for LandPulse

use thiserror::Error;

/// Main error type for LandPulse operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or unsupported CRS, invalid resolution, degenerate geometry
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Operands of a pixel-wise operation do not share grid geometry.
    ///
    /// `index` identifies the offending operand when the operation takes a list.
    #[error("Grid mismatch{}: {reason}", index.map(|i| format!(" at input {i}")).unwrap_or_default())]
    GridMismatch { index: Option<usize>, reason: String },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("External service '{service}' failed: {reason}")]
    ExternalService { service: String, reason: String },

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::GridMismatch`] between two operands
    pub fn mismatch(reason: impl Into<String>) -> Self {
        Error::GridMismatch {
            index: None,
            reason: reason.into(),
        }
    }

    /// Shorthand for a collaborator failure
    pub fn external(service: impl Into<String>, reason: impl ToString) -> Self {
        Error::ExternalService {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for Error {
    fn from(e: gdal::errors::GdalError) -> Self {
        Error::Gdal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {e}"))
    }
}

/// Result type alias for LandPulse operations
pub type Result<T> = std::result::Result<T, Error>;
