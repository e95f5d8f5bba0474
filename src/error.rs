//! Error types for spectral estimation and fitting.

use thiserror::Error;

/// Result type for spectral operations
pub type SpectraResult<T> = Result<T, SpectraError>;

/// Errors reported by section construction, spectral estimation, averaging,
/// and subrange fitting. All failures are synchronous; a failed segment or
/// fit aborts the whole call.
#[derive(Error, Debug)]
pub enum SpectraError {
    /// A caller-supplied parameter is out of range or inconsistent
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Parallel arrays sharing an axis disagree on length
    #[error("length mismatch for {name}: expected {expected}, got {actual}")]
    ShapeMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An operation needs a field the input was computed without
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Flow speed is zero or non-finite, so the spatial gradient is undefined
    #[error("degenerate flow speed at time index {time}, sensor index {sensor}")]
    DegenerateFlow { time: usize, sensor: usize },

    /// The fitting band selects no frequency points
    #[error("no frequencies in fitting band [{fmin}, {fmax}]")]
    EmptyBand { fmin: f64, fmax: f64 },
}
