/// Error types for the data association pipeline.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AssociationError {
    /// Input data is empty or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// The correspondence pool is smaller than the minimal sample.
    #[error("Need at least {required} correspondences, got {actual}")]
    InsufficientData {
        /// Minimal sample size of the selected sampling strategy.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// A transform was fitted on too few or coincident points.
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// A configuration value is out of its valid range.
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
}
