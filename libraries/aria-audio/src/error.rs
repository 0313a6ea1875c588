/// Pipeline error types
use thiserror::Error;

/// Result type alias using `PipelineError`
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors reported by the filter pipeline.
///
/// Configuration problems (`UnknownStage`, `BadOption`, `DuplicateLabel`)
/// and addressing problems (`NoSuchLabel`) leave the chain untouched; the
/// failed call is a no-op. `Negotiation` marks the pipeline failed but keeps
/// the chain intact so the caller can modify it and initialize again.
/// `Processing` marks the pipeline failed; recovery is the caller's decision.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An add request named a stage type the registry does not know
    #[error("unknown stage type: {0}")]
    UnknownStage(String),

    /// A stage option was unrecognized or malformed
    #[error("invalid option '{option}' for stage '{stage}': {message}")]
    BadOption {
        /// Stage type name the option was given to
        stage: String,
        /// The offending option key
        option: String,
        /// What was wrong with it
        message: String,
    },

    /// An add request reused a label already present in the chain
    #[error("duplicate stage label '{0}'")]
    DuplicateLabel(String),

    /// Two adjacent stages could not agree on a format, even after one
    /// automatic conversion attempt
    #[error("format negotiation failed at stage '{stage}': {message}")]
    Negotiation {
        /// Display name of the stage that rejected its input
        stage: String,
        /// Negotiation detail
        message: String,
    },

    /// A stage reported an unrecoverable fault while processing
    #[error("processing failed in stage '{stage}': {message}")]
    Processing {
        /// Display name of the faulting stage
        stage: String,
        /// Fault detail
        message: String,
    },

    /// A label-addressed operation found no stage with that label
    #[error("no stage labeled '{0}' in the chain")]
    NoSuchLabel(String),

    /// Frames were pushed or pulled before a successful initialize
    #[error("pipeline is not initialized")]
    NotInitialized,
}
