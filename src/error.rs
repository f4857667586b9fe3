//! Error taxonomy shared by staging and artifact fetching

use crate::runtime::RuntimeError;
use thiserror::Error;

/// Errors returned by [`Stager`](crate::stager::Stager) operations and the archive helpers
#[derive(Debug, Error)]
pub enum Error {
    /// The stage request was malformed (no buildpacks, unreadable source, empty name)
    #[error("Invalid stage request: {0}")]
    Validation(String),

    /// A container runtime call failed
    #[error("Container runtime failed to {operation}: {source}")]
    ContainerRuntime {
        operation: &'static str,
        #[source]
        source: RuntimeError,
    },

    /// No buildpack's detect step accepted the application
    #[error("None of the buildpacks detected a compatible application")]
    BuildpackNotDetected,

    /// Compile or release exited non-zero
    #[error("Staging failed with exit status {exit_code}")]
    StagingFailed { exit_code: i64, output: String },

    /// A requested file or archive entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Staging was cancelled before the container exited
    #[error("Staging was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Buildpack release output could not be parsed or metadata could not be rendered
    #[error("Malformed staging metadata: {0}")]
    Metadata(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a mapper that tags a runtime failure with the operation that produced it.
    ///
    /// Missing paths surface as [`Error::NotFound`] rather than a runtime failure.
    pub(crate) fn runtime(operation: &'static str) -> impl FnOnce(RuntimeError) -> Error {
        move |source| match source {
            RuntimeError::PathNotFound(path) => Error::NotFound(path),
            source => Error::ContainerRuntime { operation, source },
        }
    }
}
