//! Error types returned at the crate boundary.
//!
//! Every public entry point returns [`Result<T>`]; nothing in this crate
//! panics on well-formed input. See the module docs on [`crate::index`] for
//! the state machine these errors are raised against.

use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by `hnswann`'s public API.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A vector's length did not match the index's fixed dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: u32, got: usize },

    /// The requested operation is not valid in the index's current state.
    #[error("invalid state: cannot {action} while index is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    /// An argument failed validation (e.g. `k == 0`, `ef < k`, `m == 0`).
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    /// I/O failure while reading or writing a model file.
    #[error("I/O error at {path}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// The file being loaded is not a valid or compatible model.
    #[error("incompatible model file: {reason}")]
    IncompatibleFormat { reason: String },

    /// Allocation failed during construction; the build was abandoned.
    #[error("out of memory during build")]
    OutOfMemory,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { source, path }
    }

    pub(crate) fn invalid_arg(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_state(action: &'static str, state: &'static str) -> Self {
        Error::InvalidState { action, state }
    }
}

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
