//! Error types for every kinship operation

use std::path::{Path, PathBuf};

use kinship_scan::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KinshipError {
    #[error("{message}")]
    UserInput { message: String },
    #[error("not a kinship bundle: {0}")]
    NotABundle(String),
    #[error("malformed kinship bundle: {0}")]
    MalformedBundle(String),
    #[error("{}: {error}", path.display())]
    Scan {
        path: PathBuf,
        source_text: String,
        error: ScanError,
    },
    #[error("internal error: {0}")]
    Internal(String),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KinshipError {
    pub fn user(message: impl Into<String>) -> Self {
        KinshipError::UserInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        KinshipError::Internal(message.into())
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        KinshipError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Errors caused by what the user asked for, as opposed to a bug or an
    /// unexpected system failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            KinshipError::UserInput { .. }
                | KinshipError::NotABundle(_)
                | KinshipError::MalformedBundle(_)
                | KinshipError::Scan { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, KinshipError>;

/// Reads a text file, mapping failures to `Io` errors.
pub(crate) fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| KinshipError::io(path, e))
}
