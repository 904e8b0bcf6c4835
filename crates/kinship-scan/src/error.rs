//! Scan error types

use thiserror::Error;

use crate::token::Span;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("unexpected end of input, expecting a closing back-quote")]
    UnterminatedTemplate { span: Span },
    #[error("unexpected end of input, expecting the end of a block comment")]
    UnterminatedComment { span: Span },
}

impl ScanError {
    /// Span from the opening delimiter to the end of input.
    pub fn span(&self) -> Span {
        match self {
            ScanError::UnterminatedTemplate { span } | ScanError::UnterminatedComment { span } => {
                *span
            }
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
