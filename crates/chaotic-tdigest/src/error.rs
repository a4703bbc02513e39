//! Error types for digest construction and parsing.

use thiserror::Error;

/// Result type alias for digest operations.
pub type DigestResult<T> = Result<T, DigestError>;

/// Errors reported by the digest.
///
/// Statistical degeneracies (an empty digest, a NaN quantile) are not
/// errors; they surface as NaN from the query methods.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DigestError {
    #[error("non-finite sample value: {0}")]
    NonFinite(f64),

    #[error("sample count must be positive, got {0}")]
    InvalidCount(i64),

    #[error("{0} would overflow")]
    Overflow(&'static str),

    #[error("malformed digest record ({field}): {reason}")]
    Malformed {
        field: &'static str,
        reason: String,
    },
}

impl DigestError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            field,
            reason: reason.into(),
        }
    }
}
