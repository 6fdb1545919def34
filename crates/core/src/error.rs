//! Policy data error model.

use thiserror::Error;

/// Result type used at the policy storage boundary.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Failure to turn stored policy data into something the engine can evaluate.
///
/// These errors are raised while parsing records, never while evaluating an
/// already-parsed policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A rule set or record failed to parse or validate.
    #[error("malformed policy: {0}")]
    Malformed(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced policy record does not exist.
    #[error("policy not found: {0}")]
    NotFound(String),
}

impl PolicyError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether the error means the stored data itself is corrupt.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::InvalidId(_))
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
