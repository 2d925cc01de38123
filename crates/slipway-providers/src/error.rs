//! Provider error taxonomy.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors from an external provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network failure, rate limit, or 5xx: safe to retry, the entity's
    /// state must not change on this path.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider rejected the request; retrying the same call cannot
    /// succeed.
    #[error("provider rejected the request: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}
