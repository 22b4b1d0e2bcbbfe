//! Error taxonomy shared by the core components.

use thiserror::Error;

/// Errors surfaced by the booking, assignment and presence components.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed request data; user-correctable.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown user or driver; not retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost race on a conditional update. Retryable by the caller.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Connection presented no usable identity.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Durable store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl DispatchError {
    /// Whether the caller may usefully retry the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(DispatchError::Conflict("race".into()).is_retryable());
        assert!(!DispatchError::NotFound("d-1".into()).is_retryable());
        assert!(!DispatchError::Validation("bad".into()).is_retryable());
    }
}
