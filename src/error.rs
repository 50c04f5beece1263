//! Error types for groupline
//!
//! One error enum covers the whole public boundary. Coordination-service
//! error kinds (`NoNode`, `NodeExists`, `BadVersion`) are first-class
//! variants because the client folds them into sentinels in several places:
//! a missing offset node becomes [`INVALID_OFFSET`], a claim that races an
//! existing owner reports contention instead of failure, and purging an
//! already-purged notification succeeds.
//!
//! [`INVALID_OFFSET`]: crate::types::INVALID_OFFSET

use thiserror::Error;

/// Result type alias for groupline operations
pub type Result<T> = std::result::Result<T, GrouplineError>;

/// Errors surfaced by the coordination core
#[derive(Debug, Error)]
pub enum GrouplineError {
    /// Failed to establish or keep a coordination-service session
    #[error("Connection error: {0}")]
    Connection(String),

    /// A required node does not exist
    #[error("No node: {0}")]
    NoNode(String),

    /// A node unexpectedly exists (ownership contention surfaces as `Ok(false)`
    /// from the claim call, never as this variant)
    #[error("Node exists: {0}")]
    NodeExists(String),

    /// Version mismatch during a conditional set or delete
    #[error("Version conflict: {0}")]
    BadVersion(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Non-JSON payload could not be parsed (offset text, id node names)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Unknown assignment strategy, violated assignor precondition, or
    /// invalid configuration. Fatal: never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Residual coordination failure with operation context
    #[error("Coordinator error: {0}")]
    Coordinator(String),
}

impl GrouplineError {
    pub fn connection(detail: impl Into<String>) -> Self {
        Self::Connection(detail.into())
    }

    pub fn no_node(path: impl Into<String>) -> Self {
        Self::NoNode(path.into())
    }

    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::NodeExists(path.into())
    }

    pub fn bad_version(path: impl Into<String>) -> Self {
        Self::BadVersion(path.into())
    }

    pub fn invalid_data(detail: impl Into<String>) -> Self {
        Self::InvalidData(detail.into())
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }

    pub fn coordinator(detail: impl Into<String>) -> Self {
        Self::Coordinator(detail.into())
    }

    /// Returns true for the "node is missing" service error
    pub fn is_no_node(&self) -> bool {
        matches!(self, Self::NoNode(_))
    }

    /// Returns true for the "node already exists" service error
    pub fn is_node_exists(&self) -> bool {
        matches!(self, Self::NodeExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GrouplineError::no_node("/consumers/g/ids/c1");
        assert_eq!(err.to_string(), "No node: /consumers/g/ids/c1");
        assert!(err.is_no_node());
        assert!(!err.is_node_exists());
    }

    #[test]
    fn test_serialization_from() {
        let json_err = serde_json::from_str::<i64>("not a number").unwrap_err();
        let err: GrouplineError = json_err.into();
        assert!(matches!(err, GrouplineError::Serialization(_)));
    }
}
