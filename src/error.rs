//! Error types for the star protocol.

use crate::models::{MessageCategory, NodeId, Role};
use thiserror::Error;

/// Errors surfaced by the coordinators, the readiness handshake and the
/// transport.
#[derive(Error, Debug)]
pub enum StarError {
    /// Entrypoint invoked on a node holding the other role.
    #[error("Node is configured as {actual}. Unable to execute command associated to {expected}.")]
    RoleMismatch { expected: Role, actual: Role },

    /// Supplied strategy could not be instantiated.
    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    /// Readiness handshake never completed.
    #[error("Could not contact partner node(s) {} after {attempts} readiness attempt(s)", format_ids(.missing))]
    UnreachablePartner { missing: Vec<NodeId>, attempts: u32 },

    /// A bounded wait ended without the required response.
    #[error("Timed out waiting for {category} from {node} after {attempts} attempt(s)")]
    TransportTimeout {
        node: NodeId,
        category: MessageCategory,
        attempts: u32,
    },

    /// The transport collaborator failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A user-supplied strategy returned an error.
    #[error("Strategy failed: {0}")]
    Strategy(String),

    /// The storage collaborator rejected the final result.
    #[error("Final result submission failed: {0}")]
    Submission(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StarError {
    /// Configuration errors are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StarError::RoleMismatch { .. } | StarError::InvalidStrategy(_)
        )
    }
}

fn format_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, StarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mismatch_message() {
        let err = StarError::RoleMismatch {
            expected: Role::Aggregator,
            actual: Role::Analyzer,
        };
        assert_eq!(
            err.to_string(),
            "Node is configured as analyzer. Unable to execute command associated to aggregator."
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unreachable_lists_missing() {
        let err = StarError::UnreachablePartner {
            missing: vec!["a1".into(), "a3".into()],
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "Could not contact partner node(s) a1, a3 after 4 readiness attempt(s)"
        );
        assert!(!err.is_configuration());
    }
}
