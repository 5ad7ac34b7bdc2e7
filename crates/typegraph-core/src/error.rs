//! Core error taxonomy.
//!
//! Every failure surfaced by the registry, constraint engine, compiler, and
//! store is a variant of [`GraphError`] carrying a structured payload.
//! Adapter I/O failures are wrapped as [`GraphError::Backend`] and never
//! retried inside the core.

use thiserror::Error;

use crate::adapter::BackendError;

/// Which endpoint of an edge failed a typing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSide {
    From,
    To,
}

impl std::fmt::Display for EndpointSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointSide::From => write!(f, "from"),
            EndpointSide::To => write!(f, "to"),
        }
    }
}

/// Errors raised by TypeGraph core operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Properties did not satisfy the kind's schema
    #[error("validation failed for {kind}: {message} (fields: {fields:?})")]
    Validation {
        kind: String,
        fields: Vec<String>,
        message: String,
    },

    /// A uniqueness constraint would be violated
    #[error("uniqueness violation on constraint '{constraint_name}' of {kind} (existing: {existing_id}, new: {new_id})")]
    Uniqueness {
        constraint_name: String,
        kind: String,
        fields: Vec<String>,
        existing_id: String,
        new_id: String,
    },

    /// An edge-cardinality constraint would be violated
    #[error("cardinality '{cardinality}' violated for edge {edge_kind} from {from_kind}:{from_id} ({existing_count} existing)")]
    Cardinality {
        edge_kind: String,
        from_kind: String,
        from_id: String,
        cardinality: String,
        existing_count: u64,
    },

    /// An edge endpoint is not assignable to any declared endpoint kind
    #[error("edge {edge_kind}: {endpoint} endpoint of kind '{actual_kind}' is not assignable to any of {expected_kinds:?}")]
    Endpoint {
        edge_kind: String,
        endpoint: EndpointSide,
        actual_kind: String,
        expected_kinds: Vec<String>,
    },

    /// The same logical id already exists under a disjoint kind
    #[error("node '{node_id}' cannot take kind '{attempted_kind}': disjoint with existing kind '{conflicting_kind}'")]
    Disjoint {
        node_id: String,
        attempted_kind: String,
        conflicting_kind: String,
    },

    /// A restrict-delete node still has live edges
    #[error("cannot delete {kind}:{id}: {edge_count} connected edge(s) of kinds {edge_kinds:?}")]
    RestrictedDelete {
        kind: String,
        id: String,
        edge_count: u64,
        edge_kinds: Vec<String>,
    },

    /// Unknown uniqueness-constraint name on a node kind
    #[error("node kind '{kind}' has no uniqueness constraint named '{constraint_name}'")]
    NodeConstraintNotFound {
        kind: String,
        constraint_name: String,
    },

    /// Unknown match constraint on an edge kind
    #[error("edge kind '{kind}' has no constraint named '{constraint_name}'")]
    EdgeConstraintNotFound {
        kind: String,
        constraint_name: String,
    },

    /// Optimistic-update failure
    #[error("version conflict on {kind}:{id}: expected {expected}, found {actual}")]
    VersionConflict {
        kind: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    /// Malformed temporal input (bad asOf timestamp, inverted validity window)
    #[error("temporal error: {message}")]
    Temporal { message: String },

    /// Query could not be compiled (unreachable alias, cyclic ontology,
    /// hop bounds out of range, unsupported construct)
    #[error("compilation error: {message}")]
    Compilation { message: String },

    /// Adapter I/O failure
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl GraphError {
    /// Create a Validation error.
    pub fn validation(
        kind: impl Into<String>,
        fields: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            kind: kind.into(),
            fields,
            message: message.into(),
        }
    }

    /// Create a Disjoint error.
    pub fn disjoint(
        node_id: impl Into<String>,
        attempted_kind: impl Into<String>,
        conflicting_kind: impl Into<String>,
    ) -> Self {
        Self::Disjoint {
            node_id: node_id.into(),
            attempted_kind: attempted_kind.into(),
            conflicting_kind: conflicting_kind.into(),
        }
    }

    /// Create a Temporal error.
    pub fn temporal(message: impl Into<String>) -> Self {
        Self::Temporal {
            message: message.into(),
        }
    }

    /// Create a Compilation error.
    pub fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation {
            message: message.into(),
        }
    }

    /// Create a NodeConstraintNotFound error.
    pub fn node_constraint_not_found(
        kind: impl Into<String>,
        constraint_name: impl Into<String>,
    ) -> Self {
        Self::NodeConstraintNotFound {
            kind: kind.into(),
            constraint_name: constraint_name.into(),
        }
    }
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::disjoint("a", "Robot", "Person");
        assert!(err.to_string().contains("Robot"));
        assert!(err.to_string().contains("disjoint"));

        let err = GraphError::Uniqueness {
            constraint_name: "by_email".into(),
            kind: "Person".into(),
            fields: vec!["email".into()],
            existing_id: "p1".into(),
            new_id: "p2".into(),
        };
        assert!(err.to_string().contains("uniqueness violation"));
        assert!(err.to_string().contains("by_email"));
    }

    #[test]
    fn test_restricted_delete_payload() {
        let err = GraphError::RestrictedDelete {
            kind: "Book".into(),
            id: "b1".into(),
            edge_count: 2,
            edge_kinds: vec!["hasReview".into()],
        };
        assert!(err.to_string().contains("2 connected edge"));
        assert!(err.to_string().contains("hasReview"));
    }

    #[test]
    fn test_endpoint_side_display() {
        assert_eq!(EndpointSide::From.to_string(), "from");
        assert_eq!(EndpointSide::To.to_string(), "to");
    }
}
