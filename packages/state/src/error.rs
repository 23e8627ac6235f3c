//! Error types for the state engine

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    /// Key is not live in the version visible to the caller
    #[error("Stale node reference: {0}")]
    StaleReference(String),

    #[error("Read-only violation: {0}")]
    ReadOnlyViolation(String),

    #[error("Key collision: {0} is already live in the draft")]
    KeyCollision(String),

    #[error("Infinite transform recursion: no fixed point after {passes} passes")]
    TransformDivergence { passes: usize },

    #[error("Reconciliation failure: {0}")]
    ReconciliationFailure(String),

    #[error("Node type not registered: {0}")]
    UnknownNodeType(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl EditorError {
    /// Short label handed to the error collaborator alongside the error
    pub fn classification(&self) -> &'static str {
        match self {
            EditorError::StaleReference(_) => "stale reference",
            EditorError::ReadOnlyViolation(_) => "read-only violation",
            EditorError::KeyCollision(_) => "key collision",
            EditorError::TransformDivergence { .. } => "infinite transform recursion",
            EditorError::ReconciliationFailure(_) => "reconciliation failure",
            EditorError::UnknownNodeType(_) => "unknown node type",
            EditorError::InvalidOperation(_) => "invalid operation",
            EditorError::Serialization(_) => "serialization",
            EditorError::Config(_) => "config",
        }
    }

    pub(crate) fn stale(key: &str) -> Self {
        EditorError::StaleReference(format!("node {} does not exist in the active state", key))
    }

    pub(crate) fn read_only(operation: &str) -> Self {
        EditorError::ReadOnlyViolation(format!("{} requires an open update transaction", operation))
    }
}

impl From<serde_json::Error> for EditorError {
    fn from(e: serde_json::Error) -> Self {
        EditorError::Serialization(e.to_string())
    }
}

/// Error returned by an external reconciler while applying a diff
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ReconcileError(pub String);

impl From<String> for ReconcileError {
    fn from(s: String) -> Self {
        ReconcileError(s)
    }
}

impl From<&str> for ReconcileError {
    fn from(s: &str) -> Self {
        ReconcileError(s.to_string())
    }
}

pub type EditorResult<T> = Result<T, EditorError>;
