//! Protocol error types

use thiserror::Error;

/// Errors raised while interpreting protocol payloads.
///
/// None of these are fatal: the classifier folds them into [`crate::LineKind`] values
/// and the reconciler records them as diagnostics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line carries no `{ ... }` block at all
    #[error("missing JSON object")]
    MissingObject,

    /// JSON block failed to parse
    #[error("malformed JSON payload: {0}")]
    MalformedJson(String),

    /// JSON parsed but is not an object
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// Session line is missing its `session_key`
    #[error("session line has no session_key")]
    MissingSessionKey,
}
