//! Execution error types

use extensions_bridge::BridgeError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlowError {
    #[error("Missing action type.")]
    MissingActionType,

    #[error("Missing selector.")]
    MissingSelector,

    #[error("Unsupported action type: {0}")]
    UnsupportedAction(String),

    /// Page collaborator failed; carries the stable bridge code
    #[error("{code}: {message}")]
    Bridge { code: String, message: String },

    /// Page reported the step as not performed
    #[error("{0}")]
    StepRejected(String),
}

impl From<BridgeError> for FlowError {
    fn from(err: BridgeError) -> Self {
        FlowError::Bridge {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
