use baibridge_core_types::CoreError;
use baibridge_state_center::StateError;
use extensions_bridge::BridgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    /// Page evidence could not be collected; reconciler state is untouched
    #[error("scan failed ({}): {0}", .0.code())]
    Evidence(#[from] BridgeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    InvalidId(#[from] CoreError),

    #[error("no action #{0} in the queue")]
    UnknownAction(String),

    #[error("action #{0} is deleted or unparsable and cannot be queued for execution")]
    NotExecutable(String),

    #[error("no entry {0}")]
    UnknownEntry(String),
}

impl KernelError {
    /// Stable code for evidence failures.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            KernelError::Evidence(err) => Some(err.code()),
            _ => None,
        }
    }
}
