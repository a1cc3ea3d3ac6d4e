//! Session state for the BAI chat bridge
//!
//! Two independent state machines consume the same extracted lines:
//! - [`ConnectionTracker`]: `Disconnected <-> Connected`, bound to the local session token
//! - [`WorkflowHandshake`]: `NotInitialized -> AwaitingAck -> Ready` for the staged handshake

pub mod connection;
pub mod workflow;

pub use connection::{ConnectionState, ConnectionTracker, ConnectionTransition};
pub use workflow::{
    HandshakeStage, ProtocolDescriptor, WorkflowHandshake, WorkflowObservation, WorkflowState,
};
