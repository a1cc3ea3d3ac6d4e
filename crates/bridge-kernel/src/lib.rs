//! Bridge kernel
//!
//! Wires extraction, dedup, reconciliation, the session state machines and persistence
//! into one [`ScanEngine`], and hands planned steps to an [`action_flow::FlowExecutor`].

pub mod config;
pub mod engine;
pub mod errors;
pub mod snapshot;

pub use config::{Config, ENV_DELAY_SEC, ENV_STATE_PATH};
pub use engine::{EngineStatus, RunSource, ScanEngine, ScanReport, StaleTab};
pub use errors::KernelError;
pub use snapshot::{QueueSnapshot, SessionSnapshot, QUEUE_KEY, SESSION_KEY};
