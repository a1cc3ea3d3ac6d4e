//! Persisted shapes of the engine state.

use action_queue::{ActionRecord, RecordedItem, RunList};
use bai_protocol::SeenEntry;
use bai_session::{ConnectionState, WorkflowState};
use baibridge_core_types::SessionToken;
use serde::{Deserialize, Serialize};

/// Session-scoped key, dropped on rotation.
pub const SESSION_KEY: &str = "session";
/// Durable key.
pub const QUEUE_KEY: &str = "queue";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub token: SessionToken,
    #[serde(default)]
    pub connection: ConnectionState,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSnapshot {
    /// Records in first-seen order
    pub records: Vec<ActionRecord>,
    pub seen: Vec<SeenEntry>,
    pub run_list: RunList,
    pub recorded: Vec<RecordedItem>,
    pub workflow: WorkflowState,
}
