//! Operator-curated run list
//!
//! Entries are copied out of the action queue or the recorder, so later reconciliation
//! does not change what the operator already lined up.

use bai_protocol::ActionPayload;
use baibridge_core_types::{ActionId, EntryId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::queue::{ActionQueueEntry, EntrySource};
use crate::recorder::RecordedItem;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunListEntry {
    pub id: EntryId,
    pub source: EntrySource,
    pub action_type: String,
    pub label: String,
    pub payload: ActionPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunList {
    entries: Vec<RunListEntry>,
}

impl RunList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<RunListEntry>) -> Self {
        Self { entries }
    }

    /// Append an AI action; deleted and unparsable entries are refused.
    pub fn add_ai(&mut self, entry: &ActionQueueEntry) -> Option<EntryId> {
        if !entry.is_executable() {
            debug!(id = %entry.action_id, status = ?entry.status, "refusing non-executable entry");
            return None;
        }
        let payload = entry.payload.clone().unwrap_or_default();
        let action_type = payload.action_type().to_string();
        let id = EntryId::new();
        self.entries.push(RunListEntry {
            id: id.clone(),
            source: EntrySource::Ai,
            label: format!("AI: {} #{}", action_type, entry.action_id),
            action_type,
            payload,
            action_id: Some(entry.action_id.clone()),
        });
        Some(id)
    }

    /// Append a recorded element as a click step.
    pub fn add_recorded(&mut self, item: &RecordedItem) -> EntryId {
        let id = EntryId::new();
        self.entries.push(RunListEntry {
            id: id.clone(),
            source: EntrySource::Recorded,
            action_type: "click".to_string(),
            label: format!("Click: {}", item.label),
            payload: ActionPayload {
                action: Some("click".to_string()),
                selector: Some(item.selector.clone()),
                ..ActionPayload::default()
            },
            action_id: None,
        });
        id
    }

    pub fn remove(&mut self, id: &EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.id != id);
        before != self.entries.len()
    }

    /// Move `dragged` to the position currently held by `target`.
    pub fn reorder(&mut self, dragged: &EntryId, target: &EntryId) -> bool {
        if dragged == target {
            return false;
        }
        let from = self.entries.iter().position(|entry| &entry.id == dragged);
        let to = self.entries.iter().position(|entry| &entry.id == target);
        let (Some(from), Some(to)) = (from, to) else {
            return false;
        };
        let moved = self.entries.remove(from);
        self.entries.insert(to, moved);
        true
    }

    pub fn entries(&self) -> &[RunListEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&RunListEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
