//! Action reconciler
//!
//! Per-id state machine: `Absent -> Queued -> {Queued, ParseError, Deleted}`.
//!
//! - create on an unseen id creates the record at version 0
//! - create on a known id only replaces the record while no update has landed (version 0)
//! - update applies only when its version is strictly newer
//! - delete forces `Deleted`; later lines still refresh the audit fields but never revive it
//!
//! The queue order is the order in which ids were first seen and is never changed by
//! later lines for the same id.

use std::collections::HashMap;

use bai_protocol::{LineKind, Payload, ProtocolLine};
use baibridge_core_types::ActionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::queue::ActionQueueEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Queued,
    ParseError,
    Deleted,
}

impl ActionStatus {
    fn from_payload(payload: &Payload) -> Self {
        if payload.is_valid() {
            ActionStatus::Queued
        } else {
            ActionStatus::ParseError
        }
    }
}

/// Current state of one action id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub raw_line: String,
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub status: ActionStatus,
    pub update_version: u32,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionRecord {
    fn new(id: ActionId, raw_line: &str, status: ActionStatus, now: DateTime<Utc>) -> Self {
        Self {
            id,
            raw_line: raw_line.to_string(),
            payload: None,
            parse_error: None,
            status,
            update_version: 0,
            first_seen_at: now,
            updated_at: now,
        }
    }

    /// Replace raw line and payload; status follows the payload unless deleted.
    fn absorb(&mut self, raw_line: &str, payload: &Payload, now: DateTime<Utc>) {
        self.raw_line = raw_line.to_string();
        self.payload = payload.value().cloned();
        self.parse_error = payload.error().map(|err| err.to_string());
        if self.status != ActionStatus::Deleted {
            self.status = ActionStatus::from_payload(payload);
        }
        self.updated_at = now;
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ActionStatus::Deleted
    }
}

/// What a single apply did to the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First sighting of the id
    Created { id: ActionId, status: ActionStatus },
    /// Redundant create replaced a version-0 record with different content
    Replaced { id: ActionId },
    /// Newer update applied
    Updated { id: ActionId, from: u32, to: u32 },
    /// Record marked deleted
    Deleted { id: ActionId },
    /// Update with version not newer than the current one
    Stale { id: ActionId, version: u32, current: u32 },
    /// Line carried nothing new for an existing record
    Ignored { id: ActionId },
    /// Line was not an action line
    NotAnAction,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Created { .. }
                | ApplyOutcome::Replaced { .. }
                | ApplyOutcome::Updated { .. }
                | ApplyOutcome::Deleted { .. }
        )
    }
}

/// Owner of the id -> record map and the first-seen order.
#[derive(Clone, Debug, Default)]
pub struct Reconciler {
    records: HashMap<ActionId, ActionRecord>,
    order: Vec<ActionId>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records, keeping their order. Later duplicates are dropped.
    pub fn from_records(records: Vec<ActionRecord>) -> Self {
        let mut reconciler = Self::new();
        for record in records {
            if reconciler.records.contains_key(&record.id) {
                warn!(id = %record.id, "duplicate record in snapshot; keeping first");
                continue;
            }
            reconciler.order.push(record.id.clone());
            reconciler.records.insert(record.id.clone(), record);
        }
        reconciler
    }

    pub fn apply(&mut self, line: &ProtocolLine) -> ApplyOutcome {
        self.apply_at(line, Utc::now())
    }

    pub fn apply_at(&mut self, line: &ProtocolLine, now: DateTime<Utc>) -> ApplyOutcome {
        let outcome = match &line.kind {
            LineKind::ActionCreate { id, payload } => self.on_create(id, &line.raw, payload, now),
            LineKind::ActionUpdate {
                id,
                version,
                payload,
            } => self.on_update(id, *version, &line.raw, payload, now),
            LineKind::ActionDelete { id } => self.on_delete(id, &line.raw, now),
            _ => ApplyOutcome::NotAnAction,
        };
        match &outcome {
            ApplyOutcome::Stale { id, version, current } => {
                debug!(%id, version, current, "ignoring stale update");
            }
            ApplyOutcome::NotAnAction | ApplyOutcome::Ignored { .. } => {}
            other => debug!(outcome = ?other, "reconciled action line"),
        }
        outcome
    }

    fn on_create(
        &mut self,
        id: &ActionId,
        raw: &str,
        payload: &Payload,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        match self.records.get_mut(id) {
            None => {
                let status = ActionStatus::from_payload(payload);
                let mut record = ActionRecord::new(id.clone(), raw, status, now);
                record.absorb(raw, payload, now);
                if status == ActionStatus::ParseError {
                    info!(%id, error = ?record.parse_error, "action line has malformed payload");
                }
                self.insert(record);
                ApplyOutcome::Created {
                    id: id.clone(),
                    status,
                }
            }
            Some(record) if record.update_version == 0 && record.raw_line != raw => {
                record.absorb(raw, payload, now);
                ApplyOutcome::Replaced { id: id.clone() }
            }
            Some(_) => ApplyOutcome::Ignored { id: id.clone() },
        }
    }

    fn on_update(
        &mut self,
        id: &ActionId,
        version: u32,
        raw: &str,
        payload: &Payload,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        match self.records.get_mut(id) {
            None => {
                let status = ActionStatus::from_payload(payload);
                let mut record = ActionRecord::new(id.clone(), raw, status, now);
                record.absorb(raw, payload, now);
                record.update_version = version;
                self.insert(record);
                ApplyOutcome::Created {
                    id: id.clone(),
                    status,
                }
            }
            Some(record) if version > record.update_version => {
                let from = record.update_version;
                record.absorb(raw, payload, now);
                record.update_version = version;
                ApplyOutcome::Updated {
                    id: id.clone(),
                    from,
                    to: version,
                }
            }
            Some(record) => ApplyOutcome::Stale {
                id: id.clone(),
                version,
                current: record.update_version,
            },
        }
    }

    fn on_delete(&mut self, id: &ActionId, raw: &str, now: DateTime<Utc>) -> ApplyOutcome {
        match self.records.get_mut(id) {
            None => {
                let record = ActionRecord::new(id.clone(), raw, ActionStatus::Deleted, now);
                self.insert(record);
                ApplyOutcome::Created {
                    id: id.clone(),
                    status: ActionStatus::Deleted,
                }
            }
            Some(record) if record.is_deleted() && record.raw_line == raw => {
                ApplyOutcome::Ignored { id: id.clone() }
            }
            Some(record) => {
                record.status = ActionStatus::Deleted;
                record.raw_line = raw.to_string();
                record.updated_at = now;
                ApplyOutcome::Deleted { id: id.clone() }
            }
        }
    }

    fn insert(&mut self, record: ActionRecord) {
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &ActionId) -> Option<&ActionRecord> {
        self.records.get(id)
    }

    /// Records in first-seen order.
    pub fn records(&self) -> impl Iterator<Item = &ActionRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.records().cloned().collect()
    }

    /// Queue view of every record, deleted ones included, in first-seen order.
    pub fn queue(&self) -> Vec<ActionQueueEntry> {
        self.records().map(ActionQueueEntry::from_record).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Operator removal of a single record.
    pub fn remove(&mut self, id: &ActionId) -> Option<ActionRecord> {
        let removed = self.records.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// Operator clearing of the whole queue.
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }
}
