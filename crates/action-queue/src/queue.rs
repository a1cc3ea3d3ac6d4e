use bai_protocol::ActionPayload;
use baibridge_core_types::ActionId;
use serde::{Deserialize, Serialize};

use crate::reconciler::{ActionRecord, ActionStatus};

/// Where an executable entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Ai,
    Recorded,
}

/// Queue view of an [`ActionRecord`], ready for display or execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionQueueEntry {
    pub action_id: ActionId,
    pub source: EntrySource,
    pub label: String,
    pub status: ActionStatus,
    pub update_version: u32,
    pub payload: Option<ActionPayload>,
    pub raw_line: String,
}

impl ActionQueueEntry {
    pub fn from_record(record: &ActionRecord) -> Self {
        let payload = record
            .payload
            .as_ref()
            .and_then(|value| ActionPayload::from_value(value).ok());
        let label = match (&record.status, &payload) {
            (ActionStatus::ParseError, _) => format!("parse error #{}", record.id),
            (_, Some(payload)) => format!("{} #{}", payload.action_type(), record.id),
            (_, None) => format!("action #{}", record.id),
        };
        Self {
            action_id: record.id.clone(),
            source: EntrySource::Ai,
            label,
            status: record.status,
            update_version: record.update_version,
            payload,
            raw_line: record.raw_line.clone(),
        }
    }

    pub fn is_executable(&self) -> bool {
        self.status == ActionStatus::Queued && self.payload.is_some()
    }

    /// Short description for list views: the selector if any, else the raw line.
    pub fn meta(&self) -> String {
        match self.payload.as_ref().and_then(|p| p.selector.clone()) {
            Some(selector) => selector,
            None => self.raw_line.chars().take(80).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::reconciler::Reconciler;
    use bai_protocol::ProtocolLine;

    use super::*;

    #[test]
    fn queue_labels_follow_payload() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(&ProtocolLine::parse(r##"!baiact000001 {"a":"click","s":"#go"}"##));
        reconciler.apply(&ProtocolLine::parse("!baiact000002 {bad json"));
        reconciler.apply(&ProtocolLine::parse("!baiact000003del"));

        let queue = reconciler.queue();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].label, "click #000001");
        assert_eq!(queue[0].meta(), "#go");
        assert!(queue[0].is_executable());
        assert_eq!(queue[1].label, "parse error #000002");
        assert!(!queue[1].is_executable());
        assert_eq!(queue[2].status, ActionStatus::Deleted);
        assert!(!queue[2].is_executable());
    }
}
