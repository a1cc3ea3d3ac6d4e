//! Step and run report types

use action_queue::{ActionQueueEntry, ActionStatus, RunListEntry};
use bai_protocol::ActionPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FlowError;

/// A page action the driver can dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    Click { selector: String },
    InputText { selector: String, text: String },
    Scroll { y: f64 },
    Wait { ms: u64 },
}

impl StepAction {
    /// Convert a payload; `click` and `input_text` need a selector.
    pub fn from_payload(payload: &ActionPayload) -> Result<Self, FlowError> {
        let selector = || {
            payload
                .selector
                .clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or(FlowError::MissingSelector)
        };
        match payload.action.as_deref() {
            None => Err(FlowError::MissingActionType),
            Some("click") => Ok(StepAction::Click {
                selector: selector()?,
            }),
            Some("input_text") => Ok(StepAction::InputText {
                selector: selector()?,
                text: payload.text.clone().unwrap_or_default(),
            }),
            Some("scroll") => Ok(StepAction::Scroll {
                y: payload.y.unwrap_or(0.0),
            }),
            Some("wait") => Ok(StepAction::Wait {
                ms: payload.ms.unwrap_or(0),
            }),
            Some(other) => Err(FlowError::UnsupportedAction(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Click { .. } => "click",
            StepAction::InputText { .. } => "input_text",
            StepAction::Scroll { .. } => "scroll",
            StepAction::Wait { .. } => "wait",
        }
    }

    /// Element to highlight before dispatch.
    pub fn selector(&self) -> Option<&str> {
        match self {
            StepAction::Click { selector } | StepAction::InputText { selector, .. } => {
                Some(selector)
            }
            StepAction::Scroll { .. } | StepAction::Wait { .. } => None,
        }
    }
}

/// What the driver should do with a planned step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepPlan {
    Execute(StepAction),
    /// Reported as skipped, never dispatched
    Skip(String),
    /// Reported as failed, never dispatched
    Invalid(FlowError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub step_id: String,
    pub label: String,
    pub plan: StepPlan,
}

impl PlannedStep {
    pub fn new(step_id: impl Into<String>, label: impl Into<String>, plan: StepPlan) -> Self {
        Self {
            step_id: step_id.into(),
            label: label.into(),
            plan,
        }
    }

    pub fn from_payload(
        step_id: impl Into<String>,
        label: impl Into<String>,
        payload: &ActionPayload,
    ) -> Self {
        let plan = match StepAction::from_payload(payload) {
            Ok(action) => StepPlan::Execute(action),
            Err(err) => StepPlan::Invalid(err),
        };
        Self::new(step_id, label, plan)
    }

    /// Deleted and unparsable queue entries are skipped.
    pub fn from_queue_entry(entry: &ActionQueueEntry) -> Self {
        let step_id = entry.action_id.to_string();
        match (&entry.status, &entry.payload) {
            (ActionStatus::Deleted, _) => {
                Self::new(step_id, &entry.label, StepPlan::Skip("deleted".into()))
            }
            (ActionStatus::ParseError, _) | (_, None) => {
                Self::new(step_id, &entry.label, StepPlan::Skip("parse error".into()))
            }
            (ActionStatus::Queued, Some(payload)) => {
                Self::from_payload(step_id, &entry.label, payload)
            }
        }
    }

    pub fn from_run_list_entry(entry: &RunListEntry) -> Self {
        Self::from_payload(entry.id.to_string(), &entry.label, &entry.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Failure strategy - how to handle step failures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Abort the rest of the run
    Abort,

    /// Report and move to the next step
    #[default]
    Continue,

    /// Retry the step with a fixed backoff, then continue
    Retry { max_attempts: u32, backoff_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub label: String,
    pub action_type: Option<String>,
    pub status: StepStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl StepResult {
    pub fn new(step: &PlannedStep) -> Self {
        let now = Utc::now();
        let action_type = match &step.plan {
            StepPlan::Execute(action) => Some(action.kind().to_string()),
            _ => None,
        };
        Self {
            step_id: step.step_id.clone(),
            label: step.label.clone(),
            action_type,
            status: StepStatus::Skipped,
            attempts: 0,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn with_success(mut self) -> Self {
        self.status = StepStatus::Succeeded;
        self.error = None;
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self
    }

    pub fn skipped(mut self, reason: String) -> Self {
        self.status = StepStatus::Skipped;
        self.error = Some(reason);
        self
    }

    /// Set finish time and calculate latency
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub steps: Vec<StepResult>,
    /// Set when the token fired before every step ran
    pub cancelled: bool,
    /// Set when an `Abort` strategy stopped the run
    pub aborted: bool,
}

impl RunReport {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            steps: Vec::new(),
            cancelled: false,
            aborted: false,
        }
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(StepStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_queue::Reconciler;
    use bai_protocol::ProtocolLine;

    fn payload(json: serde_json::Value) -> ActionPayload {
        ActionPayload::from_value(&json).unwrap()
    }

    #[test]
    fn converts_supported_payloads() {
        let click = StepAction::from_payload(&payload(serde_json::json!({"a": "click", "s": "#go"})));
        assert_eq!(
            click.unwrap(),
            StepAction::Click {
                selector: "#go".into()
            }
        );

        let wait = StepAction::from_payload(&payload(serde_json::json!({"type": "wait", "ms": 250})));
        assert_eq!(wait.unwrap(), StepAction::Wait { ms: 250 });
    }

    #[test]
    fn rejects_missing_selector_and_unknown_types() {
        let err = StepAction::from_payload(&payload(serde_json::json!({"a": "click"}))).unwrap_err();
        assert_eq!(err, FlowError::MissingSelector);
        assert_eq!(err.to_string(), "Missing selector.");

        let err = StepAction::from_payload(&payload(serde_json::json!({"a": "hover", "s": "#x"})))
            .unwrap_err();
        assert_eq!(err, FlowError::UnsupportedAction("hover".into()));
    }

    #[test]
    fn queue_entries_plan_by_status() {
        let mut reconciler = Reconciler::new();
        for line in [
            r##"!baiact000001 {"a":"click","s":"#go"}"##,
            "!baiact000002 {bad json",
            r#"!baiact000003 {"a":"wait"}"#,
            "!baiact000003del",
        ] {
            reconciler.apply(&ProtocolLine::parse(line));
        }
        let plans: Vec<_> = reconciler
            .queue()
            .iter()
            .map(PlannedStep::from_queue_entry)
            .map(|step| step.plan)
            .collect();

        assert!(matches!(plans[0], StepPlan::Execute(StepAction::Click { .. })));
        assert_eq!(plans[1], StepPlan::Skip("parse error".into()));
        assert_eq!(plans[2], StepPlan::Skip("deleted".into()));
    }
}
