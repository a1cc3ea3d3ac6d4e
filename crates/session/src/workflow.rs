//! Staged workflow handshake
//!
//! The operator pastes a bootstrap prompt carrying a fresh workflow id. The assistant answers
//! with a handshake line in `awaiting_extension_ack` state, the bridge replies with an ack line,
//! and once the assistant echoes the ack the workflow is ready.

use bai_protocol::is_likely_complete_json;
use baibridge_core_types::{SessionToken, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_BOOTSTRAP_PROMPT: &str = "\
You are connected to a browser bridge (protocol bai/1, workflow {WORKFLOW_ID}).
Confirm the session first by emitting, on its own line:
!baisession {\"session_key\":\"{SESSION_KEY}\"}
Then emit on its own line:
!baihandshake {\"protocol\":\"bai/1\",\"workflow_id\":\"{WORKFLOW_ID}\",\"state\":\"awaiting_extension_ack\"}
Wait until the operator pastes a !baiack line and echo it back unchanged.
Request browser actions one per line:
!baiact<6 digits> {\"a\":\"click|input_text|scroll|wait\",\"s\":\"<css selector>\",\"t\":\"<tab id>\"}
Revise an action with !baiact<id>upd<3 digit version> {...} and withdraw it with !baiact<id>del.
Never reuse an action id for a different action.";

/// Wire-level constants of the staged handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolDescriptor {
    pub protocol: String,
    pub handshake_line_prefix: String,
    pub ack_line_prefix: String,
    pub awaiting_state: String,
    pub ack_state: String,
    pub bootstrap_prompt_template: String,
}

impl Default for ProtocolDescriptor {
    fn default() -> Self {
        Self {
            protocol: "bai/1".to_string(),
            handshake_line_prefix: "!baihandshake".to_string(),
            ack_line_prefix: "!baiack".to_string(),
            awaiting_state: "awaiting_extension_ack".to_string(),
            ack_state: "extension_acknowledged".to_string(),
            bootstrap_prompt_template: DEFAULT_BOOTSTRAP_PROMPT.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStage {
    #[default]
    NotInitialized,
    AwaitingAck,
    Ready,
}

/// Persisted shape of the handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: Option<WorkflowId>,
    pub stage: HandshakeStage,
}

/// Result of feeding one scan's lines to the handshake.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowObservation {
    /// Last handshake object addressed to this workflow
    pub handshake: Option<Value>,
    pub ack_seen: bool,
    /// Ack line the operator should paste back into the chat
    pub ack_line: Option<String>,
    pub stage: HandshakeStage,
}

#[derive(Clone, Debug, Default)]
pub struct WorkflowHandshake {
    descriptor: ProtocolDescriptor,
    state: WorkflowState,
}

impl WorkflowHandshake {
    pub fn new(descriptor: ProtocolDescriptor) -> Self {
        Self {
            descriptor,
            state: WorkflowState::default(),
        }
    }

    pub fn restore(descriptor: ProtocolDescriptor, state: WorkflowState) -> Self {
        Self { descriptor, state }
    }

    pub fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn stage(&self) -> HandshakeStage {
        self.state.stage
    }

    pub fn workflow_id(&self) -> Option<&WorkflowId> {
        self.state.workflow_id.as_ref()
    }

    /// Line prefixes the extractor has to keep for this handshake.
    pub fn markers(&self) -> [&str; 2] {
        [
            self.descriptor.handshake_line_prefix.as_str(),
            self.descriptor.ack_line_prefix.as_str(),
        ]
    }

    /// Allocate a workflow id if needed and render the bootstrap prompt.
    pub fn begin(&mut self, token: &SessionToken) -> String {
        let workflow_id = self
            .state
            .workflow_id
            .get_or_insert_with(WorkflowId::new)
            .clone();
        self.state.stage = HandshakeStage::AwaitingAck;
        info!(workflow = %workflow_id.0, "workflow handshake started");
        self.descriptor
            .bootstrap_prompt_template
            .replace("{WORKFLOW_ID}", &workflow_id.0)
            .replace("{SESSION_KEY}", token.as_str())
    }

    pub fn reset(&mut self) {
        self.state = WorkflowState::default();
    }

    pub fn ack_line(&self) -> Option<String> {
        let workflow_id = self.state.workflow_id.as_ref()?;
        let body = json!({
            "protocol": self.descriptor.protocol,
            "workflow_id": workflow_id.0,
            "state": self.descriptor.ack_state,
            "ack_nonce": Uuid::new_v4().simple().to_string(),
        });
        Some(format!("{} {}", self.descriptor.ack_line_prefix, body))
    }

    /// Feed every line of one scan. Lines for other workflows are ignored.
    pub fn observe_lines<'a, I>(&mut self, lines: I) -> WorkflowObservation
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut observation = WorkflowObservation {
            stage: self.state.stage,
            ..WorkflowObservation::default()
        };
        let Some(workflow_id) = self.state.workflow_id.clone() else {
            return observation;
        };

        for line in lines {
            if let Some(obj) = parse_json_line(&self.descriptor.ack_line_prefix, line) {
                if self.addressed_to_us(&obj, &workflow_id)
                    && obj.get("state").and_then(Value::as_str)
                        == Some(self.descriptor.ack_state.as_str())
                {
                    observation.ack_seen = true;
                }
            }
            if let Some(obj) = parse_json_line(&self.descriptor.handshake_line_prefix, line) {
                if self.addressed_to_us(&obj, &workflow_id) && obj.get("state").is_some() {
                    observation.handshake = Some(obj);
                }
            }
        }

        let awaiting = observation.handshake.as_ref().is_some_and(|obj| {
            obj.get("state").and_then(Value::as_str) == Some(self.descriptor.awaiting_state.as_str())
        });

        if awaiting && !observation.ack_seen {
            self.state.stage = HandshakeStage::AwaitingAck;
            observation.ack_line = self.ack_line();
        } else if observation.ack_seen || observation.handshake.is_some() {
            if self.state.stage != HandshakeStage::Ready {
                info!(workflow = %workflow_id.0, "workflow ready");
            }
            self.state.stage = HandshakeStage::Ready;
        }
        observation.stage = self.state.stage;
        observation
    }

    fn addressed_to_us(&self, obj: &Value, workflow_id: &WorkflowId) -> bool {
        if obj.get("protocol").and_then(Value::as_str) != Some(self.descriptor.protocol.as_str()) {
            return false;
        }
        let matches = obj.get("workflow_id").and_then(Value::as_str) == Some(workflow_id.0.as_str());
        if !matches {
            debug!("ignoring handshake line for another workflow");
        }
        matches
    }
}

/// `<prefix> <json>` where the JSON must already be complete.
fn parse_json_line(prefix: &str, line: &str) -> Option<Value> {
    let rest = line.strip_prefix(prefix)?.strip_prefix(' ')?.trim();
    if !is_likely_complete_json(rest) {
        return None;
    }
    serde_json::from_str::<Value>(rest)
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn started() -> (WorkflowHandshake, WorkflowId) {
        let mut handshake = WorkflowHandshake::default();
        handshake.begin(&SessionToken::generate());
        let id = handshake.workflow_id().cloned().unwrap();
        (handshake, id)
    }

    fn handshake_line(id: &WorkflowId, state: &str) -> String {
        format!(
            r#"!baihandshake {{"protocol":"bai/1","workflow_id":"{}","state":"{}"}}"#,
            id.0, state
        )
    }

    #[test]
    fn begin_renders_prompt_and_waits_for_ack() {
        let mut handshake = WorkflowHandshake::default();
        let token = SessionToken::generate();
        let prompt = handshake.begin(&token);
        let id = handshake.workflow_id().cloned().unwrap();

        assert_eq!(handshake.stage(), HandshakeStage::AwaitingAck);
        assert!(prompt.contains(&id.0));
        assert!(prompt.contains(token.as_str()));
        assert!(!prompt.contains("{WORKFLOW_ID}"));

        handshake.begin(&token);
        assert_eq!(handshake.workflow_id(), Some(&id));
    }

    #[test]
    fn awaiting_handshake_produces_ack_line() {
        let (mut handshake, id) = started();
        let line = handshake_line(&id, "awaiting_extension_ack");
        let observation = handshake.observe_lines([line.as_str()]);

        assert_eq!(observation.stage, HandshakeStage::AwaitingAck);
        let ack = observation.ack_line.unwrap();
        assert!(ack.starts_with("!baiack {"));
        let body: Value = serde_json::from_str(ack.trim_start_matches("!baiack ")).unwrap();
        assert_eq!(body["state"], "extension_acknowledged");
        assert_eq!(body["workflow_id"], id.0.as_str());
        assert!(body["ack_nonce"].as_str().is_some());
    }

    #[test]
    fn echoed_ack_makes_workflow_ready() {
        let (mut handshake, id) = started();
        let hs = handshake_line(&id, "awaiting_extension_ack");
        let ack = handshake.ack_line().unwrap();
        let observation = handshake.observe_lines([hs.as_str(), ack.as_str()]);

        assert!(observation.ack_seen);
        assert!(observation.ack_line.is_none());
        assert_eq!(handshake.stage(), HandshakeStage::Ready);
    }

    #[test]
    fn other_handshake_state_is_ready() {
        let (mut handshake, id) = started();
        let line = handshake_line(&id, "ready");
        handshake.observe_lines([line.as_str()]);
        assert_eq!(handshake.stage(), HandshakeStage::Ready);
    }

    #[test]
    fn foreign_workflow_and_partial_lines_are_ignored() {
        let (mut handshake, _) = started();
        let foreign = handshake_line(&WorkflowId::new(), "ready");
        let partial = r#"!baihandshake {"protocol":"bai/1","workflow_id":"#;
        let observation = handshake.observe_lines([foreign.as_str(), partial]);

        assert!(observation.handshake.is_none());
        assert_eq!(handshake.stage(), HandshakeStage::AwaitingAck);
    }

    #[test]
    fn nothing_happens_before_begin() {
        let mut handshake = WorkflowHandshake::default();
        let line = handshake_line(&WorkflowId::new(), "ready");
        let observation = handshake.observe_lines([line.as_str()]);
        assert_eq!(observation.stage, HandshakeStage::NotInitialized);
        assert!(handshake.ack_line().is_none());

        handshake.begin(&SessionToken::generate());
        handshake.reset();
        assert_eq!(handshake.state(), &WorkflowState::default());
    }
}
