//! Line classification
//!
//! Each candidate line is matched against a small ordered set of patterns and turned
//! into a [`LineKind`]. Nothing here fails: malformed payloads become diagnostics on the
//! returned value so the caller decides what to keep.

use baibridge_core_types::ActionId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ProtocolError;
use crate::fingerprint::Fingerprint;
use crate::payload::Payload;

static SESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^!baisession(?:\s|\{|$)").expect("valid session regex"));
static UPDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!baiact(\d{6})upd(\d{3})(?:\s|\{|$)").expect("valid update regex")
});
static DELETE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^!baiact(\d{6})del\s*$").expect("valid delete regex"));
static CREATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^!baiact(\d{6})(?:\s|\{|$)").expect("valid create regex"));

/// Parsed `!baisession` line.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionLine {
    pub session_key: String,
    pub body: Value,
}

/// Typed classification of a protocol line.
#[derive(Clone, Debug, PartialEq)]
pub enum LineKind {
    Session(SessionLine),
    MalformedSession(ProtocolError),
    ActionCreate {
        id: ActionId,
        payload: Payload,
    },
    ActionUpdate {
        id: ActionId,
        version: u32,
        payload: Payload,
    },
    ActionDelete {
        id: ActionId,
    },
    Unrecognized,
}

impl LineKind {
    pub fn action_id(&self) -> Option<&ActionId> {
        match self {
            LineKind::ActionCreate { id, .. }
            | LineKind::ActionUpdate { id, .. }
            | LineKind::ActionDelete { id } => Some(id),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LineKind::Session(_) => "session",
            LineKind::MalformedSession(_) => "malformed_session",
            LineKind::ActionCreate { .. } => "create",
            LineKind::ActionUpdate { .. } => "update",
            LineKind::ActionDelete { .. } => "delete",
            LineKind::Unrecognized => "unrecognized",
        }
    }
}

/// A trimmed protocol line with its fingerprint and classification.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolLine {
    pub raw: String,
    pub fingerprint: Fingerprint,
    pub kind: LineKind,
}

impl ProtocolLine {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        Self {
            raw: raw.to_string(),
            fingerprint: Fingerprint::of(raw),
            kind: classify(raw),
        }
    }
}

/// Syntactic update check, used by the dedup filter before full classification.
pub fn is_update_line(line: &str) -> bool {
    UPDATE_RE.is_match(line.trim())
}

/// True for create, update and delete lines; matches on the marker only, the payload is
/// not parsed.
pub fn is_action_line(line: &str) -> bool {
    let line = line.trim();
    UPDATE_RE.is_match(line) || DELETE_RE.is_match(line) || CREATE_RE.is_match(line)
}

/// Classify a single trimmed line.
pub fn classify(line: &str) -> LineKind {
    let line = line.trim();

    if SESSION_RE.is_match(line) {
        return classify_session(line);
    }

    if let Some(caps) = UPDATE_RE.captures(line) {
        let version = caps[2].parse::<u32>().unwrap_or_default();
        return match ActionId::parse(&caps[1]) {
            Ok(id) => LineKind::ActionUpdate {
                id,
                version,
                payload: Payload::from_line(line),
            },
            Err(_) => LineKind::Unrecognized,
        };
    }

    if let Some(caps) = DELETE_RE.captures(line) {
        return match ActionId::parse(&caps[1]) {
            Ok(id) => LineKind::ActionDelete { id },
            Err(_) => LineKind::Unrecognized,
        };
    }

    if let Some(caps) = CREATE_RE.captures(line) {
        return match ActionId::parse(&caps[1]) {
            Ok(id) => LineKind::ActionCreate {
                id,
                payload: Payload::from_line(line),
            },
            Err(_) => LineKind::Unrecognized,
        };
    }

    debug!(line, "discarding unrecognized protocol line");
    LineKind::Unrecognized
}

fn classify_session(line: &str) -> LineKind {
    let payload = Payload::from_line(line);
    let body = match payload {
        Payload::Json(body) => body,
        Payload::Malformed(err) => {
            warn!(line, error = %err, "malformed session line");
            return LineKind::MalformedSession(err);
        }
    };
    match body.get("session_key").and_then(Value::as_str) {
        Some(key) if !key.trim().is_empty() => LineKind::Session(SessionLine {
            session_key: key.trim().to_string(),
            body,
        }),
        _ => {
            warn!(line, "session line without session_key");
            LineKind::MalformedSession(ProtocolError::MissingSessionKey)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: &str) -> ActionId {
        ActionId::parse(raw).unwrap()
    }

    #[test]
    fn classifies_session_line() {
        match classify(r#"!baisession {"session_key":"abc123"}"#) {
            LineKind::Session(session) => assert_eq!(session.session_key, "abc123"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn malformed_session_is_reported_not_dropped() {
        assert!(matches!(
            classify("!baisession {oops"),
            LineKind::MalformedSession(ProtocolError::MissingObject)
        ));
        assert!(matches!(
            classify(r#"!baisession {"other":1}"#),
            LineKind::MalformedSession(ProtocolError::MissingSessionKey)
        ));
    }

    #[test]
    fn classifies_create_update_delete() {
        assert_eq!(
            classify(r##"!baiact000001 {"a":"click","s":"#go"}"##),
            LineKind::ActionCreate {
                id: id("000001"),
                payload: Payload::Json(json!({"a":"click","s":"#go"})),
            }
        );
        assert_eq!(
            classify(r##"!baiact000001upd002 {"a":"click","s":"#go2"}"##),
            LineKind::ActionUpdate {
                id: id("000001"),
                version: 2,
                payload: Payload::Json(json!({"a":"click","s":"#go2"})),
            }
        );
        assert_eq!(
            classify("!baiact000001del"),
            LineKind::ActionDelete { id: id("000001") }
        );
    }

    #[test]
    fn create_with_bad_json_keeps_the_id() {
        match classify("!baiact000002 {bad json") {
            LineKind::ActionCreate { id: got, payload } => {
                assert_eq!(got, id("000002"));
                assert!(!payload.is_valid());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn wrong_widths_are_unrecognized() {
        assert_eq!(classify("!baiact00001 {}"), LineKind::Unrecognized);
        assert!(!is_action_line("!baiact00001 {}"));
        assert!(!is_action_line("!baisession {\"session_key\":\"k\"}"));
        assert!(is_action_line("  !baiact000001 {bad json"));
        assert!(is_action_line("!baiact000001upd002 {}"));
        assert!(is_action_line("!baiact000001del"));
        assert_eq!(classify("!baiact0000012 {}"), LineKind::Unrecognized);
        assert_eq!(classify("!baiact000001upd02 {}"), LineKind::Unrecognized);
        assert_eq!(classify("!baiact000001del {}"), LineKind::Unrecognized);
        assert_eq!(classify("see !baiact000001 {}"), LineKind::Unrecognized);
    }

    #[test]
    fn update_detection_is_syntactic() {
        assert!(is_update_line("!baiact000001upd001 {bad"));
        assert!(!is_update_line("!baiact000001 {}"));
    }

    #[test]
    fn protocol_line_carries_fingerprint() {
        let line = ProtocolLine::parse("  !baiact000003del  ");
        assert_eq!(line.raw, "!baiact000003del");
        assert_eq!(line.fingerprint, Fingerprint::of("!baiact000003del"));
        assert_eq!(line.kind.label(), "delete");
    }
}
