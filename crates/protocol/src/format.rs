//! Builders for protocol lines
//!
//! The bridge never sends action lines itself, but the handshake line is handed to the
//! operator to paste into the chat, and tests and fixtures build action lines the same
//! way the assistant is instructed to.

use baibridge_core_types::{ActionId, SessionToken};
use serde_json::{json, Value};

use crate::{ACTION_MARKER, SESSION_MARKER};

pub fn session_line(token: &SessionToken) -> String {
    format!(
        "{} {}",
        SESSION_MARKER,
        json!({ "session_key": token.as_str() })
    )
}

pub fn create_line(id: &ActionId, payload: &Value) -> String {
    format!("{}{} {}", ACTION_MARKER, id, payload)
}

/// `version` is rendered with three digits; values above 999 are clamped.
pub fn update_line(id: &ActionId, version: u32, payload: &Value) -> String {
    format!(
        "{}{}upd{:03} {}",
        ACTION_MARKER,
        id,
        version.min(999),
        payload
    )
}

pub fn delete_line(id: &ActionId) -> String {
    format!("{}{}del", ACTION_MARKER, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, LineKind};

    #[test]
    fn built_lines_classify_back() {
        let id = ActionId::parse("000010").unwrap();
        let token = SessionToken::generate();

        assert!(matches!(classify(&session_line(&token)), LineKind::Session(s) if s.session_key == token.as_str()));
        assert!(matches!(
            classify(&create_line(&id, &json!({"a": "wait", "ms": 5}))),
            LineKind::ActionCreate { .. }
        ));
        assert!(matches!(
            classify(&update_line(&id, 7, &json!({"a": "wait"}))),
            LineKind::ActionUpdate { version: 7, .. }
        ));
        assert!(matches!(classify(&delete_line(&id)), LineKind::ActionDelete { .. }));
    }
}
