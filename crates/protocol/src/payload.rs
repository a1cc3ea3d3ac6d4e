//! JSON payload handling for protocol lines

use baibridge_core_types::TabId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;

/// Result of locating and parsing the JSON object embedded in a line.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(Value),
    Malformed(ProtocolError),
}

impl Payload {
    /// Parse the text between the first `{` and the last `}` of `line`.
    ///
    /// Anything outside the braces (trailing commentary, a stray prefix) is ignored.
    pub fn from_line(line: &str) -> Self {
        let Some(slice) = json_slice(line) else {
            return Payload::Malformed(ProtocolError::MissingObject);
        };
        match serde_json::from_str::<Value>(slice) {
            Ok(value @ Value::Object(_)) => Payload::Json(value),
            Ok(_) => Payload::Malformed(ProtocolError::NotAnObject),
            Err(err) => Payload::Malformed(ProtocolError::MalformedJson(err.to_string())),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Payload::Json(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Malformed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ProtocolError> {
        match self {
            Payload::Json(_) => None,
            Payload::Malformed(err) => Some(err),
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Malformed(_) => None,
        }
    }
}

fn json_slice(line: &str) -> Option<&str> {
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&line[start..=end])
}

/// Cheap check that `text` ends with a balanced JSON object.
///
/// Used for lines that may still be streaming into the chat surface: a half-rendered
/// line fails this check and is left for a later scan.
pub fn is_likely_complete_json(text: &str) -> bool {
    if !text.ends_with('}') {
        return false;
    }
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    for ch in text.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Typed view of an action payload.
///
/// The assistant is asked to use compact keys (`a`, `s`, `t`); the long spellings are
/// accepted as aliases.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Action type: `click`, `input_text`, `scroll` or `wait`
    #[serde(rename = "a", alias = "type", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// CSS selector of the target element
    #[serde(rename = "s", alias = "selector", default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Tab the assistant believed it was targeting
    #[serde(
        rename = "t",
        alias = "tab_id",
        default,
        deserialize_with = "lenient_tab",
        skip_serializing_if = "Option::is_none"
    )]
    pub tab: Option<TabId>,

    /// Text for `input_text`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Vertical scroll delta for `scroll`
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,

    /// Duration for `wait`
    #[serde(default, deserialize_with = "lenient_u64", skip_serializing_if = "Option::is_none")]
    pub ms: Option<u64>,
}

impl ActionPayload {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn action_type(&self) -> &str {
        self.action.as_deref().unwrap_or("unknown")
    }
}

fn lenient_tab<'de, D>(deserializer: D) -> Result<Option<TabId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(TabId(s)),
        Some(Value::Number(n)) => Some(TabId(n.to_string())),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_tolerates_trailing_commentary() {
        let payload = Payload::from_line(r##"!baiact000001 {"a":"click","s":"#go"} <- do this"##);
        assert_eq!(payload, Payload::Json(json!({"a": "click", "s": "#go"})));
    }

    #[test]
    fn payload_reports_malformed_json() {
        let payload = Payload::from_line("!baiact000002 {bad json");
        assert!(matches!(payload, Payload::Malformed(ProtocolError::MissingObject)));

        let payload = Payload::from_line("!baiact000002 {bad json}");
        assert!(matches!(payload, Payload::Malformed(ProtocolError::MalformedJson(_))));
    }

    #[test]
    fn completeness_check_tracks_strings() {
        assert!(is_likely_complete_json(r#"{"a":"}"}"#));
        assert!(!is_likely_complete_json(r#"{"a":{"b":1}"#));
        assert!(!is_likely_complete_json(r#"{"a":"x"#));
        assert!(is_likely_complete_json(r#"{"a":"\"{"}"#));
    }

    #[test]
    fn action_payload_accepts_compact_and_long_keys() {
        let compact = ActionPayload::from_value(&json!({"a": "click", "s": "#go", "t": 17})).unwrap();
        assert_eq!(compact.action.as_deref(), Some("click"));
        assert_eq!(compact.selector.as_deref(), Some("#go"));
        assert_eq!(compact.tab, Some(TabId("17".into())));

        let long = ActionPayload::from_value(&json!({"type": "wait", "ms": "250"})).unwrap();
        assert_eq!(long.action_type(), "wait");
        assert_eq!(long.ms, Some(250));
    }
}
