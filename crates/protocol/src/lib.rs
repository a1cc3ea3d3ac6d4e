//! BAI chat protocol
//!
//! The assistant talks to the bridge by writing single-line directives into the chat
//! transcript:
//!
//! ```text
//! !baisession {"session_key":"<token>"}
//! !baiact<6-digit-id> {<json>}
//! !baiact<6-digit-id>upd<3-digit-version> {<json>}
//! !baiact<6-digit-id>del
//! ```
//!
//! This crate turns raw transcript text into typed [`ProtocolLine`]s:
//! - [`extract`]: candidate lines from a block of page text
//! - [`dedup`]: cross-scan fingerprint filter
//! - [`classify`]: typed line classification and payload parsing
//! - [`format`]: builders for lines the bridge hands to the assistant

pub mod classify;
pub mod dedup;
pub mod errors;
pub mod extract;
pub mod fingerprint;
pub mod format;
pub mod payload;

pub use classify::{classify, is_action_line, is_update_line, LineKind, ProtocolLine, SessionLine};
pub use dedup::{Admission, DedupFilter, RetentionPolicy, SeenEntry, SeenFingerprintSet};
pub use errors::ProtocolError;
pub use extract::LineExtractor;
pub use fingerprint::Fingerprint;
pub use payload::{is_likely_complete_json, ActionPayload, Payload};

/// Marker opening a session handshake line.
pub const SESSION_MARKER: &str = "!baisession";

/// Marker opening any action line (create, update or delete).
pub const ACTION_MARKER: &str = "!baiact";

/// Markers that make a line a protocol candidate.
pub const PROTOCOL_MARKERS: [&str; 2] = [SESSION_MARKER, ACTION_MARKER];
