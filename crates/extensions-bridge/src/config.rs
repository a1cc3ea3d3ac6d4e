//! Page collaborator timing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound for a single evidence call
    pub evidence_timeout_ms: u64,
    /// Pause after a highlight so the operator can see the target
    pub highlight_settle_ms: u64,
    /// Characters returned by `text_excerpt`
    pub excerpt_chars: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            evidence_timeout_ms: 5_000,
            highlight_settle_ms: 120,
            excerpt_chars: 2_000,
        }
    }
}

impl BridgeConfig {
    pub fn evidence_timeout(&self) -> Duration {
        Duration::from_millis(self.evidence_timeout_ms)
    }

    pub fn highlight_settle(&self) -> Duration {
        Duration::from_millis(self.highlight_settle_ms)
    }
}
