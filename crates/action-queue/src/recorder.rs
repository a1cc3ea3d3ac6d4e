//! Recorded elements
//!
//! A single physical click can reach the bridge more than once (capture listener plus
//! re-broadcast), so recordings pass through a short-lived duplicate guard.

use std::collections::HashMap;

use baibridge_core_types::EntryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SAME_SELECTOR_WINDOW_MS: i64 = 400;
const FINGERPRINT_BUCKET_MS: i64 = 200;
const FINGERPRINT_WINDOW_MS: i64 = 600;
const FINGERPRINT_TTL_MS: i64 = 2000;

/// Element reported by the page after the operator armed recording.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedElement {
    pub selector: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedItem {
    pub id: EntryId,
    pub label: String,
    pub selector: String,
    pub url: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Time-windowed duplicate detection for recordings.
#[derive(Clone, Debug, Default)]
pub struct RecordGuard {
    last_selector: Option<String>,
    last_at_ms: i64,
    fingerprints: HashMap<String, i64>,
}

impl RecordGuard {
    pub fn is_duplicate(&mut self, element: &RecordedElement, now: DateTime<Utc>) -> bool {
        let now_ms = now.timestamp_millis();
        if self.last_selector.as_deref() == Some(element.selector.as_str())
            && now_ms - self.last_at_ms < SAME_SELECTOR_WINDOW_MS
        {
            return true;
        }

        let fingerprint = format!(
            "{}|{}|{}|{}",
            element.selector,
            element.label.as_deref().unwrap_or_default(),
            element.url.as_deref().unwrap_or_default(),
            now_ms / FINGERPRINT_BUCKET_MS
        );
        if let Some(last) = self.fingerprints.get(&fingerprint) {
            if now_ms - last < FINGERPRINT_WINDOW_MS {
                return true;
            }
        }

        self.fingerprints.insert(fingerprint, now_ms);
        self.last_selector = Some(element.selector.clone());
        self.last_at_ms = now_ms;
        self.fingerprints
            .retain(|_, seen| now_ms - *seen <= FINGERPRINT_TTL_MS);
        false
    }
}

/// Recorded items in capture order.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    items: Vec<RecordedItem>,
    guard: RecordGuard,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<RecordedItem>) -> Self {
        Self {
            items,
            guard: RecordGuard::default(),
        }
    }

    pub fn record(&mut self, element: RecordedElement) -> Option<&RecordedItem> {
        self.record_at(element, Utc::now())
    }

    pub fn record_at(
        &mut self,
        element: RecordedElement,
        now: DateTime<Utc>,
    ) -> Option<&RecordedItem> {
        if element.selector.trim().is_empty() {
            return None;
        }
        if self.guard.is_duplicate(&element, now) {
            debug!(selector = %element.selector, "suppressing duplicate recording");
            return None;
        }
        self.items.push(RecordedItem {
            id: EntryId::new(),
            label: element.label.unwrap_or_else(|| "Element".to_string()),
            selector: element.selector,
            url: element.url,
            ts: now,
        });
        self.items.last()
    }

    pub fn get(&self, id: &EntryId) -> Option<&RecordedItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn remove(&mut self, id: &EntryId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| &item.id != id);
        before != self.items.len()
    }

    pub fn items(&self) -> &[RecordedItem] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
