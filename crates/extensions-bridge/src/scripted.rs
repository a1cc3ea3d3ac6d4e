//! In-memory page used by the CLI and tests.
//!
//! Holds a chat transcript for evidence calls and a table of known selectors for actions.
//! In permissive mode every selector resolves, which lets the CLI dry-run a queue without a
//! browser attached.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bai_protocol::{LineExtractor, PROTOCOL_MARKERS};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    BridgeError, BridgeEvent, BridgeEventBus, DomScan, EvidenceProvider, HighlightService,
    PageActionExecutor, StepOutcome,
};

const DOM_SCAN_SAMPLES: usize = 5;

/// Call recorded by [`ScriptedPage`], in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum PageCall {
    Click(String),
    SetValue { selector: String, text: String },
    Scroll(f64),
    Wait(u64),
    Highlight(String),
    ClearHighlight,
}

#[derive(Clone, Debug, Default)]
struct ElementState {
    value: String,
    clicks: u32,
}

pub struct ScriptedPage {
    events: BridgeEventBus,
    extractor: LineExtractor,
    excerpt_chars: usize,
    transcript: RwLock<String>,
    selection: RwLock<String>,
    elements: DashMap<String, ElementState>,
    permissive: AtomicBool,
    evidence_failure: RwLock<Option<BridgeError>>,
    scroll_y: Mutex<f64>,
    calls: Mutex<Vec<PageCall>>,
}

impl ScriptedPage {
    pub fn new(events: BridgeEventBus) -> Self {
        Self {
            events,
            extractor: LineExtractor::default(),
            excerpt_chars: 2_000,
            transcript: RwLock::new(String::new()),
            selection: RwLock::new(String::new()),
            elements: DashMap::new(),
            permissive: AtomicBool::new(false),
            evidence_failure: RwLock::new(None),
            scroll_y: Mutex::new(0.0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Keep lines carrying `markers` in addition to the protocol markers.
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for marker in markers {
            self.extractor = self.extractor.with_marker(marker);
        }
        self
    }

    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars;
        self
    }

    /// Resolve every selector, including ones never registered.
    pub fn permissive(self) -> Self {
        self.set_permissive(true);
        self
    }

    pub fn set_permissive(&self, on: bool) {
        self.permissive.store(on, Ordering::SeqCst);
    }

    pub fn set_transcript(&self, text: impl Into<String>) {
        *self.transcript.write() = text.into();
    }

    pub fn append_transcript(&self, text: &str) {
        let mut transcript = self.transcript.write();
        if !transcript.is_empty() && !transcript.ends_with('\n') {
            transcript.push('\n');
        }
        transcript.push_str(text);
    }

    pub fn set_selection(&self, text: impl Into<String>) {
        *self.selection.write() = text.into();
    }

    pub fn add_element(&self, selector: impl Into<String>) {
        self.elements.insert(selector.into(), ElementState::default());
    }

    /// Make every evidence call fail with `error` until cleared.
    pub fn fail_evidence(&self, error: Option<BridgeError>) {
        *self.evidence_failure.write() = error;
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        self.elements.get(selector).map(|el| el.value.clone())
    }

    pub fn clicks_on(&self, selector: &str) -> u32 {
        self.elements.get(selector).map(|el| el.clicks).unwrap_or(0)
    }

    pub fn scroll_y(&self) -> f64 {
        *self.scroll_y.lock()
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.calls.lock().clone()
    }

    fn check_evidence(&self) -> Result<(), BridgeError> {
        match self.evidence_failure.read().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn resolve(&self, selector: &str) -> bool {
        if self.elements.contains_key(selector) {
            return true;
        }
        if self.permissive.load(Ordering::SeqCst) {
            self.elements
                .insert(selector.to_string(), ElementState::default());
            return true;
        }
        false
    }

    fn record(&self, call: PageCall) {
        self.calls.lock().push(call);
    }

    fn publish(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    fn dispatched(&self, op: &str, selector: Option<&str>, outcome: StepOutcome) -> StepOutcome {
        self.publish(BridgeEvent::ActionDispatched {
            op: op.to_string(),
            selector: selector.map(str::to_string),
            ok: outcome.ok,
        });
        outcome
    }
}

#[async_trait]
impl EvidenceProvider for ScriptedPage {
    async fn selection_text(&self) -> Result<String, BridgeError> {
        self.check_evidence()?;
        Ok(self.selection.read().clone())
    }

    async fn text_excerpt(&self) -> Result<String, BridgeError> {
        self.check_evidence()?;
        Ok(self
            .transcript
            .read()
            .chars()
            .take(self.excerpt_chars)
            .collect())
    }

    async fn run_dom_scan(&self) -> Result<DomScan, BridgeError> {
        self.check_evidence()?;
        let lines = self.extractor.extract(&self.transcript.read());
        let mut counts = BTreeMap::new();
        for marker in PROTOCOL_MARKERS {
            let hits = lines.iter().filter(|line| line.contains(marker)).count();
            counts.insert(marker.to_string(), hits);
        }
        counts.insert("lines".to_string(), lines.len());
        Ok(DomScan {
            counts,
            samples: lines.into_iter().take(DOM_SCAN_SAMPLES).collect(),
        })
    }

    async fn scan_for_protocol_lines(&self) -> Result<Vec<String>, BridgeError> {
        self.check_evidence()?;
        let lines = self.extractor.extract(&self.transcript.read());
        debug!(count = lines.len(), "scripted page scanned");
        self.publish(BridgeEvent::EvidenceCollected { lines: lines.len() });
        Ok(lines)
    }
}

#[async_trait]
impl PageActionExecutor for ScriptedPage {
    async fn click(&self, selector: &str) -> Result<StepOutcome, BridgeError> {
        self.record(PageCall::Click(selector.to_string()));
        let outcome = if self.resolve(selector) {
            if let Some(mut el) = self.elements.get_mut(selector) {
                el.clicks += 1;
            }
            StepOutcome::ok()
        } else {
            StepOutcome::failed("Element not found.")
        };
        Ok(self.dispatched("click", Some(selector), outcome))
    }

    async fn set_value(&self, selector: &str, text: &str) -> Result<StepOutcome, BridgeError> {
        self.record(PageCall::SetValue {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        let outcome = if self.resolve(selector) {
            if let Some(mut el) = self.elements.get_mut(selector) {
                el.value = text.to_string();
            }
            StepOutcome::ok()
        } else {
            StepOutcome::failed("Element not found.")
        };
        Ok(self.dispatched("input_text", Some(selector), outcome))
    }

    async fn scroll(&self, y: f64) -> Result<StepOutcome, BridgeError> {
        self.record(PageCall::Scroll(y));
        *self.scroll_y.lock() += y;
        Ok(self.dispatched("scroll", None, StepOutcome::ok()))
    }

    async fn wait(&self, ms: u64) -> Result<StepOutcome, BridgeError> {
        self.record(PageCall::Wait(ms));
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(self.dispatched("wait", None, StepOutcome::ok()))
    }
}

#[async_trait]
impl HighlightService for ScriptedPage {
    async fn highlight(&self, selector: &str) -> Result<(), BridgeError> {
        self.record(PageCall::Highlight(selector.to_string()));
        self.publish(BridgeEvent::Highlighted {
            selector: selector.to_string(),
        });
        Ok(())
    }

    async fn clear(&self) -> Result<(), BridgeError> {
        self.record(PageCall::ClearHighlight);
        self.publish(BridgeEvent::HighlightCleared);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn page() -> ScriptedPage {
        let (bus, _) = broadcast::channel(16);
        ScriptedPage::new(bus)
    }

    #[tokio::test]
    async fn strict_page_reports_missing_elements() {
        let page = page();
        page.add_element("#known");
        assert!(page.click("#known").await.unwrap().ok);
        let missing = page.click("#missing").await.unwrap();
        assert!(!missing.ok);
        assert_eq!(missing.error.as_deref(), Some("Element not found."));
        assert_eq!(page.clicks_on("#known"), 1);
    }

    #[tokio::test]
    async fn permissive_page_accepts_any_selector() {
        let page = page().permissive();
        assert!(page.set_value("#q", "hello").await.unwrap().ok);
        assert_eq!(page.value_of("#q").as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn dom_scan_counts_markers() {
        let page = page();
        page.set_transcript("hi\n!baisession {\"session_key\":\"k\"}\n!baiact000001 {\"a\":\"wait\"}\n");
        let scan = page.run_dom_scan().await.unwrap();
        assert_eq!(scan.counts["!baisession"], 1);
        assert_eq!(scan.counts["!baiact"], 1);
        assert_eq!(scan.counts["lines"], 2);
        assert_eq!(scan.samples.len(), 2);
    }

    #[tokio::test]
    async fn excerpt_is_truncated_on_char_boundary() {
        let page = page().with_excerpt_chars(3);
        page.set_transcript("héllo");
        assert_eq!(page.text_excerpt().await.unwrap(), "hél");
    }
}
