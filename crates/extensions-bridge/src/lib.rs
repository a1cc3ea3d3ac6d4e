//! Collaborators between the bridge core and a live browser page.
//!
//! The core never touches the page directly. It asks an [`EvidenceProvider`] for transcript
//! text, a [`PageActionExecutor`] to perform steps, and a [`HighlightService`] to mark the
//! element about to be acted on. Every call is fallible with a typed [`BridgeError`] whose
//! [`BridgeError::code`] is stable across releases.

pub mod config;
pub mod scripted;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub use config::BridgeConfig;
pub use scripted::{PageCall, ScriptedPage};

/// Errors surfaced by page collaborators.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("no permission for the active page: {0}")]
    NoPermission(String),
    #[error("no receiver in the active page: {0}")]
    NoReceiver(String),
    #[error("no active tab")]
    NoTab,
    #[error("page call timed out after {0} ms")]
    Timeout(u64),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NoPermission(_) => "NO_PERMISSION",
            BridgeError::NoReceiver(_) => "NO_RECEIVER",
            BridgeError::NoTab => "NO_TAB",
            BridgeError::Timeout(_) => "TIMEOUT",
            BridgeError::Unsupported(_) => "UNSUPPORTED",
            BridgeError::Internal(_) => "INTERNAL",
        }
    }
}

/// Summary of a DOM scan: marker counts plus a few sample lines.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomScan {
    pub counts: BTreeMap<String, usize>,
    pub samples: Vec<String>,
}

/// Page-side result of one action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Events published by page collaborators to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BridgeEvent {
    EvidenceCollected {
        lines: usize,
    },
    ActionDispatched {
        op: String,
        selector: Option<String>,
        ok: bool,
    },
    Highlighted {
        selector: String,
    },
    HighlightCleared,
}

pub type BridgeEventBus = broadcast::Sender<BridgeEvent>;

#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    async fn selection_text(&self) -> Result<String, BridgeError>;
    async fn text_excerpt(&self) -> Result<String, BridgeError>;
    async fn run_dom_scan(&self) -> Result<DomScan, BridgeError>;
    /// Candidate protocol lines visible on the page, in document order.
    async fn scan_for_protocol_lines(&self) -> Result<Vec<String>, BridgeError>;
}

#[async_trait]
pub trait PageActionExecutor: Send + Sync {
    async fn click(&self, selector: &str) -> Result<StepOutcome, BridgeError>;
    async fn set_value(&self, selector: &str, text: &str) -> Result<StepOutcome, BridgeError>;
    async fn scroll(&self, y: f64) -> Result<StepOutcome, BridgeError>;
    async fn wait(&self, ms: u64) -> Result<StepOutcome, BridgeError>;
}

#[async_trait]
pub trait HighlightService: Send + Sync {
    async fn highlight(&self, selector: &str) -> Result<(), BridgeError>;
    async fn clear(&self) -> Result<(), BridgeError>;
}

/// Bound a page call; elapsed calls become [`BridgeError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Timeout(timeout.as_millis() as u64)),
    }
}
