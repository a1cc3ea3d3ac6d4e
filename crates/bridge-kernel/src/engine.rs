//! Scan engine
//!
//! Owns every piece of mutable bridge state behind one async mutex. A scan holds the lock
//! from the evidence call until the state is persisted, so two scans never interleave and
//! the reconciler and dedup filter stay single-writer.

use std::sync::Arc;

use action_flow::{FlowExecutor, PlannedStep, RunReport};
use action_queue::{
    ActionQueueEntry, ActionRecord, ActionStatus, ApplyOutcome, RecordedElement, RecordedItem,
    Recorder, Reconciler, RunList, RunListEntry,
};
use bai_protocol::{
    format, is_action_line, ActionPayload, DedupFilter, LineExtractor, LineKind, Payload,
    ProtocolLine, SeenFingerprintSet,
};
use bai_session::{
    ConnectionState, ConnectionTracker, ConnectionTransition, HandshakeStage, WorkflowHandshake,
};
use baibridge_core_types::{ActionId, EntryId, SessionToken, TabId};
use baibridge_state_center::{load_typed, save_typed, StateError, StateScope, StateStore};
use chrono::{DateTime, Utc};
use extensions_bridge::{with_timeout, EvidenceProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::KernelError;
use crate::snapshot::{QueueSnapshot, SessionSnapshot, QUEUE_KEY, SESSION_KEY};

/// Payload naming a tab other than the attached one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StaleTab {
    pub action_id: String,
    pub tab: String,
}

/// What one scan did.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ScanReport {
    /// Candidate lines after extraction
    pub lines: usize,
    /// Action lines dropped by the dedup filter
    pub suppressed: usize,
    pub created: usize,
    pub replaced: usize,
    pub updated: usize,
    pub deleted: usize,
    pub stale: usize,
    pub ignored: usize,
    pub unrecognized: usize,
    /// Ids whose first sighting had a malformed payload
    pub parse_errors: Vec<String>,
    pub malformed_sessions: usize,
    pub foreign_sessions: usize,
    pub connected: bool,
    pub handshake_stage: HandshakeStage,
    /// Ack line to paste back into the chat, when the assistant is waiting for one
    pub ack_line: Option<String>,
    pub stale_tabs: Vec<StaleTab>,
}

impl ScanReport {
    /// Reconciler changes caused by this scan.
    pub fn changes(&self) -> usize {
        self.created + self.replaced + self.updated + self.deleted
    }

    fn count(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created { id, status } => {
                self.created += 1;
                if status == ActionStatus::ParseError {
                    self.parse_errors.push(id.to_string());
                }
            }
            ApplyOutcome::Replaced { .. } => self.replaced += 1,
            ApplyOutcome::Updated { .. } => self.updated += 1,
            ApplyOutcome::Deleted { .. } => self.deleted += 1,
            ApplyOutcome::Stale { .. } => self.stale += 1,
            ApplyOutcome::Ignored { .. } => self.ignored += 1,
            ApplyOutcome::NotAnAction => self.unrecognized += 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatus {
    pub session_key: String,
    pub connection: ConnectionState,
    pub connected: bool,
    pub handshake_stage: HandshakeStage,
    pub workflow_id: Option<String>,
    pub records: usize,
    pub executable: usize,
    pub run_list: usize,
    pub recorded: usize,
    pub seen_fingerprints: usize,
}

/// Which list a run executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunSource {
    Queue,
    RunList,
}

struct EngineState {
    extractor: LineExtractor,
    filter: DedupFilter,
    reconciler: Reconciler,
    connection: ConnectionTracker,
    workflow: WorkflowHandshake,
    run_list: RunList,
    recorder: Recorder,
    current_tab: Option<TabId>,
}

impl EngineState {
    fn process(&mut self, lines: Vec<String>, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport {
            lines: lines.len(),
            ..ScanReport::default()
        };
        let evicted = self.filter.sweep(now);
        if evicted > 0 {
            debug!(evicted, "expired fingerprints evicted");
        }

        for raw in &lines {
            // Repeats are dropped on the raw text, before any payload is parsed.
            if is_action_line(raw) && !self.filter.admit(raw.trim(), now).is_admitted() {
                report.suppressed += 1;
                continue;
            }
            let line = ProtocolLine::parse(raw);
            match &line.kind {
                LineKind::Session(session) => {
                    if let ConnectionTransition::Rejected { .. } = self.connection.observe(session)
                    {
                        report.foreign_sessions += 1;
                    }
                }
                LineKind::MalformedSession(_) => report.malformed_sessions += 1,
                LineKind::Unrecognized => report.unrecognized += 1,
                _ => {
                    if let Some(stale) = self.stale_tab(&line) {
                        warn!(
                            id = %stale.action_id,
                            tab = %stale.tab,
                            "action targets a different tab"
                        );
                        report.stale_tabs.push(stale);
                    }
                    let outcome = self.reconciler.apply_at(&line, now);
                    report.count(outcome);
                }
            }
        }

        let observation = self.workflow.observe_lines(lines.iter().map(String::as_str));
        report.handshake_stage = observation.stage;
        report.ack_line = observation.ack_line;
        report.connected = self.connection.is_connected();
        report
    }

    fn stale_tab(&self, line: &ProtocolLine) -> Option<StaleTab> {
        let current = self.current_tab.as_ref()?;
        let (id, payload) = match &line.kind {
            LineKind::ActionCreate { id, payload } | LineKind::ActionUpdate { id, payload, .. } => {
                (id, payload)
            }
            _ => return None,
        };
        let Payload::Json(value) = payload else {
            return None;
        };
        let tab = ActionPayload::from_value(value).ok()?.tab?;
        (&tab != current).then(|| StaleTab {
            action_id: id.to_string(),
            tab: tab.0,
        })
    }

    fn queue_snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            records: self.reconciler.snapshot(),
            seen: self.filter.seen().entries(),
            run_list: self.run_list.clone(),
            recorded: self.recorder.items().to_vec(),
            workflow: self.workflow.state().clone(),
        }
    }

    fn session_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            token: self.connection.token().clone(),
            connection: self.connection.state().clone(),
        }
    }

    fn queue_entry(&self, id: &ActionId) -> Option<ActionQueueEntry> {
        self.reconciler.get(id).map(ActionQueueEntry::from_record)
    }
}

pub struct ScanEngine {
    config: Config,
    store: Arc<dyn StateStore>,
    state: Mutex<EngineState>,
}

impl ScanEngine {
    /// Restore persisted state from `store`, generating a session token on first use.
    pub async fn open(config: Config, store: Arc<dyn StateStore>) -> Result<Self, KernelError> {
        let session: Option<SessionSnapshot> =
            load_or_reset(store.as_ref(), StateScope::Session, SESSION_KEY).await?;
        let queue: QueueSnapshot = load_or_reset(store.as_ref(), StateScope::Durable, QUEUE_KEY)
            .await?
            .unwrap_or_default();

        let fresh_session = session.is_none();
        let connection = match session {
            Some(snapshot) => ConnectionTracker::restore(snapshot.token, snapshot.connection),
            None => {
                info!("generated new session token");
                ConnectionTracker::new(SessionToken::generate())
            }
        };

        let markers = [
            config.protocol.handshake_line_prefix.clone(),
            config.protocol.ack_line_prefix.clone(),
        ];
        let state = EngineState {
            extractor: markers
                .into_iter()
                .fold(LineExtractor::default(), |extractor, marker| {
                    extractor.with_marker(marker)
                }),
            filter: DedupFilter::new(SeenFingerprintSet::from_entries(
                config.retention.clone(),
                queue.seen,
            )),
            reconciler: Reconciler::from_records(queue.records),
            connection,
            workflow: WorkflowHandshake::restore(config.protocol.clone(), queue.workflow),
            run_list: queue.run_list,
            recorder: Recorder::from_items(queue.recorded),
            current_tab: config.current_tab.clone().map(TabId),
        };
        info!(
            records = state.reconciler.len(),
            run_list = state.run_list.len(),
            connected = state.connection.is_connected(),
            "scan engine restored"
        );

        let engine = Self {
            config,
            store,
            state: Mutex::new(state),
        };
        if fresh_session {
            let state = engine.state.lock().await;
            engine.persist_session(&state).await?;
            drop(state);
        }
        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn token(&self) -> SessionToken {
        self.state.lock().await.connection.token().clone()
    }

    /// Line the assistant must echo to bind the chat to this bridge.
    pub async fn session_line(&self) -> String {
        format::session_line(&self.token().await)
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        let queue = state.reconciler.queue();
        EngineStatus {
            session_key: state.connection.token().to_string(),
            connection: state.connection.state().clone(),
            connected: state.connection.is_connected(),
            handshake_stage: state.workflow.stage(),
            workflow_id: state.workflow.workflow_id().map(|id| id.0.clone()),
            records: queue.len(),
            executable: queue.iter().filter(|e| e.is_executable()).count(),
            run_list: state.run_list.len(),
            recorded: state.recorder.items().len(),
            seen_fingerprints: state.filter.seen().len(),
        }
    }

    /// Replace the session token; the connection drops until the new token is confirmed.
    pub async fn rotate_session(&self) -> Result<SessionToken, KernelError> {
        let mut state = self.state.lock().await;
        let token = SessionToken::generate();
        state.connection.rotate(token.clone());
        self.store.clear_scope(StateScope::Session).await?;
        self.persist_session(&state).await?;
        info!("session token rotated");
        Ok(token)
    }

    /// Start the staged handshake and return the bootstrap prompt.
    pub async fn begin_handshake(&self) -> Result<String, KernelError> {
        let mut state = self.state.lock().await;
        let token = state.connection.token().clone();
        let prompt = state.workflow.begin(&token);
        self.persist_queue(&state).await?;
        Ok(prompt)
    }

    pub async fn reset_handshake(&self) -> Result<(), KernelError> {
        let mut state = self.state.lock().await;
        state.workflow.reset();
        self.persist_queue(&state).await
    }

    pub async fn set_current_tab(&self, tab: Option<TabId>) {
        self.state.lock().await.current_tab = tab;
    }

    /// Scan operator-supplied text (a pasted transcript block).
    pub async fn ingest_text(&self, text: &str) -> Result<ScanReport, KernelError> {
        let mut state = self.state.lock().await;
        let lines = state.extractor.extract(text);
        self.finish_scan(&mut state, lines).await
    }

    /// Pull candidate lines from the page and scan them.
    pub async fn scan_evidence(
        &self,
        provider: &dyn EvidenceProvider,
    ) -> Result<ScanReport, KernelError> {
        let mut state = self.state.lock().await;
        let raw = with_timeout(
            self.config.bridge.evidence_timeout(),
            provider.scan_for_protocol_lines(),
        )
        .await
        .map_err(|err| {
            warn!(code = err.code(), error = %err, "evidence provider failed");
            KernelError::from(err)
        })?;
        let lines = state.extractor.extract_blocks(raw.iter().map(String::as_str));
        self.finish_scan(&mut state, lines).await
    }

    async fn finish_scan(
        &self,
        state: &mut EngineState,
        lines: Vec<String>,
    ) -> Result<ScanReport, KernelError> {
        let report = state.process(lines, Utc::now());
        info!(
            lines = report.lines,
            changes = report.changes(),
            suppressed = report.suppressed,
            stale = report.stale,
            connected = report.connected,
            "scan complete"
        );
        self.persist(state).await?;
        Ok(report)
    }

    pub async fn queue(&self) -> Vec<ActionQueueEntry> {
        self.state.lock().await.reconciler.queue()
    }

    pub async fn records(&self) -> Vec<ActionRecord> {
        self.state.lock().await.reconciler.snapshot()
    }

    /// Drop every record; the seen set is kept so a rescan does not resurrect them.
    pub async fn clear_queue(&self) -> Result<(), KernelError> {
        let mut state = self.state.lock().await;
        state.reconciler.clear();
        self.persist_queue(&state).await
    }

    /// Drop records, fingerprints, run list and recordings.
    pub async fn clear_all(&self) -> Result<(), KernelError> {
        let mut state = self.state.lock().await;
        state.reconciler.clear();
        state.filter.clear();
        state.run_list.clear();
        state.recorder.clear();
        info!("bridge state cleared");
        self.persist_queue(&state).await
    }

    pub async fn run_list(&self) -> RunList {
        self.state.lock().await.run_list.clone()
    }

    pub async fn add_to_run_list(&self, id: &ActionId) -> Result<RunListEntry, KernelError> {
        let mut state = self.state.lock().await;
        let entry = state
            .queue_entry(id)
            .ok_or_else(|| KernelError::UnknownAction(id.to_string()))?;
        let entry_id = state
            .run_list
            .add_ai(&entry)
            .ok_or_else(|| KernelError::NotExecutable(id.to_string()))?;
        let added = find_entry(&state.run_list, &entry_id)?;
        self.persist_queue(&state).await?;
        Ok(added)
    }

    pub async fn record_element(
        &self,
        element: RecordedElement,
    ) -> Result<Option<RecordedItem>, KernelError> {
        let mut state = self.state.lock().await;
        let item = state.recorder.record(element).cloned();
        if item.is_some() {
            self.persist_queue(&state).await?;
        }
        Ok(item)
    }

    pub async fn recorded(&self) -> Vec<RecordedItem> {
        self.state.lock().await.recorder.items().to_vec()
    }

    pub async fn remove_recorded(&self, id: &EntryId) -> Result<(), KernelError> {
        let mut state = self.state.lock().await;
        if !state.recorder.remove(id) {
            return Err(KernelError::UnknownEntry(id.to_string()));
        }
        self.persist_queue(&state).await
    }

    pub async fn add_recorded_to_run_list(
        &self,
        id: &EntryId,
    ) -> Result<RunListEntry, KernelError> {
        let mut state = self.state.lock().await;
        let item = state
            .recorder
            .get(id)
            .cloned()
            .ok_or_else(|| KernelError::UnknownEntry(id.to_string()))?;
        let entry_id = state.run_list.add_recorded(&item);
        let added = find_entry(&state.run_list, &entry_id)?;
        self.persist_queue(&state).await?;
        Ok(added)
    }

    pub async fn remove_from_run_list(&self, id: &EntryId) -> Result<(), KernelError> {
        let mut state = self.state.lock().await;
        if !state.run_list.remove(id) {
            return Err(KernelError::UnknownEntry(id.to_string()));
        }
        self.persist_queue(&state).await
    }

    /// Move `dragged` into the slot currently held by `target`.
    pub async fn move_in_run_list(
        &self,
        dragged: &EntryId,
        target: &EntryId,
    ) -> Result<(), KernelError> {
        let mut state = self.state.lock().await;
        if dragged == target {
            return Ok(());
        }
        if !state.run_list.reorder(dragged, target) {
            return Err(KernelError::UnknownEntry(format!("{dragged} or {target}")));
        }
        self.persist_queue(&state).await
    }

    pub async fn clear_run_list(&self) -> Result<(), KernelError> {
        let mut state = self.state.lock().await;
        state.run_list.clear();
        self.persist_queue(&state).await
    }

    pub async fn plan(&self, source: RunSource) -> Vec<PlannedStep> {
        let state = self.state.lock().await;
        match source {
            RunSource::Queue => state
                .reconciler
                .queue()
                .iter()
                .map(PlannedStep::from_queue_entry)
                .collect(),
            RunSource::RunList => state
                .run_list
                .entries()
                .iter()
                .map(PlannedStep::from_run_list_entry)
                .collect(),
        }
    }

    /// Execute a snapshot of `source`; scans may proceed while the run is in flight.
    pub async fn execute(
        &self,
        executor: &dyn FlowExecutor,
        source: RunSource,
        cancel: &CancellationToken,
    ) -> RunReport {
        let steps = self.plan(source).await;
        executor.execute(&steps, cancel).await
    }

    async fn persist(&self, state: &EngineState) -> Result<(), KernelError> {
        self.persist_session(state).await?;
        self.persist_queue(state).await
    }

    async fn persist_session(&self, state: &EngineState) -> Result<(), KernelError> {
        save_typed(
            self.store.as_ref(),
            StateScope::Session,
            SESSION_KEY,
            &state.session_snapshot(),
        )
        .await?;
        Ok(())
    }

    async fn persist_queue(&self, state: &EngineState) -> Result<(), KernelError> {
        save_typed(
            self.store.as_ref(),
            StateScope::Durable,
            QUEUE_KEY,
            &state.queue_snapshot(),
        )
        .await?;
        Ok(())
    }
}

fn find_entry(list: &RunList, id: &EntryId) -> Result<RunListEntry, KernelError> {
    list.entries()
        .iter()
        .find(|entry| &entry.id == id)
        .cloned()
        .ok_or_else(|| KernelError::UnknownEntry(id.to_string()))
}

/// Load `key`, discarding values whose shape no longer matches.
async fn load_or_reset<T>(
    store: &dyn StateStore,
    scope: StateScope,
    key: &str,
) -> Result<Option<T>, KernelError>
where
    T: DeserializeOwned,
{
    match load_typed(store, scope, key).await {
        Ok(value) => Ok(value),
        Err(StateError::Shape { reason, .. }) => {
            warn!(key, reason = %reason, "discarding persisted state with unexpected shape");
            store.remove(scope, key).await?;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
