use std::sync::Arc;
use std::time::Duration;

use action_flow::{DriverOptions, ExecutionDriver, StepStatus};
use action_queue::{ActionStatus, RecordedElement};
use async_trait::async_trait;
use baibridge_core_types::{ActionId, EntryId};
use baibridge_state_center::{InMemoryStateStore, JsonFileStateStore};
use bridge_kernel::{Config, KernelError, RunSource, ScanEngine};
use bai_session::HandshakeStage;
use extensions_bridge::{BridgeError, DomScan, EvidenceProvider, ScriptedPage};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

async fn engine() -> ScanEngine {
    ScanEngine::open(Config::default(), Arc::new(InMemoryStateStore::new()))
        .await
        .unwrap()
}

fn id(raw: &str) -> ActionId {
    ActionId::parse(raw).unwrap()
}

#[tokio::test]
async fn create_update_delete_sequence() {
    let engine = engine().await;
    let report = engine
        .ingest_text(
            "assistant: here you go\n\
             !baiact000001 {\"a\":\"click\",\"s\":\"#a\"}\n\
             !baiact000002 {\"a\":\"click\",\"s\":\"#b\"}\n",
        )
        .await
        .unwrap();
    assert_eq!(report.lines, 2);
    assert_eq!(report.created, 2);

    let report = engine
        .ingest_text(
            "!baiact000001upd002 {\"a\":\"input_text\",\"s\":\"#a\",\"text\":\"hi\"}\n\
             !baiact000001upd001 {\"a\":\"click\",\"s\":\"#stale\"}\n\
             !baiact000002del\n",
        )
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.stale, 1);
    assert_eq!(report.deleted, 1);

    let queue = engine.queue().await;
    let ids: Vec<_> = queue.iter().map(|e| e.action_id.to_string()).collect();
    assert_eq!(ids, vec!["000001", "000002"]);
    assert_eq!(queue[0].update_version, 2);
    assert_eq!(
        queue[0].payload.as_ref().and_then(|p| p.text.as_deref()),
        Some("hi")
    );
    assert_eq!(queue[1].status, ActionStatus::Deleted);
}

#[tokio::test]
async fn repeated_lines_are_suppressed_across_scans() {
    let engine = engine().await;
    let text = "!baiact000001 {\"a\":\"click\",\"s\":\"#a\"}";
    assert_eq!(engine.ingest_text(text).await.unwrap().created, 1);

    let again = engine.ingest_text(text).await.unwrap();
    assert_eq!(again.suppressed, 1);
    assert_eq!(again.changes(), 0);
    assert_eq!(engine.queue().await.len(), 1);
}

#[tokio::test]
async fn session_line_connects_only_with_current_token() {
    let engine = engine().await;
    let foreign = engine
        .ingest_text("!baisession {\"session_key\":\"someone-else\"}")
        .await
        .unwrap();
    assert!(!foreign.connected);

    let line = engine.session_line().await;
    let report = engine.ingest_text(&line).await.unwrap();
    assert!(report.connected);
    assert!(engine.status().await.connected);

    let report = engine
        .ingest_text("!baisession {\"session_key\":\"someone-else-again\"}")
        .await
        .unwrap();
    assert_eq!(report.foreign_sessions, 1);
    assert!(!report.connected);
}

#[tokio::test]
async fn malformed_payload_is_recorded_as_parse_error() {
    let engine = engine().await;
    let report = engine
        .ingest_text("!baiact000007 {\"a\":\"click\",\"s\":")
        .await
        .unwrap();
    assert_eq!(report.parse_errors, vec!["000007".to_string()]);

    let queue = engine.queue().await;
    assert_eq!(queue[0].status, ActionStatus::ParseError);
    assert!(!queue[0].is_executable());

    let err = engine.add_to_run_list(&id("000007")).await.unwrap_err();
    assert!(matches!(err, KernelError::NotExecutable(_)));
    let err = engine.add_to_run_list(&id("000999")).await.unwrap_err();
    assert!(matches!(err, KernelError::UnknownAction(_)));
}

#[tokio::test]
async fn evidence_failure_leaves_state_untouched() {
    let engine = engine().await;
    let (bus, _) = broadcast::channel(16);
    let page = ScriptedPage::new(bus);
    page.set_transcript("!baiact000001 {\"a\":\"click\",\"s\":\"#a\"}");
    page.fail_evidence(Some(BridgeError::NoPermission("tab not granted".into())));

    let err = engine.scan_evidence(&page).await.unwrap_err();
    assert_eq!(err.code(), Some("NO_PERMISSION"));
    assert!(engine.queue().await.is_empty());

    page.fail_evidence(None);
    let report = engine.scan_evidence(&page).await.unwrap();
    assert_eq!(report.created, 1);
}

struct SlowProvider;

#[async_trait]
impl EvidenceProvider for SlowProvider {
    async fn selection_text(&self) -> Result<String, BridgeError> {
        Ok(String::new())
    }

    async fn text_excerpt(&self) -> Result<String, BridgeError> {
        Ok(String::new())
    }

    async fn run_dom_scan(&self) -> Result<DomScan, BridgeError> {
        Ok(DomScan::default())
    }

    async fn scan_for_protocol_lines(&self) -> Result<Vec<String>, BridgeError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(vec!["!baiact000001 {\"a\":\"click\",\"s\":\"#a\"}".into()])
    }
}

#[tokio::test]
async fn slow_evidence_times_out() {
    let mut config = Config::default();
    config.bridge.evidence_timeout_ms = 20;
    let engine = ScanEngine::open(config, Arc::new(InMemoryStateStore::new()))
        .await
        .unwrap();

    let err = engine.scan_evidence(&SlowProvider).await.unwrap_err();
    assert_eq!(err.code(), Some("TIMEOUT"));
    assert!(engine.queue().await.is_empty());
}

#[tokio::test]
async fn state_survives_reopen_and_rotation_keeps_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let token = {
        let store = Arc::new(JsonFileStateStore::open(&path).unwrap());
        let engine = ScanEngine::open(Config::default(), store).await.unwrap();
        let line = engine.session_line().await;
        engine
            .ingest_text(&format!(
                "{line}\n!baiact000001 {{\"a\":\"click\",\"s\":\"#a\"}}"
            ))
            .await
            .unwrap();
        engine.add_to_run_list(&id("000001")).await.unwrap();
        engine.token().await
    };

    let store = Arc::new(JsonFileStateStore::open(&path).unwrap());
    let engine = ScanEngine::open(Config::default(), store).await.unwrap();
    assert_eq!(engine.token().await, token);
    let status = engine.status().await;
    assert!(status.connected);
    assert_eq!(status.records, 1);
    assert_eq!(status.run_list, 1);

    // Fingerprints persisted too, so the old transcript does not re-apply.
    let again = engine
        .ingest_text("!baiact000001 {\"a\":\"click\",\"s\":\"#a\"}")
        .await
        .unwrap();
    assert_eq!(again.suppressed, 1);

    let rotated = engine.rotate_session().await.unwrap();
    assert_ne!(rotated, token);
    let status = engine.status().await;
    assert!(!status.connected);
    assert_eq!(status.records, 1);
}

#[tokio::test]
async fn run_list_edits_and_errors() {
    let engine = engine().await;
    engine
        .ingest_text(
            "!baiact000001 {\"a\":\"click\",\"s\":\"#a\"}\n\
             !baiact000002 {\"a\":\"scroll\",\"y\":200}",
        )
        .await
        .unwrap();
    let first = engine.add_to_run_list(&id("000001")).await.unwrap();
    let second = engine.add_to_run_list(&id("000002")).await.unwrap();
    let recorded = engine
        .record_element(RecordedElement {
            selector: "#save".into(),
            label: Some("Save".into()),
            url: None,
        })
        .await
        .unwrap()
        .unwrap();
    let third = engine.add_recorded_to_run_list(&recorded.id).await.unwrap();

    engine.move_in_run_list(&third.id, &first.id).await.unwrap();
    let order: Vec<_> = engine
        .run_list()
        .await
        .entries()
        .iter()
        .map(|e| e.id.clone())
        .collect();
    assert_eq!(order, vec![third.id.clone(), first.id.clone(), second.id.clone()]);

    let missing = EntryId("nope".into());
    assert!(matches!(
        engine.remove_from_run_list(&missing).await,
        Err(KernelError::UnknownEntry(_))
    ));
    engine.remove_from_run_list(&second.id).await.unwrap();
    assert_eq!(engine.run_list().await.len(), 2);

    engine.clear_run_list().await.unwrap();
    assert!(engine.run_list().await.is_empty());
}

#[tokio::test]
async fn workflow_handshake_produces_ack_then_ready() {
    let engine = engine().await;
    let prompt = engine.begin_handshake().await.unwrap();
    let workflow_id = engine.status().await.workflow_id.unwrap();
    assert!(prompt.contains(&workflow_id));
    assert_eq!(engine.status().await.handshake_stage, HandshakeStage::AwaitingAck);

    let handshake = format!(
        "!baihandshake {{\"protocol\":\"bai/1\",\"workflow_id\":\"{workflow_id}\",\"state\":\"awaiting_extension_ack\"}}"
    );
    let report = engine.ingest_text(&handshake).await.unwrap();
    assert_eq!(report.unrecognized, 1);
    assert_eq!(report.handshake_stage, HandshakeStage::AwaitingAck);
    let ack = report.ack_line.unwrap();
    assert!(ack.starts_with("!baiack {"));
    assert!(ack.contains(&workflow_id));

    let report = engine
        .ingest_text(&format!("{handshake}\n{ack}"))
        .await
        .unwrap();
    assert_eq!(report.handshake_stage, HandshakeStage::Ready);
    assert!(report.ack_line.is_none());
}

#[tokio::test]
async fn payload_for_another_tab_is_flagged() {
    let config = Config {
        current_tab: Some("7".into()),
        ..Config::default()
    };
    let engine = ScanEngine::open(config, Arc::new(InMemoryStateStore::new()))
        .await
        .unwrap();
    let report = engine
        .ingest_text(
            "!baiact000001 {\"a\":\"click\",\"s\":\"#a\",\"t\":9}\n\
             !baiact000002 {\"a\":\"click\",\"s\":\"#b\",\"t\":7}",
        )
        .await
        .unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.stale_tabs.len(), 1);
    assert_eq!(report.stale_tabs[0].action_id, "000001");
    assert_eq!(report.stale_tabs[0].tab, "9");
}

#[tokio::test]
async fn queue_executes_through_driver() {
    let engine = engine().await;
    engine
        .ingest_text(
            "!baiact000001 {\"a\":\"input_text\",\"s\":\"#q\",\"text\":\"rust\"}\n\
             !baiact000002 {\"a\":\"click\",\"s\":\"#missing\"}\n\
             !baiact000003 {\"a\":\"click\",\"s\":\"#go\"}",
        )
        .await
        .unwrap();

    let (bus, _) = broadcast::channel(64);
    let page = Arc::new(ScriptedPage::new(bus));
    page.add_element("#q");
    page.add_element("#go");
    let options = DriverOptions::default()
        .with_delay(Duration::from_millis(1))
        .with_highlight_settle(Duration::ZERO);
    let driver = ExecutionDriver::new(page.clone(), page.clone(), options);

    let report = engine
        .execute(&driver, RunSource::Queue, &CancellationToken::new())
        .await;
    let statuses: Vec<_> = report.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Succeeded]
    );
    assert_eq!(
        report.steps[1].error.as_deref(),
        Some("Element not found.")
    );
    assert_eq!(page.value_of("#q").as_deref(), Some("rust"));
    assert_eq!(page.clicks_on("#go"), 1);
}

#[tokio::test]
async fn clear_keeps_fingerprints_unless_all() {
    let engine = engine().await;
    let text = "!baiact000001 {\"a\":\"click\",\"s\":\"#a\"}";
    engine.ingest_text(text).await.unwrap();

    engine.clear_queue().await.unwrap();
    assert!(engine.queue().await.is_empty());
    assert_eq!(engine.ingest_text(text).await.unwrap().suppressed, 1);

    engine.clear_all().await.unwrap();
    assert_eq!(engine.status().await.seen_fingerprints, 0);
    assert_eq!(engine.ingest_text(text).await.unwrap().created, 1);
}

#[tokio::test]
async fn cleared_action_stays_cleared_while_line_remains_visible() {
    let mut config = Config::default();
    config.retention.max_age_secs = 1;
    let engine = ScanEngine::open(config, Arc::new(InMemoryStateStore::new()))
        .await
        .unwrap();
    let text = "!baiact000001 {\"a\":\"click\",\"s\":\"#a\"}";
    assert_eq!(engine.ingest_text(text).await.unwrap().created, 1);
    engine.clear_queue().await.unwrap();

    // Rescanned well within the window, for longer than the window itself.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let report = engine.ingest_text(text).await.unwrap();
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.created, 0);
    }
    assert!(engine.queue().await.is_empty());
}

#[tokio::test]
async fn malformed_action_markers_are_not_fingerprinted() {
    let engine = engine().await;
    let text = "!baiact00001 {\"a\":\"click\"}";
    for _ in 0..2 {
        let report = engine.ingest_text(text).await.unwrap();
        assert_eq!(report.unrecognized, 1);
        assert_eq!(report.suppressed, 0);
    }
    assert_eq!(engine.status().await.seen_fingerprints, 0);
}
