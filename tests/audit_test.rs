//! Audit emission through the engine.

mod common;

use bastion_policy::{
    Action, AuditContext, AuditRecord, AuditSink, EngineConfig, EvaluationRequest, JsonLinesSink,
    PolicyEngine, PolicyError, Result, StaticAttributeProvider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Sink that blocks inside `record` until the gate is opened.
#[derive(Default)]
struct GatedSink {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
    records: Mutex<Vec<AuditRecord>>,
}

impl GatedSink {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    fn wait_entered(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.entered.load(Ordering::SeqCst) < count {
            assert!(Instant::now() < deadline, "audit worker never reached the sink");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl AuditSink for GatedSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct FailingSink;

impl AuditSink for FailingSink {
    fn record(&self, _record: &AuditRecord) -> Result<()> {
        Err(PolicyError::AuditSink("disk full".to_string()))
    }
}

fn audited_request(session: usize, user_id: u64) -> EvaluationRequest {
    EvaluationRequest::new("shutdown -h now", user_id, 1, "root").with_context(AuditContext::new(
        format!("session-{session}"),
        format!("user-{user_id}"),
        "web-01",
    ))
}

#[test]
fn test_full_queue_drops_oldest_without_blocking() {
    let (store, _) = common::shutdown_policy();
    let config = EngineConfig::default().with_audit_capacity(4);
    let sink = Arc::new(GatedSink::default());
    let engine = PolicyEngine::new(store, Arc::new(StaticAttributeProvider::new()), config)
        .unwrap()
        .with_audit_sink(sink.clone())
        .unwrap();

    // The worker picks up the first record and stalls in the sink.
    engine.evaluate(&audited_request(0, 9));
    sink.wait_entered(1);

    let start = Instant::now();
    for session in 1..=10 {
        let decision = engine.evaluate(&audited_request(session, 9));
        assert_eq!(decision.action(), Some(Action::Deny));
    }
    assert!(start.elapsed() < Duration::from_secs(1), "evaluation blocked on the audit sink");

    let metrics = engine.metrics();
    assert_eq!(metrics.audit_enqueued, 11);
    assert_eq!(metrics.audit_dropped, 6);

    sink.open();
    assert!(engine.flush_audit(Duration::from_secs(5)));

    let sessions: Vec<String> = sink
        .records
        .lock()
        .unwrap()
        .iter()
        .map(|record| record.session_id.clone())
        .collect();
    assert_eq!(
        sessions,
        ["session-0", "session-7", "session-8", "session-9", "session-10"]
    );
    assert_eq!(engine.audit_stats().unwrap().delivered, 5);
}

#[test]
fn test_json_lines_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("commands.jsonl");

    let (store, _) = common::shutdown_policy();
    let engine = common::engine(store)
        .with_audit_sink(Arc::new(JsonLinesSink::open(&path).unwrap()))
        .unwrap();

    // Allowed and unmatched commands leave no trace.
    engine.evaluate(&audited_request(1, 7));
    engine.evaluate(&EvaluationRequest::new("ls", 9, 1, "root"));
    engine.evaluate(&audited_request(2, 9));
    engine.shutdown();

    let contents = std::fs::read_to_string(&path).unwrap();
    let records: Vec<AuditRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.session_id, "session-2");
    assert_eq!(record.username, "user-9");
    assert_eq!(record.asset_name, "web-01");
    assert_eq!(record.account, "root");
    assert_eq!(record.command, "shutdown -h now");
    assert_eq!(record.action, Action::Deny);
    assert_eq!(record.rule_name, "deny shutdown");
}

#[test]
fn test_sink_failures_do_not_affect_decisions() {
    common::init_tracing();
    let (store, _) = common::shutdown_policy();
    let engine = common::engine(store)
        .with_audit_sink(Arc::new(FailingSink))
        .unwrap();

    for session in 0..3 {
        let decision = engine.evaluate(&audited_request(session, 9));
        assert_eq!(decision.action(), Some(Action::Deny));
    }
    assert!(engine.flush_audit(Duration::from_secs(5)));

    let metrics = engine.metrics();
    assert_eq!(metrics.audit_enqueued, 3);
    assert_eq!(metrics.audit_sink_failures, 3);
    assert_eq!(engine.audit_stats().unwrap().delivered, 0);
}

#[test]
fn test_records_after_shutdown_are_dropped() {
    let (store, _) = common::shutdown_policy();
    let engine = common::engine(store)
        .with_audit_sink(Arc::new(bastion_policy::MemoryAuditSink::new()))
        .unwrap();

    engine.shutdown();
    // Decisions keep working without an audit worker.
    let decision = engine.evaluate(&audited_request(0, 9));
    assert_eq!(decision.action(), Some(Action::Deny));
    assert_eq!(engine.metrics().audit_dropped, 1);
}
