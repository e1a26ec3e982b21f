//! Audit emission for non-allow decisions.
//!
//! The engine never writes audit records itself. It builds an
//! [`AuditRecord`] and hands it to an [`AuditQueue`], whose single worker
//! thread delivers it to an [`AuditSink`] off the decision path.

pub mod jsonl;
pub mod queue;

pub use jsonl::JsonLinesSink;
pub use queue::{AuditQueue, AuditQueueStats};

use crate::decision::{EvaluationRequest, MatchDecision};
use crate::error::Result;
use crate::rule::{Action, EntityId, RuleId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Session details that only matter for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditContext {
    pub session_id: String,
    pub username: String,
    pub asset_name: String,
}

impl AuditContext {
    pub fn new(
        session_id: impl Into<String>,
        username: impl Into<String>,
        asset_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            asset_name: asset_name.into(),
        }
    }
}

/// One audited command decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: String,
    pub user_id: EntityId,
    pub username: String,
    pub asset_id: EntityId,
    pub asset_name: String,
    pub account: String,
    pub command: String,
    pub rule_id: RuleId,
    pub rule_name: String,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(request: &EvaluationRequest, decision: &MatchDecision) -> Self {
        Self {
            session_id: request.context.session_id.clone(),
            user_id: request.user_id,
            username: request.context.username.clone(),
            asset_id: request.asset_id,
            asset_name: request.context.asset_name.clone(),
            account: request.account.clone(),
            command: request.command.clone(),
            rule_id: decision.rule_id,
            rule_name: decision.rule_name.clone(),
            action: decision.action,
            timestamp: Utc::now(),
        }
    }
}

/// Destination of audit records.
///
/// Called from the queue's worker thread only, one record at a time.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
