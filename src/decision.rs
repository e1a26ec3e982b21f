//! Evaluation inputs and outputs.

use crate::audit::AuditContext;
use crate::rule::{Action, EntityId, RuleId};
use serde::{Deserialize, Serialize};

/// One command about to be executed in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub command: String,
    pub user_id: EntityId,
    pub asset_id: EntityId,
    /// Remote account the session is logged in as.
    pub account: String,
    /// Carried into audit records only; never affects the decision.
    #[serde(default)]
    pub context: AuditContext,
}

impl EvaluationRequest {
    pub fn new(
        command: impl Into<String>,
        user_id: EntityId,
        asset_id: EntityId,
        account: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            user_id,
            asset_id,
            account: account.into(),
            context: AuditContext::default(),
        }
    }

    pub fn with_context(mut self, context: AuditContext) -> Self {
        self.context = context;
        self
    }
}

/// Metadata of the rule that decided a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub matched: bool,
    pub action: Action,
    pub rule_id: RuleId,
    pub rule_name: String,
    pub priority: u8,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// The first rule whose scopes and command group matched.
    Matched(MatchDecision),
    /// No rule applies; the command is implicitly allowed.
    NoMatch,
    /// The caller gave up before a decision was reached. Not an allow.
    Cancelled,
}

impl Decision {
    /// Whether the session may run the command without operator interaction.
    pub fn is_allowed(&self) -> bool {
        match self {
            Decision::Matched(decision) => decision.action.permits_execution(),
            Decision::NoMatch => true,
            Decision::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Decision::Cancelled)
    }

    pub fn action(&self) -> Option<Action> {
        match self {
            Decision::Matched(decision) => Some(decision.action),
            _ => None,
        }
    }

    pub fn rule_id(&self) -> Option<RuleId> {
        self.matched().map(|decision| decision.rule_id)
    }

    pub fn matched(&self) -> Option<&MatchDecision> {
        match self {
            Decision::Matched(decision) => Some(decision),
            _ => None,
        }
    }
}
