//! Action domain types: typed parameters, the lifecycle state machine,
//! and security-tier classification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sandbox::ResourceLimits;

// ── Lifecycle ────────────────────────────────────────────

/// Action lifecycle states.
///
/// PENDING → APPROVED | REJECTED, APPROVED → EXECUTING, and EXECUTING →
/// COMPLETED | FAILED are the only legal transitions. Low-risk actions
/// are born APPROVED and never pass through PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

impl ActionStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Rejected | ActionStatus::Completed | ActionStatus::Failed
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Executing => "executing",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// ── Security tiers ───────────────────────────────────────

/// Risk tier assigned at submission. HIGH and CRITICAL actions wait for
/// a human decision before anything executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityTier {
    Low,
    Medium,
    High,
    Critical,
}

impl SecurityTier {
    pub fn requires_approval(self) -> bool {
        matches!(self, SecurityTier::High | SecurityTier::Critical)
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityTier::Low => "low",
            SecurityTier::Medium => "medium",
            SecurityTier::High => "high",
            SecurityTier::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

// ── Parameters ───────────────────────────────────────────

/// Typed action parameters. The variant carries exactly the fields its
/// executor needs; there is no untyped parameter bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionParams {
    /// A conversational turn routed through the classifier to the LLM.
    Chat {
        message: String,
        /// Overrides the active model for this turn only.
        #[serde(default)]
        model: Option<String>,
    },
    /// A command run inside a fresh sandbox for the named skill.
    SkillExecution {
        skill_id: String,
        command: String,
        #[serde(default)]
        limits: Option<ResourceLimits>,
    },
    /// Changes the active model for subsequent chat turns.
    ModelSwitch { model: String },
    ApiCall {
        endpoint: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    FileOperation {
        operation: String,
        path: String,
        #[serde(default)]
        content: Option<String>,
    },
    ConfigChange {
        key: String,
        value: serde_json::Value,
    },
}

impl ActionParams {
    /// Stable kind tag, matching the serde discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionParams::Chat { .. } => "chat",
            ActionParams::SkillExecution { .. } => "skill_execution",
            ActionParams::ModelSwitch { .. } => "model_switch",
            ActionParams::ApiCall { .. } => "api_call",
            ActionParams::FileOperation { .. } => "file_operation",
            ActionParams::ConfigChange { .. } => "config_change",
        }
    }

    pub fn skill_id(&self) -> Option<&str> {
        match self {
            ActionParams::SkillExecution { skill_id, .. } => Some(skill_id),
            _ => None,
        }
    }
}

/// Maps parameters to a risk tier. Pure and deterministic.
///
/// Chat stays low risk because its input passes the classifier gate at
/// execution time. Skill execution is high only for skills the deployer
/// marked privileged; file operations only for destructive verbs;
/// config changes always demand a human.
pub fn determine_tier(params: &ActionParams, privileged_skills: &[String]) -> SecurityTier {
    match params {
        ActionParams::Chat { .. } => SecurityTier::Low,
        ActionParams::ModelSwitch { .. } => SecurityTier::Medium,
        ActionParams::ApiCall { .. } => SecurityTier::Medium,
        ActionParams::SkillExecution { skill_id, .. } => {
            if privileged_skills.iter().any(|s| s == skill_id) {
                SecurityTier::High
            } else {
                SecurityTier::Medium
            }
        }
        ActionParams::FileOperation { operation, .. } => {
            if is_destructive(operation) {
                SecurityTier::High
            } else {
                SecurityTier::Medium
            }
        }
        ActionParams::ConfigChange { .. } => SecurityTier::Critical,
    }
}

fn is_destructive(operation: &str) -> bool {
    matches!(
        operation.to_ascii_lowercase().as_str(),
        "delete" | "remove" | "write" | "modify" | "truncate"
    )
}

// ── Action ───────────────────────────────────────────────

/// One tracked action from submission to terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub id: Uuid,
    pub params: ActionParams,
    pub status: ActionStatus,
    pub tier: SecurityTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Identity of the human who decided a PENDING action.
    pub approved_by: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Action {
    pub fn new(params: ActionParams, tier: SecurityTier) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            params,
            status: ActionStatus::Pending,
            tier,
            created_at: now,
            updated_at: now,
            approved_by: None,
            result: None,
            error: None,
        }
    }
}
