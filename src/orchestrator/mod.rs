//! Action orchestrator: the single entry point for anything the agent
//! is asked to do.
//!
//! Every request becomes an [`Action`] that moves through an explicit
//! state machine. Risk is tiered at submission; HIGH and CRITICAL
//! actions park in PENDING until a human decides. Each transition is
//! written to the audit trail before it takes effect. Execution is
//! dispatched onto a background task so submission never blocks on a
//! model or a sandbox.

pub mod action;
pub mod audit;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::ClassifierGate;
use crate::config::{Config, OrchestratorConfig};
use crate::error::{redact, CoreError};
use crate::llm::LlmBackend;
use crate::sandbox::SandboxEngine;

pub use action::{determine_tier, Action, ActionParams, ActionStatus, SecurityTier};
pub use audit::{AuditEntry, AuditLog};

pub struct ActionOrchestrator {
    /// Self-handle for spawning dispatch tasks.
    me: Weak<ActionOrchestrator>,
    actions: RwLock<HashMap<Uuid, Action>>,
    audit: AuditLog,
    classifier: ClassifierGate,
    sandbox: Arc<SandboxEngine>,
    llm: Arc<dyn LlmBackend>,
    config: OrchestratorConfig,
    /// Model used for chat turns that do not name one. Mutated only by
    /// a completed model switch.
    active_model: Mutex<String>,
    exec_timeout_secs: u64,
}

impl ActionOrchestrator {
    pub fn new(
        config: &Config,
        classifier: ClassifierGate,
        sandbox: Arc<SandboxEngine>,
        llm: Arc<dyn LlmBackend>,
        audit: AuditLog,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            actions: RwLock::new(HashMap::new()),
            audit,
            classifier,
            sandbox,
            llm,
            config: config.orchestrator.clone(),
            active_model: Mutex::new(config.llm.model.clone()),
            exec_timeout_secs: config.sandbox.exec_timeout_secs,
        })
    }

    // ── Submission and approval ──────────────────────────

    /// Accepts a request, assigns its tier, and either parks it for
    /// approval or hands it straight to the dispatcher. The audit entry
    /// is written before the action becomes visible. A caller-supplied
    /// tier wins over the computed one.
    pub fn submit(&self, params: ActionParams, tier_override: Option<SecurityTier>) -> Action {
        let tier = tier_override
            .unwrap_or_else(|| action::determine_tier(&params, &self.config.privileged_skills));
        let mut action = Action::new(params, tier);

        if tier.requires_approval() {
            info!(
                "action {} ({}) held for approval at tier {tier}",
                action.id,
                action.params.kind()
            );
        } else {
            action.status = ActionStatus::Approved;
            action.updated_at = Utc::now();
        }

        self.audit.record(
            AuditEntry::new(action.id, action.params.kind(), &action.status.to_string())
                .skill_id(action.params.skill_id())
                .details(json!({ "tier": tier.to_string() })),
        );

        let dispatch = action.status == ActionStatus::Approved;
        self.actions
            .write()
            .expect("action table")
            .insert(action.id, action.clone());
        if dispatch {
            self.spawn_dispatch(action.id);
        }
        action
    }

    /// Records a human decision on a PENDING action. Any other state is
    /// left untouched and reported as an invalid-state error.
    pub fn approve(
        &self,
        id: Uuid,
        approved: bool,
        approver: &str,
    ) -> Result<Action, CoreError> {
        let snapshot = {
            let mut actions = self.actions.write().expect("action table");
            let action = actions
                .get_mut(&id)
                .ok_or_else(|| CoreError::NotFound(format!("action {id}")))?;
            if action.status != ActionStatus::Pending {
                return Err(CoreError::InvalidState(format!(
                    "action {id} is {}, only pending actions can be decided",
                    action.status
                )));
            }
            let decided = if approved {
                ActionStatus::Approved
            } else {
                ActionStatus::Rejected
            };
            // Audit-first: the decision is on record before it takes
            // effect.
            self.audit.record(
                AuditEntry::new(id, action.params.kind(), &decided.to_string())
                    .skill_id(action.params.skill_id())
                    .details(json!({ "approver": approver })),
            );
            action.status = decided;
            action.approved_by = Some(approver.to_string());
            action.updated_at = Utc::now();
            action.clone()
        };

        info!(
            "action {id} {} by {approver}",
            if approved { "approved" } else { "rejected" }
        );

        if approved {
            self.spawn_dispatch(id);
        }
        Ok(snapshot)
    }

    // ── Queries ──────────────────────────────────────────

    pub fn get_status(&self, id: Uuid) -> Option<Action> {
        self.actions.read().expect("action table").get(&id).cloned()
    }

    pub fn list_pending(&self) -> Vec<Action> {
        self.actions
            .read()
            .expect("action table")
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn active_model(&self) -> String {
        self.active_model.lock().expect("active model").clone()
    }

    // ── Dispatch ─────────────────────────────────────────

    fn spawn_dispatch(&self, id: Uuid) {
        // Upgrade only fails during teardown, when dispatching new work
        // would be wrong anyway.
        if let Some(this) = self.me.upgrade() {
            tokio::spawn(async move { this.dispatch(id).await });
        }
    }

    async fn dispatch(self: Arc<Self>, id: Uuid) {
        let action = match self.get_status(id) {
            Some(a) if a.status == ActionStatus::Approved => a,
            _ => return,
        };

        self.audit.record(
            AuditEntry::new(id, action.params.kind(), "executing")
                .skill_id(action.params.skill_id()),
        );
        self.update_action(id, |a| a.status = ActionStatus::Executing);

        let result = match &action.params {
            ActionParams::Chat { message, model } => {
                self.execute_chat(message, model.as_deref()).await
            }
            ActionParams::SkillExecution {
                skill_id,
                command,
                limits,
            } => self.execute_skill(skill_id, command, limits.clone()).await,
            ActionParams::ModelSwitch { model } => self.execute_model_switch(model).await,
            // Tiered, approvable, and audited, but with no executor
            // yet: they complete with a structured marker instead of
            // failing.
            ActionParams::ApiCall { .. }
            | ActionParams::FileOperation { .. }
            | ActionParams::ConfigChange { .. } => Ok(json!({
                "status": "not_implemented",
                "action_type": action.params.kind(),
            })),
        };

        match result {
            Ok(value) => {
                self.audit.record(
                    AuditEntry::new(id, action.params.kind(), "completed")
                        .skill_id(action.params.skill_id())
                        .outcome("success"),
                );
                self.update_action(id, |a| {
                    a.status = ActionStatus::Completed;
                    a.result = Some(value);
                });
            }
            Err(e) => {
                let outcome = match &e {
                    CoreError::Validation { .. } => "blocked",
                    _ => "error",
                };
                let message = redact(&e.to_string());
                self.audit.record(
                    AuditEntry::new(id, action.params.kind(), "failed")
                        .skill_id(action.params.skill_id())
                        .outcome(outcome)
                        .details(json!({ "error": message })),
                );
                warn!("action {id} failed: {message}");
                self.update_action(id, |a| {
                    a.status = ActionStatus::Failed;
                    a.error = Some(message);
                });
            }
        }
    }

    // ── Executors ────────────────────────────────────────

    /// Chat turn: classifier gate first, then the sanitized text goes
    /// to the model. A blocked input is a Validation error, never a
    /// model call.
    async fn execute_chat(
        &self,
        message: &str,
        model: Option<&str>,
    ) -> Result<serde_json::Value, CoreError> {
        let verdict = self.classifier.validate(message, Some("chat"));
        if !verdict.is_valid {
            return Err(CoreError::Validation {
                threat_level: verdict.threat_level.to_string(),
                patterns: verdict.detected_patterns,
            });
        }

        let model = model
            .map(str::to_string)
            .unwrap_or_else(|| self.active_model());
        let response = self.llm.generate(&model, &verdict.sanitized_input).await?;
        Ok(json!({
            "model": model,
            "response": response,
            "threat_level": verdict.threat_level.to_string(),
        }))
    }

    /// Skill run: a fresh sandbox per action, torn down afterwards no
    /// matter how the exec went.
    async fn execute_skill(
        &self,
        skill_id: &str,
        command: &str,
        limits: Option<crate::sandbox::ResourceLimits>,
    ) -> Result<serde_json::Value, CoreError> {
        let verdict = self.classifier.validate(command, Some("skill"));
        if !verdict.is_valid {
            return Err(CoreError::Validation {
                threat_level: verdict.threat_level.to_string(),
                patterns: verdict.detected_patterns,
            });
        }

        let instance = self.sandbox.create(skill_id, limits).await?;
        let exec = self
            .sandbox
            .exec(instance.id, command, self.exec_timeout_secs)
            .await;
        if let Err(e) = self.sandbox.stop(instance.id, true).await {
            warn!("sandbox {} teardown after exec: {e}", instance.id);
        }

        let output = exec?;
        Ok(json!({
            "sandbox_id": instance.id,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        }))
    }

    /// Switches the active model after confirming the backend actually
    /// serves it.
    async fn execute_model_switch(&self, model: &str) -> Result<serde_json::Value, CoreError> {
        let available = self.llm.list_models().await?;
        if !available.iter().any(|m| m == model) {
            return Err(CoreError::NotFound(format!(
                "model {model} not served by backend {}",
                self.llm.name()
            )));
        }
        let previous = {
            let mut active = self.active_model.lock().expect("active model");
            std::mem::replace(&mut *active, model.to_string())
        };
        info!("active model switched: {previous} -> {model}");
        Ok(json!({ "previous": previous, "model": model }))
    }

    // ── Shutdown ─────────────────────────────────────────

    /// Waits up to the configured grace window for in-flight actions to
    /// reach a terminal state.
    pub async fn shutdown(&self) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.shutdown_grace_secs);
        loop {
            let executing = self
                .actions
                .read()
                .expect("action table")
                .values()
                .filter(|a| a.status == ActionStatus::Executing)
                .count();
            if executing == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown: {executing} action(s) still executing after grace window");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn update_action<F>(&self, id: Uuid, mutate: F)
    where
        F: FnOnce(&mut Action),
    {
        let mut actions = self.actions.write().expect("action table");
        if let Some(action) = actions.get_mut(&id) {
            mutate(action);
            action.updated_at = Utc::now();
        }
    }
}
