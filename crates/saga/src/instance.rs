//! Per-instance saga state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::SagaId;
use contracts::Message;
use saga_store::Version;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditKind, AuditTrail};
use crate::context::StepContext;
use crate::definition::SagaDefinition;
use crate::status::SagaStatus;

/// A forward step that completed, kept so it can be compensated later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep<M> {
    pub message_type: String,
    /// The message that drove the step.
    pub message: M,
    pub completed_at: DateTime<Utc>,
}

/// A timeout message to deliver to the instance once `due_at` has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deadline<M> {
    pub due_at: DateTime<Utc>,
    pub message_type: String,
    pub message: M,
}

impl<M: Message> Deadline<M> {
    pub fn new(due_at: DateTime<Utc>, message: M) -> Self {
        Self {
            due_at,
            message_type: message.message_type().to_string(),
            message,
        }
    }
}

/// A compensation that failed and needs manual follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    /// Step whose compensation failed.
    pub message_type: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Everything known about one saga instance.
///
/// Handlers own `data` and `current_step`; everything else is maintained by
/// the engine and exposed read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState<D, P, M> {
    pub(crate) instance_id: SagaId,
    pub(crate) saga_type: String,
    pub(crate) version: Version,
    pub(crate) status: SagaStatus,
    /// Logical phase of the saga.
    pub current_step: P,
    /// Domain fields accumulated by the steps.
    pub data: D,
    pub(crate) retry_counts: BTreeMap<String, u32>,
    pub(crate) audit_trail: AuditTrail,
    pub(crate) completed_steps: Vec<CompletedStep<M>>,
    pub(crate) deadlines: Vec<Deadline<M>>,
    pub(crate) reconciliation: Vec<ReconciliationItem>,
    pub(crate) error_message: Option<String>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

/// State of an instance of saga type `S`.
pub type InstanceState<S> = SagaState<
    <S as SagaDefinition>::Data,
    <S as SagaDefinition>::Phase,
    <S as SagaDefinition>::Message,
>;

impl<D: Default, P, M> SagaState<D, P, M> {
    pub(crate) fn new(
        instance_id: SagaId,
        saga_type: &str,
        initial_step: P,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id,
            saga_type: saga_type.to_string(),
            version: Version::initial(),
            status: SagaStatus::Processing,
            current_step: initial_step,
            data: D::default(),
            retry_counts: BTreeMap::new(),
            audit_trail: AuditTrail::new(),
            completed_steps: Vec::new(),
            deadlines: Vec::new(),
            reconciliation: Vec::new(),
            error_message: None,
            started_at,
            completed_at: None,
        }
    }
}

// Query methods
impl<D, P: Copy, M> SagaState<D, P, M> {
    pub fn instance_id(&self) -> &SagaId {
        &self.instance_id
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Version of the last committed transition.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn current_step(&self) -> P {
        self.current_step
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit_trail
    }

    /// Completed forward steps, oldest first.
    pub fn completed_steps(&self) -> &[CompletedStep<M>] {
        &self.completed_steps
    }

    /// Timeouts that are still armed.
    pub fn deadlines(&self) -> &[Deadline<M>] {
        &self.deadlines
    }

    pub fn reconciliation_items(&self) -> &[ReconciliationItem] {
        &self.reconciliation
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Retry count of a retryable step.
    pub fn retry_count(&self, step: &str) -> u32 {
        self.retry_counts.get(step).copied().unwrap_or(0)
    }
}

// Handler helpers
impl<D, P, M> SagaState<D, P, M> {
    /// Appends a step entry to the audit trail.
    pub fn audit(&mut self, ctx: &StepContext<M>, message: impl Into<String>, detail: Option<String>) {
        self.audit_trail.append(AuditEntry::new(
            ctx.now(),
            AuditKind::Step,
            Some(ctx.message_type()),
            message,
            detail,
        ));
    }

    /// Increments the retry count of a step and returns the new count.
    pub fn increment_retry(&mut self, step: &str) -> u32 {
        let count = self.retry_counts.entry(step.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Disarms pending timeouts of the given message type.
    pub fn clear_deadlines(&mut self, message_type: &str) {
        self.deadlines
            .retain(|deadline| deadline.message_type != message_type);
    }

    pub(crate) fn record(
        &mut self,
        at: DateTime<Utc>,
        kind: AuditKind,
        message_type: Option<&str>,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        self.audit_trail
            .append(AuditEntry::new(at, kind, message_type, message, detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::RegistrationMessage;
    use common::IdentityId;

    type TestState = SagaState<u32, u8, RegistrationMessage>;

    #[test]
    fn new_state_is_processing_at_version_zero() {
        let state = TestState::new(SagaId::from("saga-1"), "Test", 0, Utc::now());
        assert_eq!(state.status(), SagaStatus::Processing);
        assert_eq!(state.version(), Version::initial());
        assert!(state.audit_trail().is_empty());
        assert_eq!(state.retry_count("Anything"), 0);
    }

    #[test]
    fn retry_counts_are_per_step() {
        let mut state = TestState::new(SagaId::from("saga-1"), "Test", 0, Utc::now());
        assert_eq!(state.increment_retry("A"), 1);
        assert_eq!(state.increment_retry("A"), 2);
        assert_eq!(state.increment_retry("B"), 1);
        assert_eq!(state.retry_count("A"), 2);
    }

    #[test]
    fn clear_deadlines_only_removes_matching_type() {
        let mut state = TestState::new(SagaId::from("saga-1"), "Test", 0, Utc::now());
        let id = IdentityId::new();
        state.deadlines.push(Deadline::new(
            Utc::now(),
            RegistrationMessage::registration_cancelled(id, "late"),
        ));
        state.deadlines.push(Deadline::new(
            Utc::now(),
            RegistrationMessage::clan_approval_timed_out(
                id,
                uuid::Uuid::new_v4(),
                Utc::now(),
                Utc::now(),
            ),
        ));

        state.clear_deadlines("ClanApprovalTimedOut");

        assert_eq!(state.deadlines().len(), 1);
        assert_eq!(state.deadlines()[0].message_type, "RegistrationCancelled");
    }

    #[test]
    fn state_survives_json_round_trip() {
        let mut state = TestState::new(SagaId::from("saga-1"), "Test", 3, Utc::now());
        let ctx = StepContext::new(Utc::now(), "IdentityCreated");
        state.audit(&ctx, "Identity created", None);

        let json = serde_json::to_value(&state).unwrap();
        let back: TestState = serde_json::from_value(json).unwrap();
        assert_eq!(back.current_step(), 3);
        assert_eq!(back.audit_trail().len(), 1);
    }
}
