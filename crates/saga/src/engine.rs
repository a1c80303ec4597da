//! Saga engine: correlates messages, runs steps and persists instances.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use contracts::Message;
use saga_store::{SagaQuery, SagaRecord, SagaStore, SaveOptions, Version};
use serde::{Deserialize, Serialize};

use crate::audit::AuditKind;
use crate::compensation;
use crate::context::{Decision, StepContext};
use crate::definition::{SagaDefinition, SagaPhase};
use crate::error::{Result, SagaError};
use crate::instance::{CompletedStep, Deadline, InstanceState, SagaState};
use crate::outbox::Outbox;
use crate::publisher::CommandPublisher;
use crate::registry::{StepDefinition, StepRegistry};
use crate::status::{RejectionKind, SagaStatus};
use crate::timeout::TimeoutScheduler;

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How many times a transition is retried after an optimistic
    /// concurrency conflict before giving up.
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}

/// What happened to a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Disposition {
    /// A new instance was created.
    Started,
    /// A forward step ran and the saga is still in progress.
    Advanced,
    /// The final step ran.
    Completed,
    /// The saga was rolled back and is now terminal.
    Compensated {
        status: SagaStatus,
        compensated: usize,
        failed: usize,
    },
    /// Dropped: the instance is terminal, or a start was redelivered.
    Duplicate,
    /// Dropped: the instance is not in a phase that accepts the message.
    Stale,
    /// Dropped: no step handles the message type.
    Unroutable,
    /// Dropped without a write: no instance exists for a non-start message.
    Orphaned,
}

impl Disposition {
    /// Returns true if no handler ran for the message.
    pub fn is_dropped(&self) -> bool {
        matches!(
            self,
            Disposition::Duplicate
                | Disposition::Stale
                | Disposition::Unroutable
                | Disposition::Orphaned
        )
    }

    fn drop_reason(&self) -> Option<&'static str> {
        match self {
            Disposition::Duplicate => Some("duplicate"),
            Disposition::Stale => Some("stale"),
            Disposition::Unroutable => Some("unroutable"),
            Disposition::Orphaned => Some("orphaned"),
            _ => None,
        }
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub instance_id: SagaId,
    /// Committed version; absent for orphaned messages.
    pub version: Option<Version>,
    pub status: Option<SagaStatus>,
    pub current_step: Option<String>,
    pub disposition: Disposition,
    /// Number of commands published after the commit, including ones left
    /// pending by an earlier transition.
    pub published: usize,
    /// Number of timeouts handed to the scheduler after the commit.
    pub timeouts_scheduled: usize,
}

/// A transition ready to be committed.
struct Transition<S: SagaDefinition> {
    state: InstanceState<S>,
    expected: Version,
    disposition: Disposition,
    commands: Vec<S::Command>,
    timeouts: Vec<Deadline<S::Message>>,
    /// Effects of earlier transitions that were never acknowledged.
    pending: Outbox<S::Command, S::Message>,
}

/// The saga orchestrator for saga type `S`.
///
/// Every handled message is one load, one transition and one
/// compare-and-swap save; the forward step and, on rejection, the complete
/// compensation run are committed together, along with the outbox of
/// commands and timeouts the transition produced. The outbox is delivered
/// only after that save succeeded and is cleared once delivered; an outbox
/// whose delivery failed is delivered again by the next transition of the
/// instance or by [`SagaEngine::flush_outboxes`].
pub struct SagaEngine<S, St, P, T>
where
    S: SagaDefinition,
    St: SagaStore,
    P: CommandPublisher<S::Command>,
    T: TimeoutScheduler<S::Message>,
{
    registry: StepRegistry<S>,
    store: St,
    publisher: P,
    scheduler: T,
    config: EngineConfig,
}

impl<S, St, P, T> SagaEngine<S, St, P, T>
where
    S: SagaDefinition,
    St: SagaStore,
    P: CommandPublisher<S::Command>,
    T: TimeoutScheduler<S::Message>,
{
    /// Creates an engine with the saga type's registry and default config.
    pub fn new(store: St, publisher: P, scheduler: T) -> Result<Self> {
        Ok(Self::with_registry(
            S::registry()?,
            store,
            publisher,
            scheduler,
            EngineConfig::default(),
        ))
    }

    pub fn with_registry(
        registry: StepRegistry<S>,
        store: St,
        publisher: P,
        scheduler: T,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            publisher,
            scheduler,
            config,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &StepRegistry<S> {
        &self.registry
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Resolves the instance a message belongs to.
    pub fn correlate(&self, message: &S::Message) -> Result<SagaId> {
        self.registry.correlator().resolve(message)
    }

    /// Correlates and handles a message.
    pub async fn handle(&self, message: S::Message) -> Result<EngineResult> {
        let instance_id = self.correlate(&message)?;
        self.handle_correlated(instance_id, message).await
    }

    /// Handles a message already routed to `instance_id`.
    #[tracing::instrument(
        skip_all,
        fields(
            saga_type = S::SAGA_TYPE,
            instance_id = %instance_id,
            message_type = message.message_type()
        )
    )]
    pub async fn handle_correlated(
        &self,
        instance_id: SagaId,
        message: S::Message,
    ) -> Result<EngineResult> {
        validate_instance_id(&instance_id)?;
        let started = Instant::now();
        let message_type = message.message_type();
        metrics::counter!(
            "saga_messages_total",
            "saga_type" => S::SAGA_TYPE,
            "message_type" => message_type
        )
        .increment(1);

        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            match self.try_handle(&instance_id, &message).await {
                Ok(result) => break result,
                Err(e) if e.is_conflict() => {
                    metrics::counter!("saga_concurrency_conflicts_total", "saga_type" => S::SAGA_TYPE)
                        .increment(1);
                    if attempts > self.config.max_conflict_retries {
                        tracing::error!(attempts, "concurrency retries exhausted");
                        return Err(SagaError::ConcurrencyExhausted {
                            instance_id,
                            attempts,
                        });
                    }
                    tracing::debug!(attempts, "concurrency conflict, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to handle message");
                    return Err(e);
                }
            }
        };

        metrics::histogram!("saga_handle_duration_seconds", "saga_type" => S::SAGA_TYPE)
            .record(started.elapsed().as_secs_f64());
        Ok(result)
    }

    /// One load-transition-save attempt followed by the post-commit effects.
    async fn try_handle(&self, instance_id: &SagaId, message: &S::Message) -> Result<EngineResult> {
        let now = Utc::now();
        let Some(transition) = self.transition(instance_id, message, now).await? else {
            tracing::warn!("no saga instance for message, dropping");
            metrics::counter!(
                "saga_messages_dropped_total",
                "saga_type" => S::SAGA_TYPE,
                "reason" => "orphaned"
            )
            .increment(1);
            return Ok(EngineResult {
                instance_id: instance_id.clone(),
                version: None,
                status: None,
                current_step: None,
                disposition: Disposition::Orphaned,
                published: 0,
                timeouts_scheduled: 0,
            });
        };

        let Transition {
            mut state,
            expected,
            disposition,
            commands,
            timeouts,
            pending,
        } = transition;

        if !pending.is_empty() {
            tracing::warn!(
                commands = pending.commands.len(),
                timeouts = pending.timeouts.len(),
                "delivering outbox left pending by an earlier transition"
            );
            metrics::counter!("saga_outbox_redeliveries_total", "saga_type" => S::SAGA_TYPE)
                .increment(1);
        }
        let mut outbox = pending;
        outbox.append(Outbox::new(commands, timeouts));

        let version = expected.next();
        state.version = version;
        let record = SagaRecord::from_state(
            instance_id.clone(),
            S::SAGA_TYPE,
            version,
            state.status.as_str(),
            state.status.is_terminal(),
            &state,
        )?
        .with_outbox((!outbox.is_empty()).then_some(&outbox))?;
        let options = if expected == Version::initial() {
            SaveOptions::expect_new()
        } else {
            SaveOptions::expect_version(expected)
        };
        self.store.save(record, options).await?;

        self.observe(&state, disposition);

        let (published, timeouts_scheduled) = self.deliver(instance_id, version, outbox).await?;

        Ok(EngineResult {
            instance_id: instance_id.clone(),
            version: Some(version),
            status: Some(state.status),
            current_step: Some(state.current_step.as_str().to_string()),
            disposition,
            published,
            timeouts_scheduled,
        })
    }

    /// Hands a committed outbox to the scheduler and the publisher, then
    /// acknowledges it. Returns the number of commands published and of
    /// timeouts scheduled.
    ///
    /// On failure the outbox stays stored with `version`.
    async fn deliver(
        &self,
        instance_id: &SagaId,
        version: Version,
        outbox: Outbox<S::Command, S::Message>,
    ) -> Result<(usize, usize)> {
        if outbox.is_empty() {
            return Ok((0, 0));
        }
        let Outbox { commands, timeouts } = outbox;

        let timeouts_scheduled = timeouts.len();
        for deadline in timeouts {
            self.scheduler
                .schedule(instance_id, deadline)
                .await
                .map_err(|e| SagaError::Schedule {
                    instance_id: instance_id.clone(),
                    reason: e.to_string(),
                })?;
        }
        if timeouts_scheduled > 0 {
            metrics::counter!("saga_timeouts_scheduled_total", "saga_type" => S::SAGA_TYPE)
                .increment(timeouts_scheduled as u64);
        }

        let published = commands.len();
        if !commands.is_empty() {
            self.publisher
                .publish(instance_id, &commands)
                .await
                .map_err(|e| SagaError::Publish {
                    instance_id: instance_id.clone(),
                    reason: e.to_string(),
                })?;
            metrics::counter!("saga_commands_published_total", "saga_type" => S::SAGA_TYPE)
                .increment(published as u64);
        }

        match self.store.clear_outbox(instance_id, version).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(%version, "outbox already carried by a newer version"),
            // Delivered but not acknowledged: the next delivery repeats it.
            Err(e) => tracing::warn!(error = %e, %version, "failed to clear delivered outbox"),
        }
        Ok((published, timeouts_scheduled))
    }

    /// Loads the instance and computes the next state, without writing.
    ///
    /// Returns None for a non-start message addressed to a missing instance.
    async fn transition(
        &self,
        instance_id: &SagaId,
        message: &S::Message,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition<S>>> {
        let message_type = message.message_type();
        let is_start = self.registry.is_start(message_type);

        let (mut state, expected, pending) = match self.store.load(instance_id).await? {
            Some(record) => (
                self.decode(&record)?,
                record.version,
                decode_outbox::<S>(&record)?,
            ),
            None if is_start => (
                SagaState::new(
                    instance_id.clone(),
                    S::SAGA_TYPE,
                    <S::Phase as SagaPhase>::initial(),
                    now,
                ),
                Version::initial(),
                Outbox::default(),
            ),
            None => return Ok(None),
        };

        let (disposition, text) = if state.status.is_terminal() {
            (
                Disposition::Duplicate,
                format!("Dropped {message_type}: saga already {}", state.status),
            )
        } else if is_start && expected != Version::initial() {
            (
                Disposition::Duplicate,
                format!("Dropped {message_type}: saga already started"),
            )
        } else {
            match self.registry.lookup(message_type) {
                None => (
                    Disposition::Unroutable,
                    format!("Dropped {message_type}: no step registered"),
                ),
                Some(step) if !is_start && !step.accepts(state.current_step) => (
                    Disposition::Stale,
                    format!(
                        "Dropped {message_type}: not accepted in phase {}",
                        state.current_step.as_str()
                    ),
                ),
                Some(step) => {
                    let mut transition = self.apply_step(step, message, state, expected, now);
                    transition.pending = pending;
                    return Ok(Some(transition));
                }
            }
        };

        let kind = match disposition {
            Disposition::Stale => AuditKind::Stale,
            Disposition::Unroutable => AuditKind::Unroutable,
            _ => AuditKind::Duplicate,
        };
        tracing::warn!(
            reason = disposition.drop_reason().unwrap_or("dropped"),
            phase = state.current_step.as_str(),
            "message dropped"
        );
        state.record(now, kind, Some(message_type), text, None);

        Ok(Some(Transition {
            state,
            expected,
            disposition,
            commands: Vec::new(),
            timeouts: Vec::new(),
            pending,
        }))
    }

    /// Runs a forward step on a working copy and, if it rejects or fails,
    /// the compensation run.
    fn apply_step(
        &self,
        step: &StepDefinition<S>,
        message: &S::Message,
        mut state: InstanceState<S>,
        expected: Version,
        now: DateTime<Utc>,
    ) -> Transition<S> {
        let message_type = message.message_type();
        let mut working = state.clone();
        let mut ctx = StepContext::new(now, message_type);

        match (step.forward())(message, &mut working, &mut ctx) {
            Ok(mut commands) => {
                let (decision, requested) = ctx.into_parts();
                let mut timeouts = Vec::new();
                let disposition = match decision {
                    None => {
                        push_completed(&mut working, message, now);
                        working.deadlines.extend(requested.iter().cloned());
                        timeouts = requested;
                        tracing::info!(phase = working.current_step.as_str(), "saga step completed");
                        if expected == Version::initial() {
                            Disposition::Started
                        } else {
                            Disposition::Advanced
                        }
                    }
                    Some(Decision::Complete) => {
                        push_completed(&mut working, message, now);
                        working.status = SagaStatus::Completed;
                        working.current_step = <S::Phase as SagaPhase>::completed();
                        working.completed_at = Some(now);
                        working.deadlines.clear();
                        let elapsed = (now - working.started_at).num_seconds();
                        tracing::info!(elapsed_seconds = elapsed, "saga completed");
                        Disposition::Completed
                    }
                    Some(Decision::Reject { kind, reason }) => {
                        tracing::warn!(?kind, %reason, "saga rejected, compensating");
                        let report =
                            compensation::compensate(&self.registry, &mut working, kind, &reason, now);
                        commands.extend(report.commands);
                        Disposition::Compensated {
                            status: kind.status(),
                            compensated: report.compensated,
                            failed: report.failed,
                        }
                    }
                };
                Transition {
                    state: working,
                    expected,
                    disposition,
                    commands,
                    timeouts,
                    pending: Outbox::default(),
                }
            }
            Err(e) => {
                // The failed handler's partial mutations are discarded with `working`.
                tracing::warn!(error = %e, "saga step failed, compensating");
                state.record(
                    now,
                    AuditKind::StepFailed,
                    Some(message_type),
                    format!("Step {message_type} failed"),
                    Some(e.to_string()),
                );
                let reason = format!("{message_type} failed: {e}");
                let report = compensation::compensate(
                    &self.registry,
                    &mut state,
                    RejectionKind::Failed,
                    &reason,
                    now,
                );
                Transition {
                    state,
                    expected,
                    disposition: Disposition::Compensated {
                        status: SagaStatus::Failed,
                        compensated: report.compensated,
                        failed: report.failed,
                    },
                    commands: report.commands,
                    timeouts: Vec::new(),
                    pending: Outbox::default(),
                }
            }
        }
    }

    fn observe(&self, state: &InstanceState<S>, disposition: Disposition) {
        if let Some(reason) = disposition.drop_reason() {
            metrics::counter!(
                "saga_messages_dropped_total",
                "saga_type" => S::SAGA_TYPE,
                "reason" => reason
            )
            .increment(1);
            return;
        }
        match disposition {
            Disposition::Completed => {
                metrics::counter!("saga_completed_total", "saga_type" => S::SAGA_TYPE)
                    .increment(1);
            }
            Disposition::Compensated { status, failed, .. } => {
                metrics::counter!(
                    "saga_compensated_total",
                    "saga_type" => S::SAGA_TYPE,
                    "outcome" => status.as_str()
                )
                .increment(1);
                if failed > 0 {
                    tracing::warn!(
                        instance_id = %state.instance_id,
                        failed,
                        "saga terminal with compensations awaiting reconciliation"
                    );
                }
            }
            _ => {}
        }
    }

    fn decode(&self, record: &SagaRecord) -> Result<InstanceState<S>> {
        if record.saga_type != S::SAGA_TYPE {
            return Err(SagaError::SagaTypeMismatch {
                instance_id: record.instance_id.clone(),
                expected: S::SAGA_TYPE.to_string(),
                actual: record.saga_type.clone(),
            });
        }
        let mut state: InstanceState<S> = record.to_state()?;
        state.version = record.version;
        Ok(state)
    }

    /// Loads the state of one instance.
    pub async fn get_instance(&self, instance_id: &SagaId) -> Result<Option<InstanceState<S>>> {
        validate_instance_id(instance_id)?;
        match self.store.load(instance_id).await? {
            Some(record) => Ok(Some(self.decode(&record)?)),
            None => Ok(None),
        }
    }

    /// Lists instances of this saga type matching `query`.
    pub async fn list_instances(&self, query: SagaQuery) -> Result<Vec<InstanceState<S>>> {
        let records = self.store.query(query.saga_type(S::SAGA_TYPE)).await?;
        records.iter().map(|record| self.decode(record)).collect()
    }

    /// Counts instances of this saga type matching `query`.
    pub async fn count_instances(&self, query: SagaQuery) -> Result<usize> {
        Ok(self.store.count(query.saga_type(S::SAGA_TYPE)).await?)
    }

    /// Re-registers the deadlines of every non-terminal instance.
    ///
    /// Called at startup so that timeouts armed before a restart are
    /// delivered; deliveries that arrive after the step resolved are dropped
    /// as stale. Returns the number of deadlines handed to the scheduler.
    #[tracing::instrument(skip(self), fields(saga_type = S::SAGA_TYPE))]
    pub async fn rearm_timeouts(&self) -> Result<usize> {
        let instances = self
            .list_instances(SagaQuery::new().terminal(false))
            .await?;

        let mut rearmed = 0;
        for state in instances {
            for deadline in state.deadlines {
                self.scheduler
                    .schedule(&state.instance_id, deadline)
                    .await
                    .map_err(|e| SagaError::Schedule {
                        instance_id: state.instance_id.clone(),
                        reason: e.to_string(),
                    })?;
                rearmed += 1;
            }
        }
        tracing::info!(rearmed, "timeouts re-armed");
        Ok(rearmed)
    }

    /// Delivers every outbox still pending after a failed publish or
    /// schedule. Returns the number of instances whose outbox was delivered.
    ///
    /// An instance whose delivery fails again is logged and left for the
    /// next sweep.
    #[tracing::instrument(skip(self), fields(saga_type = S::SAGA_TYPE))]
    pub async fn flush_outboxes(&self) -> Result<usize> {
        let records = self
            .store
            .query(SagaQuery::for_saga_type(S::SAGA_TYPE).pending_outbox(true))
            .await?;

        let mut flushed = 0;
        for record in records {
            let outbox = decode_outbox::<S>(&record)?;
            match self.deliver(&record.instance_id, record.version, outbox).await {
                Ok(_) => flushed += 1,
                Err(e) => tracing::warn!(
                    instance_id = %record.instance_id,
                    error = %e,
                    "pending outbox still undeliverable"
                ),
            }
        }
        if flushed > 0 {
            tracing::info!(flushed, "pending outboxes delivered");
        }
        Ok(flushed)
    }
}

fn decode_outbox<S: SagaDefinition>(
    record: &SagaRecord,
) -> Result<Outbox<S::Command, S::Message>> {
    match &record.outbox {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Outbox::default()),
    }
}

fn validate_instance_id(instance_id: &SagaId) -> Result<()> {
    if instance_id.as_str().trim().is_empty() {
        return Err(SagaError::InvalidInstanceId(instance_id.to_string()));
    }
    Ok(())
}

fn push_completed<D, P, M: Message>(state: &mut SagaState<D, P, M>, message: &M, now: DateTime<Utc>) {
    state.completed_steps.push(CompletedStep {
        message_type: message.message_type().to_string(),
        message: message.clone(),
        completed_at: now,
    });
}

/// Object-safe view of an engine, used by the dispatcher.
#[async_trait]
pub trait SagaHandler: Send + Sync + 'static {
    type Message: contracts::Message + 'static;

    fn correlate(&self, message: &Self::Message) -> Result<SagaId>;

    async fn handle_correlated(
        &self,
        instance_id: SagaId,
        message: Self::Message,
    ) -> Result<EngineResult>;
}

#[async_trait]
impl<S, St, P, T> SagaHandler for SagaEngine<S, St, P, T>
where
    S: SagaDefinition,
    St: SagaStore + 'static,
    P: CommandPublisher<S::Command> + 'static,
    T: TimeoutScheduler<S::Message> + 'static,
{
    type Message = S::Message;

    fn correlate(&self, message: &S::Message) -> Result<SagaId> {
        SagaEngine::correlate(self, message)
    }

    async fn handle_correlated(&self, instance_id: SagaId, message: S::Message) -> Result<EngineResult> {
        SagaEngine::handle_correlated(self, instance_id, message).await
    }
}
