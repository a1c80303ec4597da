//! Timeout scheduler integration.
//!
//! Deadlines are part of saga state; a scheduler only has to deliver each
//! timeout message at least once. Late or repeated deliveries are dropped by
//! the step guards.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use contracts::Message;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::instance::Deadline;

/// Error raised by a scheduler that could not accept a deadline.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ScheduleError(pub String);

/// Delivers timeout messages addressed to saga instances.
#[async_trait]
pub trait TimeoutScheduler<M: Message + 'static>: Send + Sync {
    /// Arranges for `deadline.message` to reach `instance_id` at or after
    /// `deadline.due_at`.
    async fn schedule(&self, instance_id: &SagaId, deadline: Deadline<M>)
    -> Result<(), ScheduleError>;
}

/// Scheduler that only records deadlines; callers fire them explicitly.
#[derive(Debug)]
pub struct InMemoryTimeoutScheduler<M> {
    pending: Arc<Mutex<Vec<(SagaId, Deadline<M>)>>>,
}

impl<M> Clone for InMemoryTimeoutScheduler<M> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<M> Default for InMemoryTimeoutScheduler<M> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<M: Clone> InMemoryTimeoutScheduler<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deadlines not yet taken.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Removes and returns every deadline due at `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<(SagaId, M)> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut due, rest): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|(_, deadline)| deadline.due_at <= now);
        *pending = rest;
        due.sort_by_key(|(_, deadline)| deadline.due_at);
        due.into_iter()
            .map(|(instance_id, deadline)| (instance_id, deadline.message))
            .collect()
    }

    /// Removes and returns every deadline regardless of its due time.
    pub fn take_all(&self) -> Vec<(SagaId, M)> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .drain(..)
            .map(|(instance_id, deadline)| (instance_id, deadline.message))
            .collect()
    }
}

#[async_trait]
impl<M: Message + 'static> TimeoutScheduler<M> for InMemoryTimeoutScheduler<M> {
    async fn schedule(
        &self,
        instance_id: &SagaId,
        deadline: Deadline<M>,
    ) -> Result<(), ScheduleError> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((instance_id.clone(), deadline));
        Ok(())
    }
}

/// Scheduler backed by Tokio timers.
///
/// Each deadline gets a sleeping task that sends `(instance_id, message)` on
/// the channel returned by [`TokioTimeoutScheduler::new`]; the dispatcher
/// consumes it with [`crate::SagaDispatcher::forward_timeouts`]. Timers do not
/// survive a restart, so deadlines are re-armed from state at startup.
#[derive(Debug)]
pub struct TokioTimeoutScheduler<M> {
    sender: mpsc::UnboundedSender<(SagaId, M)>,
}

impl<M> Clone for TokioTimeoutScheduler<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M: Message + 'static> TokioTimeoutScheduler<M> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(SagaId, M)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl<M: Message + 'static> TimeoutScheduler<M> for TokioTimeoutScheduler<M> {
    async fn schedule(
        &self,
        instance_id: &SagaId,
        deadline: Deadline<M>,
    ) -> Result<(), ScheduleError> {
        if self.sender.is_closed() {
            return Err(ScheduleError("timeout channel is closed".to_string()));
        }

        let delay = (deadline.due_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let sender = self.sender.clone();
        let instance_id = instance_id.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!(
                %instance_id,
                message_type = %deadline.message_type,
                "timeout due"
            );
            if sender.send((instance_id, deadline.message)).is_err() {
                tracing::debug!("timeout receiver dropped");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::IdentityId;
    use contracts::RegistrationMessage;

    fn timeout_message(id: IdentityId) -> RegistrationMessage {
        RegistrationMessage::clan_approval_timed_out(id, uuid::Uuid::new_v4(), Utc::now(), Utc::now())
    }

    #[tokio::test]
    async fn in_memory_take_due_only_returns_due_deadlines() {
        let scheduler = InMemoryTimeoutScheduler::new();
        let now = Utc::now();
        let id = IdentityId::new();

        scheduler
            .schedule(&SagaId::from(id), Deadline::new(now + Duration::hours(48), timeout_message(id)))
            .await
            .unwrap();
        scheduler
            .schedule(&SagaId::from("other"), Deadline::new(now - Duration::seconds(1), timeout_message(id)))
            .await
            .unwrap();

        let due = scheduler.take_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, SagaId::from("other"));
        assert_eq!(scheduler.pending_count(), 1);

        assert_eq!(scheduler.take_all().len(), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_delivers_after_deadline() {
        let (scheduler, mut receiver) = TokioTimeoutScheduler::new();
        let id = IdentityId::new();

        scheduler
            .schedule(
                &SagaId::from(id),
                Deadline::new(Utc::now() + Duration::milliseconds(50), timeout_message(id)),
            )
            .await
            .unwrap();

        let (instance_id, message) = receiver.recv().await.unwrap();
        assert_eq!(instance_id, SagaId::from(id));
        assert_eq!(message.identity_id(), Some(id));
    }

    #[tokio::test]
    async fn tokio_scheduler_fires_past_deadlines_immediately() {
        let (scheduler, mut receiver) = TokioTimeoutScheduler::new();
        let id = IdentityId::new();

        scheduler
            .schedule(&SagaId::from(id), Deadline::new(Utc::now() - Duration::hours(1), timeout_message(id)))
            .await
            .unwrap();

        assert!(receiver.recv().await.is_some());
    }
}
