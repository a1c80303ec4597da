//! Outbound command publishing.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::SagaId;
use contracts::Message;
use thiserror::Error;

/// Error raised when commands could not be handed to the transport.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PublishError(pub String);

/// Hands outbound commands to the transport.
///
/// Only called after the transition that produced the commands committed.
#[async_trait]
pub trait CommandPublisher<C: Message + 'static>: Send + Sync {
    async fn publish(&self, instance_id: &SagaId, commands: &[C]) -> Result<(), PublishError>;
}

/// A command recorded by [`InMemoryCommandPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedCommand<C> {
    pub instance_id: SagaId,
    pub command: C,
}

/// Publisher that records every command, for tests and embedding.
#[derive(Debug)]
pub struct InMemoryCommandPublisher<C> {
    published: Arc<Mutex<Vec<PublishedCommand<C>>>>,
    fail: Arc<AtomicBool>,
}

impl<C> Clone for InMemoryCommandPublisher<C> {
    fn clone(&self) -> Self {
        Self {
            published: Arc::clone(&self.published),
            fail: Arc::clone(&self.fail),
        }
    }
}

impl<C> Default for InMemoryCommandPublisher<C> {
    fn default() -> Self {
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<C: Message> InMemoryCommandPublisher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent publishes fail until reset.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every command published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedCommand<C>> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commands published for one instance.
    pub fn published_for(&self, instance_id: &SagaId) -> Vec<C> {
        self.published()
            .into_iter()
            .filter(|published| &published.instance_id == instance_id)
            .map(|published| published.command)
            .collect()
    }

    /// Type tags of the commands published for one instance.
    pub fn command_types_for(&self, instance_id: &SagaId) -> Vec<&'static str> {
        self.published_for(instance_id)
            .iter()
            .map(|command| command.message_type())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl<C: Message + 'static> CommandPublisher<C> for InMemoryCommandPublisher<C> {
    async fn publish(&self, instance_id: &SagaId, commands: &[C]) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError("publisher unavailable".to_string()));
        }
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        published.extend(commands.iter().cloned().map(|command| PublishedCommand {
            instance_id: instance_id.clone(),
            command,
        }));
        Ok(())
    }
}

/// Publisher that writes each command to the log as structured JSON.
///
/// Used when no broker is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCommandPublisher;

#[async_trait]
impl<C: Message + 'static> CommandPublisher<C> for TracingCommandPublisher {
    async fn publish(&self, instance_id: &SagaId, commands: &[C]) -> Result<(), PublishError> {
        for command in commands {
            let payload =
                serde_json::to_string(command).map_err(|e| PublishError(e.to_string()))?;
            tracing::info!(
                %instance_id,
                command_type = command.message_type(),
                %payload,
                "command published"
            );
        }
        Ok(())
    }
}
