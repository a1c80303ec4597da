//! Saga error types.

use common::SagaId;
use saga_store::SagaStoreError;
use thiserror::Error;

/// Engine-level errors.
///
/// Business outcomes (rejections, timeouts, cancellations, dropped messages,
/// failed compensations) are not errors; they are reported through
/// [`crate::EngineResult`] and the audit trail.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(#[from] SagaStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The step registry is misconfigured.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// No instance id could be derived from the message.
    #[error("Message '{message_type}' carries no correlation id")]
    Uncorrelated { message_type: &'static str },

    /// Optimistic concurrency retries were exhausted.
    #[error("Saga {instance_id} still conflicting after {attempts} attempts")]
    ConcurrencyExhausted { instance_id: SagaId, attempts: u32 },

    /// The stored instance belongs to another saga type.
    #[error("Saga {instance_id} is a '{actual}' saga, expected '{expected}'")]
    SagaTypeMismatch {
        instance_id: SagaId,
        expected: String,
        actual: String,
    },

    /// Outbound commands could not be published after the state committed.
    #[error("Failed to publish commands for saga {instance_id}: {reason}")]
    Publish { instance_id: SagaId, reason: String },

    /// A deadline could not be handed to the timeout scheduler.
    #[error("Failed to schedule timeout for saga {instance_id}: {reason}")]
    Schedule { instance_id: SagaId, reason: String },

    /// The instance id is malformed.
    #[error("Invalid saga instance id: {0}")]
    InvalidInstanceId(String),

    /// The dispatcher no longer accepts messages.
    #[error("Saga dispatcher is closed")]
    DispatcherClosed,
}

impl SagaError {
    /// Returns true if this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SagaError::Store(e) if e.is_conflict())
    }

    /// Returns true if handling the same message again may succeed.
    ///
    /// Store outages, exhausted conflict retries and transport failures are
    /// transient; malformed input and misconfiguration are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Store(e) => e.is_transient(),
            SagaError::ConcurrencyExhausted { .. }
            | SagaError::Publish { .. }
            | SagaError::Schedule { .. } => true,
            _ => false,
        }
    }
}

/// Configuration errors detected while building a step registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Saga '{saga_type}' has no start step")]
    MissingStart { saga_type: &'static str },

    #[error("Saga '{saga_type}' has two start steps: '{first}' and '{second}'")]
    DuplicateStart {
        saga_type: &'static str,
        first: &'static str,
        second: &'static str,
    },

    #[error("Saga '{saga_type}' registers message '{message_type}' twice")]
    DuplicateStep {
        saga_type: &'static str,
        message_type: &'static str,
    },

    #[error("Saga '{saga_type}' registers unknown message type '{message_type}'")]
    UnknownMessageType {
        saga_type: &'static str,
        message_type: &'static str,
    },

    #[error("Saga '{saga_type}' has no correlation rule for '{message_type}'")]
    MissingCorrelation {
        saga_type: &'static str,
        message_type: &'static str,
    },

    #[error("Saga '{saga_type}' has two correlation rules for '{message_type}'")]
    DuplicateCorrelation {
        saga_type: &'static str,
        message_type: &'static str,
    },
}

/// A business failure reported by a step handler.
///
/// Returning it from a forward handler discards the handler's mutations and
/// compensates the saga to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct StepError {
    pub reason: String,
}

impl StepError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// A handler was invoked with a message it does not handle.
    pub fn unexpected_message(expected: &str, actual: &str) -> Self {
        Self::new(format!("expected '{expected}' message, got '{actual}'"))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
