//! Maps inbound messages to saga instance ids.

use std::collections::HashMap;

use common::SagaId;
use contracts::Message;

use crate::error::SagaError;

/// Extracts a correlation id from a message, if it carries one.
pub type CorrelationFn<M> = fn(&M) -> Option<SagaId>;

/// How the instance id of one message type is derived.
pub enum CorrelationRule<M> {
    /// Start message: uses the caller-supplied id, or synthesizes a new one.
    Start(CorrelationFn<M>),
    /// Any other message: the id must be present on the message.
    Field(CorrelationFn<M>),
}

/// Resolves the saga instance a message belongs to.
///
/// Built once with the step registry and read-only afterwards.
pub struct SagaCorrelator<M> {
    rules: HashMap<&'static str, CorrelationRule<M>>,
}

impl<M: Message> SagaCorrelator<M> {
    pub(crate) fn new(rules: HashMap<&'static str, CorrelationRule<M>>) -> Self {
        Self { rules }
    }

    /// Resolves the instance id for a message.
    pub fn resolve(&self, message: &M) -> Result<SagaId, SagaError> {
        let message_type = message.message_type();
        match self.rules.get(message_type) {
            Some(CorrelationRule::Start(extract)) => Ok(extract(message).unwrap_or_default()),
            Some(CorrelationRule::Field(extract)) => {
                extract(message).ok_or(SagaError::Uncorrelated { message_type })
            }
            None => Err(SagaError::Uncorrelated { message_type }),
        }
    }
}

impl<M> std::fmt::Debug for SagaCorrelator<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.rules.keys().collect();
        types.sort();
        f.debug_struct("SagaCorrelator")
            .field("message_types", &types)
            .finish()
    }
}
