//! Traits describing one saga type.

use std::fmt::Debug;

use contracts::Message;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::RegistryError;
use crate::registry::StepRegistry;

/// The logical phase (`CurrentStep`) of a saga type.
///
/// Besides the happy-path phases each saga type names the phases used by the
/// engine itself while rolling back and once terminal.
pub trait SagaPhase:
    Copy + Eq + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Phase of a freshly started instance.
    fn initial() -> Self;

    /// Phase after the final step completed.
    fn completed() -> Self;

    /// Phase while compensations run.
    fn compensating() -> Self;

    /// Phase after a rejection or failure was rolled back.
    fn failed() -> Self;

    /// Phase after a cancellation was rolled back.
    fn cancelled() -> Self;

    fn as_str(&self) -> &'static str;
}

/// A saga type: its state, phases, message families and step table.
pub trait SagaDefinition: Send + Sync + Sized + 'static {
    /// Domain fields accumulated by the steps.
    type Data: Default + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    type Phase: SagaPhase;

    /// Inbound messages that start or advance the saga.
    type Message: Message + 'static;

    /// Outbound commands published by the steps.
    type Command: Message + 'static;

    /// Stable name stored with every instance.
    const SAGA_TYPE: &'static str;

    /// Builds and validates the step table.
    fn registry() -> Result<StepRegistry<Self>, RegistryError>;
}
