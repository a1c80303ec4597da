//! Saga orchestration engine.
//!
//! A saga type is described by a [`SagaDefinition`]: its data, its phases
//! and a [`StepRegistry`] mapping message types to forward and compensation
//! handlers. The [`SagaEngine`] correlates incoming messages to instances,
//! runs the matching step and persists the result with one compare-and-swap
//! write. When a step rejects or fails, the completed steps are compensated
//! in reverse order within that same write. The commands and timeouts a
//! transition produces are committed with it as an [`Outbox`] and delivered
//! afterwards, so a failed publish is retried instead of lost.
//!
//! The identity registration saga drives a registration through these steps:
//! 1. Create the identity
//! 2. Capture biometrics
//! 3. Obtain clan approval (with a 48 hour timeout)
//! 4. Create the DID
//! 5. Grant zone access
//! 6. Issue the identity credential
//!
//! A [`SagaDispatcher`] serializes messages per instance while spreading
//! instances over a fixed pool of workers.

pub mod audit;
mod compensation;
pub mod context;
pub mod correlator;
pub mod definition;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod identity_registration;
pub mod instance;
pub mod outbox;
pub mod publisher;
pub mod registry;
pub mod status;
pub mod timeout;

pub use audit::{AuditEntry, AuditKind, AuditTrail};
pub use context::StepContext;
pub use correlator::{CorrelationFn, SagaCorrelator};
pub use definition::{SagaDefinition, SagaPhase};
pub use dispatcher::{ResultReceiver, SagaDispatcher};
pub use engine::{Disposition, EngineConfig, EngineResult, SagaEngine, SagaHandler};
pub use error::{RegistryError, Result, SagaError, StepError};
pub use identity_registration::{
    ClanApprovalStatus, IdentityRegistrationSaga, RegistrationData, RegistrationState,
    RegistrationStep,
};
pub use instance::{CompletedStep, Deadline, InstanceState, ReconciliationItem, SagaState};
pub use outbox::Outbox;
pub use publisher::{
    CommandPublisher, InMemoryCommandPublisher, PublishError, PublishedCommand,
    TracingCommandPublisher,
};
pub use registry::{StepDefinition, StepRegistry, StepRegistryBuilder};
pub use status::{RejectionKind, SagaStatus};
pub use timeout::{InMemoryTimeoutScheduler, ScheduleError, TimeoutScheduler, TokioTimeoutScheduler};
