//! Identity registration contracts.
//!
//! Inbound: the start command plus the events emitted by the identity,
//! biometric, clan registrar, DID, access control and credential services.
//! Outbound: the commands the orchestrator publishes to those services, the
//! undo commands used for compensation, and the completion notification.

mod commands;
mod events;
mod value_objects;

pub use commands::*;
pub use events::*;
pub use value_objects::AccessPermission;
