//! Event and command contracts for the saga orchestrator.
//!
//! This crate is pure data:
//! - [`Message`] gives every contract a stable type tag
//! - [`registration`] holds the identity registration inbound messages and
//!   outbound commands

pub mod message;
pub mod registration;

pub use message::Message;
pub use registration::{RegistrationCommand, RegistrationMessage};
