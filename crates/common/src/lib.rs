//! Identifier types shared across the saga orchestration crates.

pub mod types;

pub use types::{IdentityId, SagaId};
