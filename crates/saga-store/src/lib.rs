//! Persistence for saga instances.
//!
//! Each saga instance is stored as one record keyed by its [`SagaId`], holding
//! the serialized state and a [`Version`] used for compare-and-swap writes.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use common::SagaId;
pub use error::{Result, SagaStoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use query::SagaQuery;
pub use record::{SagaRecord, Version};
pub use store::{SagaStore, SagaStoreExt, SaveOptions};
