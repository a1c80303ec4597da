//! Core message trait.

use serde::{Serialize, de::DeserializeOwned};

/// Trait for messages crossing the orchestrator boundary.
///
/// Messages are immutable facts (events) or requests (commands). Each variant
/// of a message family carries a stable type tag used for dispatch, logging
/// and persistence.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + Clone + std::fmt::Debug {
    /// Returns the type tag of this message.
    fn message_type(&self) -> &'static str;

    /// Returns every type tag this message family can produce.
    ///
    /// Used to validate routing tables once at startup.
    fn message_types() -> &'static [&'static str];
}
