use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SagaId;

/// Version number of a saga instance, used for optimistic concurrency control.
///
/// A record that does not exist yet is at version 0; every committed
/// transition increments the version by exactly 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an instance that was never saved.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) of the first saved transition.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// The durable form of one saga instance.
///
/// `status` and `terminal` are denormalized from `state` so that stores can
/// filter instances without deserializing the full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    /// The saga instance this record belongs to.
    pub instance_id: SagaId,

    /// The saga type (e.g., "IdentityRegistration").
    pub saga_type: String,

    /// The version of the instance after the transition that produced this record.
    pub version: Version,

    /// Coarse outcome of the instance (e.g., "Processing", "Completed").
    pub status: String,

    /// True once the instance reached a terminal status.
    pub terminal: bool,

    /// The full serialized saga state.
    pub state: serde_json::Value,

    /// Outbound effects produced by the transitions up to `version` that have
    /// not been acknowledged as delivered. Written in the same save as the
    /// state; cleared by [`crate::SagaStore::clear_outbox`].
    #[serde(default)]
    pub outbox: Option<serde_json::Value>,

    /// When the instance was first persisted.
    pub created_at: DateTime<Utc>,

    /// When the instance was last persisted.
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    /// Creates a record from a serializable state.
    pub fn from_state<T: Serialize>(
        instance_id: SagaId,
        saga_type: impl Into<String>,
        version: Version,
        status: impl Into<String>,
        terminal: bool,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            instance_id,
            saga_type: saga_type.into(),
            version,
            status: status.into(),
            terminal,
            state: serde_json::to_value(state)?,
            outbox: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Attaches undelivered outbound effects to the record.
    pub fn with_outbox<T: Serialize>(mut self, outbox: Option<&T>) -> Result<Self, serde_json::Error> {
        self.outbox = outbox.map(serde_json::to_value).transpose()?;
        Ok(self)
    }

    /// Returns true if the record carries undelivered outbound effects.
    pub fn has_pending_outbox(&self) -> bool {
        self.outbox.is_some()
    }

    /// Deserializes the stored state.
    pub fn to_state<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }
}
