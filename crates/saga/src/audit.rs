//! Append-only audit trail embedded in saga state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    /// A forward handler handled a message.
    Step,

    /// A forward handler failed; its mutations were discarded.
    StepFailed,

    /// Compensation started after a rejection.
    CompensationStarted,

    /// A completed step was compensated.
    Compensated,

    /// A completed step registered no compensation.
    NoCompensationRequired,

    /// Compensating a step failed; needs manual reconciliation.
    CompensationFailed,

    /// Compensation finished and the saga became terminal.
    RolledBack,

    /// Dropped: the saga was already terminal, or a start was redelivered.
    Duplicate,

    /// Dropped: the saga is not in a phase that accepts the message.
    Stale,

    /// Dropped: no step is registered for the message type.
    Unroutable,
}

impl AuditKind {
    /// Returns true for entries recording a dropped message.
    pub fn is_dropped(&self) -> bool {
        matches!(
            self,
            AuditKind::Duplicate | AuditKind::Stale | AuditKind::Unroutable
        )
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    /// Type tag of the message that produced the entry.
    pub message_type: Option<String>,
    pub message: String,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        kind: AuditKind,
        message_type: Option<&str>,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            kind,
            message_type: message_type.map(str::to_string),
            message: message.into(),
            detail,
        }
    }
}

/// Ordered log of everything that happened to a saga instance.
///
/// Entries can only be appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail(Vec<AuditEntry>);

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: AuditEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.0.last()
    }

    /// Counts entries of a given kind.
    pub fn count(&self, kind: AuditKind) -> usize {
        self.0.iter().filter(|entry| entry.kind == kind).count()
    }
}
