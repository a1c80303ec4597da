//! Per-invocation context handed to forward handlers.

use chrono::{DateTime, Utc};

use crate::instance::Deadline;
use crate::status::RejectionKind;

/// The outcome a handler asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Complete,
    Reject { kind: RejectionKind, reason: String },
}

/// Lets a forward handler flag rejection or completion and request timeouts.
///
/// Everything recorded here is applied by the engine only if the handler
/// returns `Ok`.
#[derive(Debug)]
pub struct StepContext<M> {
    now: DateTime<Utc>,
    message_type: &'static str,
    decision: Option<Decision>,
    timeouts: Vec<Deadline<M>>,
}

impl<M> StepContext<M> {
    pub(crate) fn new(now: DateTime<Utc>, message_type: &'static str) -> Self {
        Self {
            now,
            message_type,
            decision: None,
            timeouts: Vec::new(),
        }
    }

    /// Time at which the engine started handling the message.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Type tag of the message being handled.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Flags the saga for compensation. The last call wins.
    pub fn reject(&mut self, kind: RejectionKind, reason: impl Into<String>) {
        self.decision = Some(Decision::Reject {
            kind,
            reason: reason.into(),
        });
    }

    /// Flags the saga as successfully completed.
    pub fn complete(&mut self) {
        self.decision = Some(Decision::Complete);
    }

    /// Requests delivery of `message` to this instance at or after `due_at`.
    pub fn schedule_timeout(&mut self, due_at: DateTime<Utc>, message: M)
    where
        M: contracts::Message,
    {
        self.timeouts.push(Deadline::new(due_at, message));
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.decision, Some(Decision::Reject { .. }))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.decision, Some(Decision::Complete))
    }

    pub(crate) fn into_parts(self) -> (Option<Decision>, Vec<Deadline<M>>) {
        (self.decision, self.timeouts)
    }
}
