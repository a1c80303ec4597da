use chrono::{DateTime, Utc};

/// Builder for constructing saga instance queries.
///
/// Allows filtering instances by saga type, status, terminal flag and
/// last-update time range.
#[derive(Debug, Clone, Default)]
pub struct SagaQuery {
    /// Filter by saga type.
    pub saga_type: Option<String>,

    /// Filter by status (any of these).
    pub statuses: Option<Vec<String>>,

    /// Filter by terminal flag.
    pub terminal: Option<bool>,

    /// Filter by whether undelivered outbound effects are pending.
    pub pending_outbox: Option<bool>,

    /// Filter by instances updated at or after this timestamp.
    pub updated_from: Option<DateTime<Utc>>,

    /// Filter by instances updated at or before this timestamp.
    pub updated_to: Option<DateTime<Utc>>,

    /// Maximum number of instances to return.
    pub limit: Option<usize>,

    /// Number of instances to skip.
    pub offset: Option<usize>,
}

impl SagaQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for instances of a specific saga type.
    pub fn for_saga_type(saga_type: impl Into<String>) -> Self {
        Self {
            saga_type: Some(saga_type.into()),
            ..Default::default()
        }
    }

    /// Filters by saga type.
    pub fn saga_type(mut self, saga_type: impl Into<String>) -> Self {
        self.saga_type = Some(saga_type.into());
        self
    }

    /// Filters by a single status.
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.statuses = Some(vec![status.into()]);
        self
    }

    /// Filters by multiple statuses (any of these).
    pub fn statuses(mut self, statuses: Vec<String>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Keeps only terminal (`true`) or only in-flight (`false`) instances.
    pub fn terminal(mut self, terminal: bool) -> Self {
        self.terminal = Some(terminal);
        self
    }

    /// Keeps only instances with (`true`) or without (`false`) a pending outbox.
    pub fn pending_outbox(mut self, pending: bool) -> Self {
        self.pending_outbox = Some(pending);
        self
    }

    /// Filters to instances updated at or after this timestamp.
    pub fn updated_from(mut self, timestamp: DateTime<Utc>) -> Self {
        self.updated_from = Some(timestamp);
        self
    }

    /// Filters to instances updated at or before this timestamp.
    pub fn updated_to(mut self, timestamp: DateTime<Utc>) -> Self {
        self.updated_to = Some(timestamp);
        self
    }

    /// Limits the number of instances returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many instances before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_for_saga_type() {
        let query = SagaQuery::for_saga_type("IdentityRegistration");

        assert_eq!(query.saga_type.as_deref(), Some("IdentityRegistration"));
        assert!(query.statuses.is_none());
        assert!(query.terminal.is_none());
        assert!(query.pending_outbox.is_none());
    }

    #[test]
    fn query_builder_chain() {
        let query = SagaQuery::new()
            .saga_type("IdentityRegistration")
            .status("Processing")
            .terminal(false)
            .pending_outbox(true)
            .limit(50)
            .offset(10);

        assert_eq!(query.statuses, Some(vec!["Processing".to_string()]));
        assert_eq!(query.terminal, Some(false));
        assert_eq!(query.pending_outbox, Some(true));
        assert_eq!(query.limit, Some(50));
        assert_eq!(query.offset, Some(10));
    }
}
