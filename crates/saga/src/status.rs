//! Coarse saga outcome.

use serde::{Deserialize, Serialize};

/// The coarse outcome of a saga instance.
///
/// Status transitions:
/// ```text
/// Processing ──┬──► Completed
///              ├──► Rejected   (business rejection, after compensation)
///              ├──► Cancelled  (registrant cancelled, after compensation)
///              └──► Failed     (timeout, retries exhausted or step error, after compensation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Steps are still being driven by incoming messages.
    #[default]
    Processing,

    /// All steps completed successfully (terminal).
    Completed,

    /// A business rule rejected the saga (terminal).
    Rejected,

    /// The saga was cancelled on request (terminal).
    Cancelled,

    /// The saga failed and was rolled back (terminal).
    Failed,
}

impl SagaStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SagaStatus::Processing)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Processing => "Processing",
            SagaStatus::Completed => "Completed",
            SagaStatus::Rejected => "Rejected",
            SagaStatus::Cancelled => "Cancelled",
            SagaStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" => Ok(SagaStatus::Processing),
            "Completed" => Ok(SagaStatus::Completed),
            "Rejected" => Ok(SagaStatus::Rejected),
            "Cancelled" => Ok(SagaStatus::Cancelled),
            "Failed" => Ok(SagaStatus::Failed),
            other => Err(format!("unknown saga status '{other}'")),
        }
    }
}

/// Why a handler rejected the saga; decides the terminal status reached
/// once compensation has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionKind {
    Rejected,
    Cancelled,
    Failed,
}

impl RejectionKind {
    /// Terminal status reached after compensation.
    pub fn status(&self) -> SagaStatus {
        match self {
            RejectionKind::Rejected => SagaStatus::Rejected,
            RejectionKind::Cancelled => SagaStatus::Cancelled,
            RejectionKind::Failed => SagaStatus::Failed,
        }
    }
}
