use chrono::{DateTime, NaiveDate, Utc};
use common::IdentityId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::SagaPhase;

/// Phases of an identity registration.
///
/// ```text
/// Started ─► BiometricCapture ─► ClanApprovalPending ─► DIDIssuance
///         ─► ZoneAccessGrant ─► CredentialGeneration ─► Completed
///
/// any non-terminal phase ─► CompensationInProgress ─► Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RegistrationStep {
    #[default]
    Started,
    BiometricCapture,
    ClanApprovalPending,
    #[serde(rename = "DIDIssuance")]
    DidIssuance,
    ZoneAccessGrant,
    CredentialGeneration,
    Completed,
    CompensationInProgress,
    Failed,
    Cancelled,
}

impl RegistrationStep {
    /// Phases in which the saga is still waiting for collaborators.
    pub const IN_PROGRESS: [RegistrationStep; 6] = [
        RegistrationStep::Started,
        RegistrationStep::BiometricCapture,
        RegistrationStep::ClanApprovalPending,
        RegistrationStep::DidIssuance,
        RegistrationStep::ZoneAccessGrant,
        RegistrationStep::CredentialGeneration,
    ];
}

impl SagaPhase for RegistrationStep {
    fn initial() -> Self {
        RegistrationStep::Started
    }

    fn completed() -> Self {
        RegistrationStep::Completed
    }

    fn compensating() -> Self {
        RegistrationStep::CompensationInProgress
    }

    fn failed() -> Self {
        RegistrationStep::Failed
    }

    fn cancelled() -> Self {
        RegistrationStep::Cancelled
    }

    fn as_str(&self) -> &'static str {
        match self {
            RegistrationStep::Started => "Started",
            RegistrationStep::BiometricCapture => "BiometricCapture",
            RegistrationStep::ClanApprovalPending => "ClanApprovalPending",
            RegistrationStep::DidIssuance => "DIDIssuance",
            RegistrationStep::ZoneAccessGrant => "ZoneAccessGrant",
            RegistrationStep::CredentialGeneration => "CredentialGeneration",
            RegistrationStep::Completed => "Completed",
            RegistrationStep::CompensationInProgress => "CompensationInProgress",
            RegistrationStep::Failed => "Failed",
            RegistrationStep::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decision state of the clan approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ClanApprovalStatus {
    #[default]
    NotRequested,
    Pending,
    Approved,
    Denied,
    TimedOut,
    /// Approval was granted and later revoked by compensation.
    Revoked,
}

/// Domain fields accumulated over an identity registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationData {
    pub identity_id: Option<IdentityId>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: Option<NaiveDate>,
    pub zone: String,
    pub clan: Option<String>,
    pub identity_created_at: Option<DateTime<Utc>>,

    // Biometrics
    pub biometric_template_id: Option<Uuid>,
    pub has_fingerprint: bool,
    pub has_face_recognition: bool,
    pub biometric_quality_score: Option<f64>,
    pub biometrics_captured_at: Option<DateTime<Utc>>,
    pub last_biometric_failure: Option<String>,

    // Clan approval
    pub clan_approval_id: Option<Uuid>,
    pub clan_approval_status: ClanApprovalStatus,
    pub clan_approval_submitted_at: Option<DateTime<Utc>>,
    pub clan_approval_timeout_at: Option<DateTime<Utc>>,
    pub clan_registrar_id: Option<Uuid>,
    pub clan_approval_notes: Option<String>,
    pub clan_decided_at: Option<DateTime<Utc>>,

    // DID
    pub did_id: Option<Uuid>,
    pub did: Option<String>,
    pub did_created_at: Option<DateTime<Utc>>,

    // Zone access
    pub access_control_id: Option<Uuid>,
    pub zone_access_granted_at: Option<DateTime<Utc>>,

    // Credential
    pub credential_id: Option<Uuid>,
    pub credential_issued_at: Option<DateTime<Utc>>,
}

impl RegistrationData {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_phases_exclude_terminal_ones() {
        assert!(!RegistrationStep::IN_PROGRESS.contains(&RegistrationStep::Completed));
        assert!(!RegistrationStep::IN_PROGRESS.contains(&RegistrationStep::CompensationInProgress));
        assert!(RegistrationStep::IN_PROGRESS.contains(&RegistrationStep::Started));
    }

    #[test]
    fn phase_serializes_by_name() {
        let json = serde_json::to_string(&RegistrationStep::DidIssuance).unwrap();
        assert_eq!(json, "\"DIDIssuance\"");
        assert_eq!(RegistrationStep::DidIssuance.to_string(), "DIDIssuance");
    }

    #[test]
    fn full_name_tolerates_missing_parts() {
        let data = RegistrationData {
            first_name: "Ada".to_string(),
            ..Default::default()
        };
        assert_eq!(data.full_name(), "Ada");
    }
}
