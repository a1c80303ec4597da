//! Inbound identity registration messages.

use chrono::{DateTime, NaiveDate, Utc};
use common::IdentityId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;

/// Type tags of the inbound registration messages.
pub mod message_types {
    pub const START_IDENTITY_REGISTRATION: &str = "StartIdentityRegistration";
    pub const IDENTITY_CREATED: &str = "IdentityCreated";
    pub const BIOMETRICS_CAPTURED: &str = "BiometricsCaptured";
    pub const BIOMETRIC_CAPTURE_FAILED: &str = "BiometricCaptureFailed";
    pub const CLAN_APPROVAL_GRANTED: &str = "ClanApprovalGranted";
    pub const CLAN_APPROVAL_DENIED: &str = "ClanApprovalDenied";
    pub const CLAN_APPROVAL_TIMED_OUT: &str = "ClanApprovalTimedOut";
    pub const DID_CREATED: &str = "DIDCreated";
    pub const ZONE_ACCESS_GRANTED: &str = "ZoneAccessGranted";
    pub const CREDENTIAL_ISSUED: &str = "CredentialIssued";
    pub const REGISTRATION_CANCELLED: &str = "RegistrationCancelled";

    pub const ALL: &[&str] = &[
        START_IDENTITY_REGISTRATION,
        IDENTITY_CREATED,
        BIOMETRICS_CAPTURED,
        BIOMETRIC_CAPTURE_FAILED,
        CLAN_APPROVAL_GRANTED,
        CLAN_APPROVAL_DENIED,
        CLAN_APPROVAL_TIMED_OUT,
        DID_CREATED,
        ZONE_ACCESS_GRANTED,
        CREDENTIAL_ISSUED,
        REGISTRATION_CANCELLED,
    ];
}

/// Messages that start or advance an identity registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RegistrationMessage {
    /// Request to register a new identity.
    StartIdentityRegistration(StartIdentityRegistrationData),

    /// The identity service created the identity record.
    IdentityCreated(IdentityCreatedData),

    /// Biometrics were captured and verified.
    BiometricsCaptured(BiometricsCapturedData),

    /// A biometric capture attempt failed.
    BiometricCaptureFailed(BiometricCaptureFailedData),

    /// The clan registrar approved the registration.
    ClanApprovalGranted(ClanApprovalGrantedData),

    /// The clan registrar denied the registration.
    ClanApprovalDenied(ClanApprovalDeniedData),

    /// No clan decision arrived before the approval deadline.
    ClanApprovalTimedOut(ClanApprovalTimedOutData),

    /// The DID service issued a decentralized identifier.
    #[serde(rename = "DIDCreated")]
    DidCreated(DidCreatedData),

    /// Access control granted the identity access to its zone.
    ZoneAccessGranted(ZoneAccessGrantedData),

    /// The credential service issued the identity credential.
    CredentialIssued(CredentialIssuedData),

    /// The registrant cancelled the registration.
    RegistrationCancelled(RegistrationCancelledData),
}

impl Message for RegistrationMessage {
    fn message_type(&self) -> &'static str {
        match self {
            RegistrationMessage::StartIdentityRegistration(_) => {
                message_types::START_IDENTITY_REGISTRATION
            }
            RegistrationMessage::IdentityCreated(_) => message_types::IDENTITY_CREATED,
            RegistrationMessage::BiometricsCaptured(_) => message_types::BIOMETRICS_CAPTURED,
            RegistrationMessage::BiometricCaptureFailed(_) => {
                message_types::BIOMETRIC_CAPTURE_FAILED
            }
            RegistrationMessage::ClanApprovalGranted(_) => message_types::CLAN_APPROVAL_GRANTED,
            RegistrationMessage::ClanApprovalDenied(_) => message_types::CLAN_APPROVAL_DENIED,
            RegistrationMessage::ClanApprovalTimedOut(_) => message_types::CLAN_APPROVAL_TIMED_OUT,
            RegistrationMessage::DidCreated(_) => message_types::DID_CREATED,
            RegistrationMessage::ZoneAccessGranted(_) => message_types::ZONE_ACCESS_GRANTED,
            RegistrationMessage::CredentialIssued(_) => message_types::CREDENTIAL_ISSUED,
            RegistrationMessage::RegistrationCancelled(_) => message_types::REGISTRATION_CANCELLED,
        }
    }

    fn message_types() -> &'static [&'static str] {
        message_types::ALL
    }
}

impl RegistrationMessage {
    /// Returns the identity this message belongs to.
    ///
    /// Only the start command may omit it.
    pub fn identity_id(&self) -> Option<IdentityId> {
        match self {
            RegistrationMessage::StartIdentityRegistration(data) => data.identity_id,
            RegistrationMessage::IdentityCreated(data) => Some(data.identity_id),
            RegistrationMessage::BiometricsCaptured(data) => Some(data.identity_id),
            RegistrationMessage::BiometricCaptureFailed(data) => Some(data.identity_id),
            RegistrationMessage::ClanApprovalGranted(data) => Some(data.identity_id),
            RegistrationMessage::ClanApprovalDenied(data) => Some(data.identity_id),
            RegistrationMessage::ClanApprovalTimedOut(data) => Some(data.identity_id),
            RegistrationMessage::DidCreated(data) => Some(data.identity_id),
            RegistrationMessage::ZoneAccessGranted(data) => Some(data.identity_id),
            RegistrationMessage::CredentialIssued(data) => Some(data.identity_id),
            RegistrationMessage::RegistrationCancelled(data) => Some(data.identity_id),
        }
    }
}

/// Data for the StartIdentityRegistration command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartIdentityRegistrationData {
    /// Caller-assigned identity id, doubling as an idempotency key.
    #[serde(default)]
    pub identity_id: Option<IdentityId>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    /// Zone to grant access to; "general" when absent.
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub clan: Option<String>,
}

impl StartIdentityRegistrationData {
    /// Creates a start command without an identity id, zone or clan.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            identity_id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            date_of_birth: None,
            zone: None,
            clan: None,
        }
    }

    /// Sets the caller-assigned identity id.
    pub fn with_identity_id(mut self, identity_id: IdentityId) -> Self {
        self.identity_id = Some(identity_id);
        self
    }

    /// Sets the zone.
    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Sets the clan.
    pub fn of_clan(mut self, clan: impl Into<String>) -> Self {
        self.clan = Some(clan.into());
        self
    }

    /// Sets the date of birth.
    pub fn born_on(mut self, date_of_birth: NaiveDate) -> Self {
        self.date_of_birth = Some(date_of_birth);
        self
    }
}

/// Data for IdentityCreated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCreatedData {
    pub identity_id: IdentityId,
    /// Full name as recorded by the identity service.
    #[serde(default)]
    pub name: Option<String>,
}

/// Data for BiometricsCaptured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricsCapturedData {
    pub identity_id: IdentityId,
    pub biometric_template_id: Uuid,
    pub has_fingerprint: bool,
    pub has_face_recognition: bool,
    /// Capture quality in the range 0.0..=1.0.
    pub quality_score: f64,
    pub captured_at: DateTime<Utc>,
}

/// Data for BiometricCaptureFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricCaptureFailedData {
    pub identity_id: IdentityId,
    pub reason: String,
}

/// Data for ClanApprovalGranted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanApprovalGrantedData {
    pub identity_id: IdentityId,
    pub approval_id: Uuid,
    pub registrar_id: Uuid,
    #[serde(default)]
    pub notes: Option<String>,
    pub approved_at: DateTime<Utc>,
}

/// Data for ClanApprovalDenied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanApprovalDeniedData {
    pub identity_id: IdentityId,
    pub approval_id: Uuid,
    pub registrar_id: Uuid,
    pub reason: String,
    pub denied_at: DateTime<Utc>,
}

/// Data for ClanApprovalTimedOut event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanApprovalTimedOutData {
    pub identity_id: IdentityId,
    pub approval_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub timed_out_at: DateTime<Utc>,
}

/// Data for DIDCreated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidCreatedData {
    pub identity_id: IdentityId,
    pub did_id: Uuid,
    /// The DID string, e.g. "did:fwid:...".
    pub did: String,
}

/// Data for ZoneAccessGranted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAccessGrantedData {
    pub identity_id: IdentityId,
    pub access_control_id: Uuid,
    pub zone_id: Uuid,
}

/// Data for CredentialIssued event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialIssuedData {
    pub identity_id: IdentityId,
    pub credential_id: Uuid,
}

/// Data for RegistrationCancelled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationCancelledData {
    pub identity_id: IdentityId,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

// Convenience constructors
impl RegistrationMessage {
    /// Creates a StartIdentityRegistration command.
    pub fn start(data: StartIdentityRegistrationData) -> Self {
        RegistrationMessage::StartIdentityRegistration(data)
    }

    /// Creates an IdentityCreated event.
    pub fn identity_created(identity_id: IdentityId, name: Option<String>) -> Self {
        RegistrationMessage::IdentityCreated(IdentityCreatedData { identity_id, name })
    }

    /// Creates a BiometricsCaptured event with fingerprint and face data.
    pub fn biometrics_captured(
        identity_id: IdentityId,
        biometric_template_id: Uuid,
        quality_score: f64,
    ) -> Self {
        RegistrationMessage::BiometricsCaptured(BiometricsCapturedData {
            identity_id,
            biometric_template_id,
            has_fingerprint: true,
            has_face_recognition: true,
            quality_score,
            captured_at: Utc::now(),
        })
    }

    /// Creates a BiometricCaptureFailed event.
    pub fn biometric_capture_failed(identity_id: IdentityId, reason: impl Into<String>) -> Self {
        RegistrationMessage::BiometricCaptureFailed(BiometricCaptureFailedData {
            identity_id,
            reason: reason.into(),
        })
    }

    /// Creates a ClanApprovalGranted event.
    pub fn clan_approval_granted(
        identity_id: IdentityId,
        approval_id: Uuid,
        registrar_id: Uuid,
        notes: Option<String>,
    ) -> Self {
        RegistrationMessage::ClanApprovalGranted(ClanApprovalGrantedData {
            identity_id,
            approval_id,
            registrar_id,
            notes,
            approved_at: Utc::now(),
        })
    }

    /// Creates a ClanApprovalDenied event.
    pub fn clan_approval_denied(
        identity_id: IdentityId,
        approval_id: Uuid,
        registrar_id: Uuid,
        reason: impl Into<String>,
    ) -> Self {
        RegistrationMessage::ClanApprovalDenied(ClanApprovalDeniedData {
            identity_id,
            approval_id,
            registrar_id,
            reason: reason.into(),
            denied_at: Utc::now(),
        })
    }

    /// Creates a ClanApprovalTimedOut event.
    pub fn clan_approval_timed_out(
        identity_id: IdentityId,
        approval_id: Uuid,
        submitted_at: DateTime<Utc>,
        timed_out_at: DateTime<Utc>,
    ) -> Self {
        RegistrationMessage::ClanApprovalTimedOut(ClanApprovalTimedOutData {
            identity_id,
            approval_id,
            submitted_at,
            timed_out_at,
        })
    }

    /// Creates a DIDCreated event.
    pub fn did_created(identity_id: IdentityId, did_id: Uuid, did: impl Into<String>) -> Self {
        RegistrationMessage::DidCreated(DidCreatedData {
            identity_id,
            did_id,
            did: did.into(),
        })
    }

    /// Creates a ZoneAccessGranted event.
    pub fn zone_access_granted(
        identity_id: IdentityId,
        access_control_id: Uuid,
        zone_id: Uuid,
    ) -> Self {
        RegistrationMessage::ZoneAccessGranted(ZoneAccessGrantedData {
            identity_id,
            access_control_id,
            zone_id,
        })
    }

    /// Creates a CredentialIssued event.
    pub fn credential_issued(identity_id: IdentityId, credential_id: Uuid) -> Self {
        RegistrationMessage::CredentialIssued(CredentialIssuedData {
            identity_id,
            credential_id,
        })
    }

    /// Creates a RegistrationCancelled event.
    pub fn registration_cancelled(identity_id: IdentityId, reason: impl Into<String>) -> Self {
        RegistrationMessage::RegistrationCancelled(RegistrationCancelledData {
            identity_id,
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }
}
