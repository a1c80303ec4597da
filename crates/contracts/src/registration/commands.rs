//! Outbound commands and notifications published by the registration saga.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use common::IdentityId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::AccessPermission;
use crate::message::Message;

/// Credential type issued at the end of a registration.
pub const IDENTITY_CREDENTIAL_TYPE: &str = "IdentityCredential";

/// Type tags of the outbound registration commands.
pub mod command_types {
    pub const CREATE_IDENTITY: &str = "CreateIdentity";
    pub const CLAN_APPROVAL_REQUESTED: &str = "ClanApprovalRequested";
    pub const CREATE_DID: &str = "CreateDID";
    pub const GRANT_ZONE_ACCESS: &str = "GrantZoneAccess";
    pub const ISSUE_CREDENTIAL: &str = "IssueCredential";
    pub const IDENTITY_REGISTRATION_COMPLETED: &str = "IdentityRegistrationCompleted";
    pub const DEACTIVATE_IDENTITY: &str = "DeactivateIdentity";
    pub const DELETE_BIOMETRIC_TEMPLATE: &str = "DeleteBiometricTemplate";
    pub const REVOKE_CLAN_APPROVAL: &str = "RevokeClanApproval";
    pub const DEACTIVATE_DID: &str = "DeactivateDID";
    pub const REVOKE_ZONE_ACCESS: &str = "RevokeZoneAccess";
    pub const REVOKE_CREDENTIAL: &str = "RevokeCredential";

    pub const ALL: &[&str] = &[
        CREATE_IDENTITY,
        CLAN_APPROVAL_REQUESTED,
        CREATE_DID,
        GRANT_ZONE_ACCESS,
        ISSUE_CREDENTIAL,
        IDENTITY_REGISTRATION_COMPLETED,
        DEACTIVATE_IDENTITY,
        DELETE_BIOMETRIC_TEMPLATE,
        REVOKE_CLAN_APPROVAL,
        DEACTIVATE_DID,
        REVOKE_ZONE_ACCESS,
        REVOKE_CREDENTIAL,
    ];
}

/// Commands the registration saga asks other services to carry out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RegistrationCommand {
    CreateIdentity(CreateIdentityData),
    ClanApprovalRequested(ClanApprovalRequestedData),
    #[serde(rename = "CreateDID")]
    CreateDid(CreateDidData),
    GrantZoneAccess(GrantZoneAccessData),
    IssueCredential(IssueCredentialData),
    /// Notification that the registration finished successfully.
    IdentityRegistrationCompleted(IdentityRegistrationCompletedData),

    // Undo commands
    DeactivateIdentity(DeactivateIdentityData),
    DeleteBiometricTemplate(DeleteBiometricTemplateData),
    RevokeClanApproval(RevokeClanApprovalData),
    #[serde(rename = "DeactivateDID")]
    DeactivateDid(DeactivateDidData),
    RevokeZoneAccess(RevokeZoneAccessData),
    RevokeCredential(RevokeCredentialData),
}

impl RegistrationCommand {
    /// Returns the identity the command targets.
    pub fn identity_id(&self) -> IdentityId {
        match self {
            RegistrationCommand::CreateIdentity(d) => d.identity_id,
            RegistrationCommand::ClanApprovalRequested(d) => d.identity_id,
            RegistrationCommand::CreateDid(d) => d.identity_id,
            RegistrationCommand::GrantZoneAccess(d) => d.identity_id,
            RegistrationCommand::IssueCredential(d) => d.identity_id,
            RegistrationCommand::IdentityRegistrationCompleted(d) => d.identity_id,
            RegistrationCommand::DeactivateIdentity(d) => d.identity_id,
            RegistrationCommand::DeleteBiometricTemplate(d) => d.identity_id,
            RegistrationCommand::RevokeClanApproval(d) => d.identity_id,
            RegistrationCommand::DeactivateDid(d) => d.identity_id,
            RegistrationCommand::RevokeZoneAccess(d) => d.identity_id,
            RegistrationCommand::RevokeCredential(d) => d.identity_id,
        }
    }

    /// Returns true for commands that undo an earlier step.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            RegistrationCommand::DeactivateIdentity(_)
                | RegistrationCommand::DeleteBiometricTemplate(_)
                | RegistrationCommand::RevokeClanApproval(_)
                | RegistrationCommand::DeactivateDid(_)
                | RegistrationCommand::RevokeZoneAccess(_)
                | RegistrationCommand::RevokeCredential(_)
        )
    }
}

impl Message for RegistrationCommand {
    fn message_type(&self) -> &'static str {
        match self {
            RegistrationCommand::CreateIdentity(_) => command_types::CREATE_IDENTITY,
            RegistrationCommand::ClanApprovalRequested(_) => command_types::CLAN_APPROVAL_REQUESTED,
            RegistrationCommand::CreateDid(_) => command_types::CREATE_DID,
            RegistrationCommand::GrantZoneAccess(_) => command_types::GRANT_ZONE_ACCESS,
            RegistrationCommand::IssueCredential(_) => command_types::ISSUE_CREDENTIAL,
            RegistrationCommand::IdentityRegistrationCompleted(_) => {
                command_types::IDENTITY_REGISTRATION_COMPLETED
            }
            RegistrationCommand::DeactivateIdentity(_) => command_types::DEACTIVATE_IDENTITY,
            RegistrationCommand::DeleteBiometricTemplate(_) => {
                command_types::DELETE_BIOMETRIC_TEMPLATE
            }
            RegistrationCommand::RevokeClanApproval(_) => command_types::REVOKE_CLAN_APPROVAL,
            RegistrationCommand::DeactivateDid(_) => command_types::DEACTIVATE_DID,
            RegistrationCommand::RevokeZoneAccess(_) => command_types::REVOKE_ZONE_ACCESS,
            RegistrationCommand::RevokeCredential(_) => command_types::REVOKE_CREDENTIAL,
        }
    }

    fn message_types() -> &'static [&'static str] {
        command_types::ALL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIdentityData {
    pub identity_id: IdentityId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: Option<NaiveDate>,
    pub zone: String,
    pub clan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanApprovalRequestedData {
    pub identity_id: IdentityId,
    pub approval_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub zone: String,
    pub clan: Option<String>,
    pub biometric_template_id: Uuid,
    pub requested_at: DateTime<Utc>,
    /// Deadline after which the request times out.
    pub timeout_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDidData {
    pub identity_id: IdentityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantZoneAccessData {
    pub identity_id: IdentityId,
    pub zone: String,
    pub permission: AccessPermission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCredentialData {
    pub request_id: Uuid,
    pub identity_id: IdentityId,
    pub credential_type: String,
    pub claims: BTreeMap<String, String>,
    pub issuer_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRegistrationCompletedData {
    pub identity_id: IdentityId,
    pub did_id: Option<Uuid>,
    pub did: Option<String>,
    pub credential_id: Option<Uuid>,
    pub zone: String,
    pub clan: Option<String>,
    pub completed_at: DateTime<Utc>,
    /// Time between saga start and completion.
    pub elapsed_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateIdentityData {
    pub identity_id: IdentityId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBiometricTemplateData {
    pub identity_id: IdentityId,
    pub biometric_template_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeClanApprovalData {
    pub identity_id: IdentityId,
    pub approval_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateDidData {
    pub identity_id: IdentityId,
    pub did_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeZoneAccessData {
    pub identity_id: IdentityId,
    pub access_control_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeCredentialData {
    pub identity_id: IdentityId,
    pub credential_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_commands_are_flagged_as_compensation() {
        let id = IdentityId::new();
        let forward = RegistrationCommand::CreateDid(CreateDidData { identity_id: id });
        let undo = RegistrationCommand::DeactivateDid(DeactivateDidData {
            identity_id: id,
            did_id: Uuid::new_v4(),
        });

        assert!(!forward.is_compensation());
        assert!(undo.is_compensation());
        assert_eq!(undo.identity_id(), id);
    }

    #[test]
    fn serialized_tag_matches_command_type() {
        let command = RegistrationCommand::GrantZoneAccess(GrantZoneAccessData {
            identity_id: IdentityId::new(),
            zone: "general".to_string(),
            permission: AccessPermission::Read,
        });
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["type"], "GrantZoneAccess");
        assert_eq!(json["data"]["permission"], "Read");
        assert!(RegistrationCommand::message_types().contains(&command.message_type()));
    }
}
