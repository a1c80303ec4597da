//! Forward and compensation handlers of the identity registration saga.

use std::collections::BTreeMap;

use chrono::Duration;
use common::IdentityId;
use contracts::registration::{
    ClanApprovalRequestedData, CreateDidData, CreateIdentityData, DeactivateDidData,
    DeactivateIdentityData, DeleteBiometricTemplateData, GrantZoneAccessData,
    IDENTITY_CREDENTIAL_TYPE, IdentityRegistrationCompletedData, IssueCredentialData,
    RevokeClanApprovalData, RevokeCredentialData, RevokeZoneAccessData, message_types,
};
use contracts::{Message, RegistrationCommand, RegistrationMessage, registration::AccessPermission};
use uuid::Uuid;

use super::data::{ClanApprovalStatus, RegistrationStep};
use super::{
    CLAN_APPROVAL_TIMEOUT_HOURS, CREDENTIAL_VALIDITY_DAYS, DEFAULT_ZONE, MAX_BIOMETRIC_RETRIES,
    RegistrationState,
};
use crate::context::StepContext;
use crate::error::StepError;
use crate::status::RejectionKind;

type Ctx = StepContext<RegistrationMessage>;
type StepResult = Result<Vec<RegistrationCommand>, StepError>;

/// Retry counter key of the biometric capture step.
pub const BIOMETRIC_CAPTURE_RETRIES: &str = "BiometricCapture";

fn unexpected(expected: &str, message: &RegistrationMessage) -> StepError {
    StepError::unexpected_message(expected, message.message_type())
}

fn identity_of(state: &RegistrationState) -> Result<IdentityId, StepError> {
    state
        .data
        .identity_id
        .ok_or_else(|| StepError::new("registration has no identity id"))
}

pub fn on_start(message: &RegistrationMessage, state: &mut RegistrationState, ctx: &mut Ctx) -> StepResult {
    let RegistrationMessage::StartIdentityRegistration(start) = message else {
        return Err(unexpected(message_types::START_IDENTITY_REGISTRATION, message));
    };

    let identity_id = match start.identity_id {
        Some(identity_id) => identity_id,
        None => state
            .instance_id()
            .to_uuid()
            .map(IdentityId::from_uuid)
            .ok_or_else(|| StepError::new("instance id is not a UUID"))?,
    };

    let data = &mut state.data;
    data.identity_id = Some(identity_id);
    data.first_name = start.first_name.clone();
    data.last_name = start.last_name.clone();
    data.email = start.email.clone();
    data.date_of_birth = start.date_of_birth;
    data.zone = start
        .zone
        .clone()
        .filter(|zone| !zone.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ZONE.to_string());
    data.clan = start.clan.clone();
    state.current_step = RegistrationStep::Started;

    let command = RegistrationCommand::CreateIdentity(CreateIdentityData {
        identity_id,
        first_name: state.data.first_name.clone(),
        last_name: state.data.last_name.clone(),
        email: state.data.email.clone(),
        date_of_birth: state.data.date_of_birth,
        zone: state.data.zone.clone(),
        clan: state.data.clan.clone(),
    });
    let detail = format!("{} in zone {}", state.data.full_name(), state.data.zone);
    state.audit(ctx, "Registration started", Some(detail));
    Ok(vec![command])
}

pub fn on_identity_created(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::IdentityCreated(event) = message else {
        return Err(unexpected(message_types::IDENTITY_CREATED, message));
    };

    if let Some(name) = event.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        let (first, last) = name.split_once(' ').unwrap_or((name, ""));
        state.data.first_name = first.to_string();
        state.data.last_name = last.trim().to_string();
    }
    state.data.identity_created_at = Some(ctx.now());
    state.current_step = RegistrationStep::BiometricCapture;

    state.audit(ctx, "Identity created", Some(format!("identity {}", event.identity_id)));
    Ok(Vec::new())
}

pub fn on_biometrics_captured(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::BiometricsCaptured(event) = message else {
        return Err(unexpected(message_types::BIOMETRICS_CAPTURED, message));
    };
    let identity_id = identity_of(state)?;
    let now = ctx.now();

    let data = &mut state.data;
    data.biometric_template_id = Some(event.biometric_template_id);
    data.has_fingerprint = event.has_fingerprint;
    data.has_face_recognition = event.has_face_recognition;
    data.biometric_quality_score = Some(event.quality_score);
    data.biometrics_captured_at = Some(event.captured_at);

    let approval_id = Uuid::new_v4();
    let timeout_at = now + Duration::hours(CLAN_APPROVAL_TIMEOUT_HOURS);
    data.clan_approval_id = Some(approval_id);
    data.clan_approval_status = ClanApprovalStatus::Pending;
    data.clan_approval_submitted_at = Some(now);
    data.clan_approval_timeout_at = Some(timeout_at);
    state.current_step = RegistrationStep::ClanApprovalPending;

    ctx.schedule_timeout(
        timeout_at,
        RegistrationMessage::clan_approval_timed_out(identity_id, approval_id, now, timeout_at),
    );

    let command = RegistrationCommand::ClanApprovalRequested(ClanApprovalRequestedData {
        identity_id,
        approval_id,
        first_name: state.data.first_name.clone(),
        last_name: state.data.last_name.clone(),
        zone: state.data.zone.clone(),
        clan: state.data.clan.clone(),
        biometric_template_id: event.biometric_template_id,
        requested_at: now,
        timeout_at,
    });
    state.audit(
        ctx,
        "Biometrics captured",
        Some(format!(
            "template {} with quality {:.2}; clan approval requested",
            event.biometric_template_id, event.quality_score
        )),
    );
    Ok(vec![command])
}

pub fn on_biometric_capture_failed(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::BiometricCaptureFailed(event) = message else {
        return Err(unexpected(message_types::BIOMETRIC_CAPTURE_FAILED, message));
    };

    let attempts = state.increment_retry(BIOMETRIC_CAPTURE_RETRIES);
    state.data.last_biometric_failure = Some(event.reason.clone());
    state.audit(
        ctx,
        "Biometric capture failed",
        Some(format!("attempt {attempts}: {}", event.reason)),
    );

    if attempts > MAX_BIOMETRIC_RETRIES {
        ctx.reject(
            RejectionKind::Failed,
            format!("Biometric capture failed after {MAX_BIOMETRIC_RETRIES} retries: {}", event.reason),
        );
    }
    Ok(Vec::new())
}

pub fn on_clan_approval_granted(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::ClanApprovalGranted(event) = message else {
        return Err(unexpected(message_types::CLAN_APPROVAL_GRANTED, message));
    };
    let identity_id = identity_of(state)?;

    let data = &mut state.data;
    data.clan_approval_status = ClanApprovalStatus::Approved;
    data.clan_registrar_id = Some(event.registrar_id);
    data.clan_approval_notes = event.notes.clone();
    data.clan_decided_at = Some(event.approved_at);
    state.current_step = RegistrationStep::DidIssuance;
    state.clear_deadlines(message_types::CLAN_APPROVAL_TIMED_OUT);

    state.audit(
        ctx,
        "Clan approval granted",
        Some(format!("registrar {}", event.registrar_id)),
    );
    Ok(vec![RegistrationCommand::CreateDid(CreateDidData { identity_id })])
}

pub fn on_clan_approval_denied(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::ClanApprovalDenied(event) = message else {
        return Err(unexpected(message_types::CLAN_APPROVAL_DENIED, message));
    };

    state.data.clan_approval_status = ClanApprovalStatus::Denied;
    state.data.clan_registrar_id = Some(event.registrar_id);
    state.data.clan_decided_at = Some(event.denied_at);
    state.audit(ctx, "Clan approval denied", Some(event.reason.clone()));

    ctx.reject(
        RejectionKind::Rejected,
        format!("Clan approval denied: {}", event.reason),
    );
    Ok(Vec::new())
}

pub fn on_clan_approval_timed_out(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::ClanApprovalTimedOut(event) = message else {
        return Err(unexpected(message_types::CLAN_APPROVAL_TIMED_OUT, message));
    };

    state.data.clan_approval_status = ClanApprovalStatus::TimedOut;
    state.audit(
        ctx,
        "Clan approval timed out",
        Some(format!("submitted {}, deadline {}", event.submitted_at, event.timed_out_at)),
    );

    ctx.reject(RejectionKind::Failed, "Clan approval timed out");
    Ok(Vec::new())
}

pub fn on_did_created(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::DidCreated(event) = message else {
        return Err(unexpected(message_types::DID_CREATED, message));
    };
    let identity_id = identity_of(state)?;

    state.data.did_id = Some(event.did_id);
    state.data.did = Some(event.did.clone());
    state.data.did_created_at = Some(ctx.now());
    state.current_step = RegistrationStep::ZoneAccessGrant;

    state.audit(ctx, "DID created", Some(event.did.clone()));
    Ok(vec![RegistrationCommand::GrantZoneAccess(GrantZoneAccessData {
        identity_id,
        zone: state.data.zone.clone(),
        permission: AccessPermission::Read,
    })])
}

pub fn on_zone_access_granted(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::ZoneAccessGranted(event) = message else {
        return Err(unexpected(message_types::ZONE_ACCESS_GRANTED, message));
    };
    let identity_id = identity_of(state)?;
    let now = ctx.now();

    state.data.access_control_id = Some(event.access_control_id);
    state.data.zone_access_granted_at = Some(now);
    state.current_step = RegistrationStep::CredentialGeneration;

    let data = &state.data;
    let mut claims = BTreeMap::new();
    claims.insert("identityId".to_string(), identity_id.to_string());
    claims.insert("firstName".to_string(), data.first_name.clone());
    claims.insert("lastName".to_string(), data.last_name.clone());
    claims.insert("email".to_string(), data.email.clone());
    claims.insert("zone".to_string(), data.zone.clone());
    if let Some(did) = &data.did {
        claims.insert("did".to_string(), did.clone());
    }
    if let Some(clan) = &data.clan {
        claims.insert("clan".to_string(), clan.clone());
    }
    if let Some(date_of_birth) = data.date_of_birth {
        claims.insert("dateOfBirth".to_string(), date_of_birth.to_string());
    }

    let command = RegistrationCommand::IssueCredential(IssueCredentialData {
        request_id: Uuid::new_v4(),
        identity_id,
        credential_type: IDENTITY_CREDENTIAL_TYPE.to_string(),
        claims,
        issuer_id: data.clan_registrar_id,
        expires_at: Some(now + Duration::days(CREDENTIAL_VALIDITY_DAYS)),
    });

    state.audit(
        ctx,
        "Zone access granted",
        Some(format!("zone {}", state.data.zone)),
    );
    Ok(vec![command])
}

pub fn on_credential_issued(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::CredentialIssued(event) = message else {
        return Err(unexpected(message_types::CREDENTIAL_ISSUED, message));
    };
    let identity_id = identity_of(state)?;
    let now = ctx.now();

    state.data.credential_id = Some(event.credential_id);
    state.data.credential_issued_at = Some(now);

    let command =
        RegistrationCommand::IdentityRegistrationCompleted(IdentityRegistrationCompletedData {
            identity_id,
            did_id: state.data.did_id,
            did: state.data.did.clone(),
            credential_id: Some(event.credential_id),
            zone: state.data.zone.clone(),
            clan: state.data.clan.clone(),
            completed_at: now,
            elapsed_seconds: (now - state.started_at()).num_seconds(),
        });

    state.audit(
        ctx,
        "Credential issued",
        Some(format!("credential {}", event.credential_id)),
    );
    ctx.complete();
    Ok(vec![command])
}

pub fn on_registration_cancelled(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
    ctx: &mut Ctx,
) -> StepResult {
    let RegistrationMessage::RegistrationCancelled(event) = message else {
        return Err(unexpected(message_types::REGISTRATION_CANCELLED, message));
    };

    state.audit(ctx, "Registration cancelled", Some(event.reason.clone()));
    ctx.reject(
        RejectionKind::Cancelled,
        format!("Registration cancelled: {}", event.reason),
    );
    Ok(Vec::new())
}

// Compensations

fn rollback_reason(state: &RegistrationState) -> String {
    state
        .error_message()
        .unwrap_or("registration rolled back")
        .to_string()
}

pub fn undo_identity_created(message: &RegistrationMessage, state: &mut RegistrationState) -> StepResult {
    let RegistrationMessage::IdentityCreated(event) = message else {
        return Err(unexpected(message_types::IDENTITY_CREATED, message));
    };
    Ok(vec![RegistrationCommand::DeactivateIdentity(DeactivateIdentityData {
        identity_id: event.identity_id,
        reason: rollback_reason(state),
    })])
}

pub fn undo_biometrics_captured(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
) -> StepResult {
    let RegistrationMessage::BiometricsCaptured(event) = message else {
        return Err(unexpected(message_types::BIOMETRICS_CAPTURED, message));
    };
    if state.data.clan_approval_status == ClanApprovalStatus::Pending {
        state.data.clan_approval_status = ClanApprovalStatus::NotRequested;
    }
    Ok(vec![RegistrationCommand::DeleteBiometricTemplate(DeleteBiometricTemplateData {
        identity_id: event.identity_id,
        biometric_template_id: event.biometric_template_id,
    })])
}

pub fn undo_clan_approval_granted(
    message: &RegistrationMessage,
    state: &mut RegistrationState,
) -> StepResult {
    let RegistrationMessage::ClanApprovalGranted(event) = message else {
        return Err(unexpected(message_types::CLAN_APPROVAL_GRANTED, message));
    };
    state.data.clan_approval_status = ClanApprovalStatus::Revoked;
    Ok(vec![RegistrationCommand::RevokeClanApproval(RevokeClanApprovalData {
        identity_id: event.identity_id,
        approval_id: event.approval_id,
    })])
}

pub fn undo_did_created(message: &RegistrationMessage, _state: &mut RegistrationState) -> StepResult {
    let RegistrationMessage::DidCreated(event) = message else {
        return Err(unexpected(message_types::DID_CREATED, message));
    };
    Ok(vec![RegistrationCommand::DeactivateDid(DeactivateDidData {
        identity_id: event.identity_id,
        did_id: event.did_id,
    })])
}

pub fn undo_zone_access_granted(
    message: &RegistrationMessage,
    _state: &mut RegistrationState,
) -> StepResult {
    let RegistrationMessage::ZoneAccessGranted(event) = message else {
        return Err(unexpected(message_types::ZONE_ACCESS_GRANTED, message));
    };
    Ok(vec![RegistrationCommand::RevokeZoneAccess(RevokeZoneAccessData {
        identity_id: event.identity_id,
        access_control_id: event.access_control_id,
    })])
}

/// Unreachable while a credential issue completes the saga: no step after it can fail.
pub fn undo_credential_issued(
    message: &RegistrationMessage,
    _state: &mut RegistrationState,
) -> StepResult {
    let RegistrationMessage::CredentialIssued(event) = message else {
        return Err(unexpected(message_types::CREDENTIAL_ISSUED, message));
    };
    Ok(vec![RegistrationCommand::RevokeCredential(RevokeCredentialData {
        identity_id: event.identity_id,
        credential_id: event.credential_id,
    })])
}
