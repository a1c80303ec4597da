//! Identity registration saga.
//!
//! Drives a registration through identity creation, biometric capture, clan
//! approval, DID issuance, zone access and credential issuance. A denied or
//! timed-out approval, exhausted biometric retries, or a cancellation rolls
//! the completed steps back in reverse order.

mod data;
pub mod handlers;

pub use data::{ClanApprovalStatus, RegistrationData, RegistrationStep};

use common::SagaId;
use contracts::registration::message_types::*;
use contracts::{RegistrationCommand, RegistrationMessage};

use crate::definition::SagaDefinition;
use crate::error::RegistryError;
use crate::instance::InstanceState;
use crate::registry::{StepDefinition, StepRegistry};

/// Saga type name stored with every registration instance.
pub const SAGA_TYPE: &str = "IdentityRegistration";

/// Biometric capture failures tolerated before the saga fails.
pub const MAX_BIOMETRIC_RETRIES: u32 = 3;

/// How long the clan registrar has to decide.
pub const CLAN_APPROVAL_TIMEOUT_HOURS: i64 = 48;

/// Validity of the issued identity credential.
pub const CREDENTIAL_VALIDITY_DAYS: i64 = 365;

/// Zone used when the registrant names none.
pub const DEFAULT_ZONE: &str = "general";

/// State of one identity registration.
pub type RegistrationState = InstanceState<IdentityRegistrationSaga>;

/// The identity registration saga type.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRegistrationSaga;

fn by_identity(message: &RegistrationMessage) -> Option<SagaId> {
    message.identity_id().map(SagaId::from)
}

impl SagaDefinition for IdentityRegistrationSaga {
    type Data = RegistrationData;
    type Phase = RegistrationStep;
    type Message = RegistrationMessage;
    type Command = RegistrationCommand;

    const SAGA_TYPE: &'static str = SAGA_TYPE;

    fn registry() -> Result<StepRegistry<Self>, RegistryError> {
        use RegistrationStep::*;

        StepRegistry::builder()
            .start(StepDefinition::new(
                START_IDENTITY_REGISTRATION,
                handlers::on_start,
            ))
            .step(
                StepDefinition::new(IDENTITY_CREATED, handlers::on_identity_created)
                    .compensate_with(handlers::undo_identity_created)
                    .when_in([Started]),
            )
            .step(
                StepDefinition::new(BIOMETRICS_CAPTURED, handlers::on_biometrics_captured)
                    .compensate_with(handlers::undo_biometrics_captured)
                    .when_in([BiometricCapture]),
            )
            .step(
                StepDefinition::new(
                    BIOMETRIC_CAPTURE_FAILED,
                    handlers::on_biometric_capture_failed,
                )
                .when_in([BiometricCapture]),
            )
            .step(
                StepDefinition::new(CLAN_APPROVAL_GRANTED, handlers::on_clan_approval_granted)
                    .compensate_with(handlers::undo_clan_approval_granted)
                    .when_in([ClanApprovalPending]),
            )
            .step(
                StepDefinition::new(CLAN_APPROVAL_DENIED, handlers::on_clan_approval_denied)
                    .when_in([ClanApprovalPending]),
            )
            .step(
                StepDefinition::new(
                    CLAN_APPROVAL_TIMED_OUT,
                    handlers::on_clan_approval_timed_out,
                )
                .when_in([ClanApprovalPending]),
            )
            .step(
                StepDefinition::new(DID_CREATED, handlers::on_did_created)
                    .compensate_with(handlers::undo_did_created)
                    .when_in([DidIssuance]),
            )
            .step(
                StepDefinition::new(ZONE_ACCESS_GRANTED, handlers::on_zone_access_granted)
                    .compensate_with(handlers::undo_zone_access_granted)
                    .when_in([ZoneAccessGrant]),
            )
            .step(
                StepDefinition::new(CREDENTIAL_ISSUED, handlers::on_credential_issued)
                    .compensate_with(handlers::undo_credential_issued)
                    .when_in([CredentialGeneration]),
            )
            .step(
                StepDefinition::new(REGISTRATION_CANCELLED, handlers::on_registration_cancelled)
                    .when_in(RegistrationStep::IN_PROGRESS),
            )
            .correlate_start(by_identity)
            .correlate_by(
                &[
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
                ],
                by_identity,
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepContext;
    use crate::instance::SagaState;
    use crate::status::RejectionKind;
    use chrono::Utc;
    use common::IdentityId;
    use contracts::Message;
    use contracts::registration::StartIdentityRegistrationData;

    fn started_state(identity_id: IdentityId) -> RegistrationState {
        let mut state = SagaState::new(
            SagaId::from(identity_id),
            SAGA_TYPE,
            RegistrationStep::Started,
            Utc::now(),
        );
        let start = RegistrationMessage::start(
            StartIdentityRegistrationData::new("Ada", "Lovelace", "ada@example.org")
                .with_identity_id(identity_id),
        );
        let mut ctx = StepContext::new(Utc::now(), start.message_type());
        handlers::on_start(&start, &mut state, &mut ctx).unwrap();
        state
    }

    #[test]
    fn start_defaults_zone_and_requests_identity() {
        let identity_id = IdentityId::new();
        let mut state = SagaState::new(
            SagaId::from(identity_id),
            SAGA_TYPE,
            RegistrationStep::Started,
            Utc::now(),
        );
        let start = RegistrationMessage::start(
            StartIdentityRegistrationData::new("Ada", "Lovelace", "ada@example.org")
                .with_identity_id(identity_id),
        );
        let mut ctx = StepContext::new(Utc::now(), start.message_type());

        let commands = handlers::on_start(&start, &mut state, &mut ctx).unwrap();

        assert_eq!(state.data.zone, DEFAULT_ZONE);
        assert_eq!(state.data.identity_id, Some(identity_id));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].message_type(), "CreateIdentity");
        assert_eq!(state.audit_trail().len(), 1);
    }

    #[test]
    fn start_without_identity_derives_it_from_instance_id() {
        let instance_id = SagaId::new();
        let mut state: RegistrationState =
            SagaState::new(instance_id.clone(), SAGA_TYPE, RegistrationStep::Started, Utc::now());
        let start = RegistrationMessage::start(StartIdentityRegistrationData::new(
            "Ada", "Lovelace", "ada@example.org",
        ));
        let mut ctx = StepContext::new(Utc::now(), start.message_type());

        handlers::on_start(&start, &mut state, &mut ctx).unwrap();

        let identity_id = state.data.identity_id.unwrap();
        assert_eq!(SagaId::from(identity_id), instance_id);
    }

    #[test]
    fn identity_created_splits_full_name() {
        let identity_id = IdentityId::new();
        let mut state = started_state(identity_id);
        let message = RegistrationMessage::identity_created(identity_id, Some("Grace Brewster Hopper".into()));
        let mut ctx = StepContext::new(Utc::now(), message.message_type());

        handlers::on_identity_created(&message, &mut state, &mut ctx).unwrap();

        assert_eq!(state.data.first_name, "Grace");
        assert_eq!(state.data.last_name, "Brewster Hopper");
        assert_eq!(state.current_step, RegistrationStep::BiometricCapture);
    }

    #[test]
    fn biometric_failures_reject_only_past_the_limit() {
        let identity_id = IdentityId::new();
        let mut state = started_state(identity_id);
        let failure = RegistrationMessage::biometric_capture_failed(identity_id, "blurred");

        for _ in 0..MAX_BIOMETRIC_RETRIES {
            let mut ctx = StepContext::new(Utc::now(), failure.message_type());
            handlers::on_biometric_capture_failed(&failure, &mut state, &mut ctx).unwrap();
            assert!(!ctx.is_rejected());
        }

        let mut ctx = StepContext::new(Utc::now(), failure.message_type());
        handlers::on_biometric_capture_failed(&failure, &mut state, &mut ctx).unwrap();
        assert!(ctx.is_rejected());
        let (decision, _) = ctx.into_parts();
        assert!(matches!(
            decision,
            Some(crate::context::Decision::Reject { kind: RejectionKind::Failed, .. })
        ));
    }

    #[test]
    fn handler_rejects_foreign_message() {
        let identity_id = IdentityId::new();
        let mut state = started_state(identity_id);
        let message = RegistrationMessage::credential_issued(identity_id, uuid::Uuid::new_v4());
        let mut ctx = StepContext::new(Utc::now(), message.message_type());

        let result = handlers::on_did_created(&message, &mut state, &mut ctx);
        assert!(result.is_err());
    }

    #[test]
    fn biometrics_captured_arms_the_approval_timeout() {
        let identity_id = IdentityId::new();
        let mut state = started_state(identity_id);
        let message = RegistrationMessage::biometrics_captured(identity_id, uuid::Uuid::new_v4(), 0.92);
        let now = Utc::now();
        let mut ctx = StepContext::new(now, message.message_type());

        let commands = handlers::on_biometrics_captured(&message, &mut state, &mut ctx).unwrap();

        assert_eq!(commands[0].message_type(), "ClanApprovalRequested");
        assert_eq!(state.data.clan_approval_status, ClanApprovalStatus::Pending);
        let (_, timeouts) = ctx.into_parts();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].message_type, "ClanApprovalTimedOut");
        assert_eq!(
            timeouts[0].due_at,
            now + chrono::Duration::hours(CLAN_APPROVAL_TIMEOUT_HOURS)
        );
    }

    #[test]
    fn credential_undo_revokes_the_issued_credential() {
        let identity_id = IdentityId::new();
        let mut state = started_state(identity_id);
        let credential_id = uuid::Uuid::new_v4();
        let message = RegistrationMessage::credential_issued(identity_id, credential_id);

        let commands = handlers::undo_credential_issued(&message, &mut state).unwrap();

        assert_eq!(commands.len(), 1);
        assert!(matches!(
            &commands[0],
            RegistrationCommand::RevokeCredential(data)
                if data.credential_id == credential_id && data.identity_id == identity_id
        ));
        let foreign = RegistrationMessage::identity_created(identity_id, None);
        assert!(handlers::undo_credential_issued(&foreign, &mut state).is_err());
    }
}
