//! Wire format of the registration contracts as seen by external services.

use common::IdentityId;
use contracts::registration::{command_types, message_types};
use contracts::{Message, RegistrationCommand, RegistrationMessage};
use serde_json::json;
use uuid::Uuid;

#[test]
fn test_start_message_accepts_minimal_payload() {
    let message: RegistrationMessage = serde_json::from_value(json!({
        "type": "StartIdentityRegistration",
        "data": {
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.org"
        }
    }))
    .unwrap();

    assert_eq!(message.message_type(), message_types::START_IDENTITY_REGISTRATION);
    assert_eq!(message.identity_id(), None);
    let RegistrationMessage::StartIdentityRegistration(start) = message else {
        panic!("expected a start message");
    };
    assert!(start.zone.is_none());
    assert!(start.date_of_birth.is_none());
}

#[test]
fn test_did_created_uses_upper_case_tag() {
    let identity_id = IdentityId::new();
    let message = RegistrationMessage::did_created(identity_id, Uuid::new_v4(), "did:example:ada");

    let json = serde_json::to_value(&message).unwrap();

    assert_eq!(json["type"], "DIDCreated");
    assert_eq!(json["data"]["identity_id"], identity_id.to_string());
    assert_eq!(json["data"]["did"], "did:example:ada");
}

#[test]
fn test_every_message_tag_is_declared() {
    let identity_id = IdentityId::new();
    let now = chrono::Utc::now();
    let messages = [
        RegistrationMessage::identity_created(identity_id, None),
        RegistrationMessage::biometrics_captured(identity_id, Uuid::new_v4(), 0.9),
        RegistrationMessage::biometric_capture_failed(identity_id, "blurred"),
        RegistrationMessage::clan_approval_granted(identity_id, Uuid::new_v4(), Uuid::new_v4(), None),
        RegistrationMessage::clan_approval_denied(identity_id, Uuid::new_v4(), Uuid::new_v4(), "no"),
        RegistrationMessage::clan_approval_timed_out(identity_id, Uuid::new_v4(), now, now),
        RegistrationMessage::did_created(identity_id, Uuid::new_v4(), "did:example:x"),
        RegistrationMessage::zone_access_granted(identity_id, Uuid::new_v4(), Uuid::new_v4()),
        RegistrationMessage::credential_issued(identity_id, Uuid::new_v4()),
        RegistrationMessage::registration_cancelled(identity_id, "withdrawn"),
    ];

    for message in &messages {
        let json = serde_json::to_value(message).unwrap();
        assert_eq!(json["type"], message.message_type());
        assert!(RegistrationMessage::message_types().contains(&message.message_type()));
        assert_eq!(message.identity_id(), Some(identity_id));
    }
}

#[test]
fn test_unknown_message_type_is_rejected() {
    let result = serde_json::from_value::<RegistrationMessage>(json!({
        "type": "OrderPlaced",
        "data": {}
    }));

    assert!(result.is_err());
}

#[test]
fn test_compensation_commands_are_flagged() {
    let command: RegistrationCommand = serde_json::from_value(json!({
        "type": "DeactivateDID",
        "data": {
            "identity_id": IdentityId::new().to_string(),
            "did_id": Uuid::new_v4().to_string()
        }
    }))
    .unwrap();

    assert_eq!(command.message_type(), command_types::DEACTIVATE_DID);
    assert!(command.is_compensation());
}
