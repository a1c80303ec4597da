//! Outbound effects committed with a transition and awaiting delivery.
//!
//! The engine stores the commands and timeout requests of a transition in
//! the same compare-and-swap save as the state. Once the publisher and the
//! scheduler accepted them the store is told to clear the outbox; until then
//! every later transition of the instance carries the pending entries forward
//! and delivers them first.

use serde::{Deserialize, Serialize};

use crate::instance::Deadline;

/// Commands and timeout requests not yet handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbox<C, M> {
    /// Commands in publish order.
    pub commands: Vec<C>,
    pub timeouts: Vec<Deadline<M>>,
}

impl<C, M> Default for Outbox<C, M> {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            timeouts: Vec::new(),
        }
    }
}

impl<C, M> Outbox<C, M> {
    pub fn new(commands: Vec<C>, timeouts: Vec<Deadline<M>>) -> Self {
        Self { commands, timeouts }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.timeouts.is_empty()
    }

    /// Appends the effects of a newer transition after the pending ones.
    pub fn append(&mut self, newer: Outbox<C, M>) {
        self.commands.extend(newer.commands);
        self.timeouts.extend(newer.timeouts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::IdentityId;
    use contracts::registration::{DeactivateIdentityData, DeleteBiometricTemplateData};
    use contracts::{Message, RegistrationCommand, RegistrationMessage};

    type TestOutbox = Outbox<RegistrationCommand, RegistrationMessage>;

    #[test]
    fn pending_entries_stay_ahead_of_newer_ones() {
        let id = IdentityId::new();
        let mut pending = TestOutbox::new(
            vec![RegistrationCommand::DeactivateIdentity(DeactivateIdentityData {
                identity_id: id,
                reason: "rollback".to_string(),
            })],
            Vec::new(),
        );
        assert!(!pending.is_empty());

        pending.append(TestOutbox::new(
            vec![RegistrationCommand::DeleteBiometricTemplate(
                DeleteBiometricTemplateData {
                    identity_id: id,
                    biometric_template_id: uuid::Uuid::new_v4(),
                },
            )],
            vec![Deadline::new(
                Utc::now(),
                RegistrationMessage::registration_cancelled(id, "late"),
            )],
        ));

        let types: Vec<_> = pending.commands.iter().map(|c| c.message_type()).collect();
        assert_eq!(types, ["DeactivateIdentity", "DeleteBiometricTemplate"]);
        assert_eq!(pending.timeouts.len(), 1);
        assert!(TestOutbox::default().is_empty());
    }
}
