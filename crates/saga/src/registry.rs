//! Step registry: message type to forward and compensation handlers.

use std::collections::{HashMap, HashSet};

use contracts::Message;

use crate::context::StepContext;
use crate::correlator::{CorrelationFn, CorrelationRule, SagaCorrelator};
use crate::definition::SagaDefinition;
use crate::error::{RegistryError, StepError};
use crate::instance::InstanceState;

/// Handles a message: mutates state and returns the commands to publish.
pub type ForwardHandler<S> = Box<
    dyn Fn(
            &<S as SagaDefinition>::Message,
            &mut InstanceState<S>,
            &mut StepContext<<S as SagaDefinition>::Message>,
        ) -> Result<Vec<<S as SagaDefinition>::Command>, StepError>
        + Send
        + Sync,
>;

/// Undoes a completed step given the message that drove it; returns the
/// undo commands to publish.
pub type CompensationHandler<S> = Box<
    dyn Fn(
            &<S as SagaDefinition>::Message,
            &mut InstanceState<S>,
        ) -> Result<Vec<<S as SagaDefinition>::Command>, StepError>
        + Send
        + Sync,
>;

/// One registered step.
pub struct StepDefinition<S: SagaDefinition> {
    message_type: &'static str,
    forward: ForwardHandler<S>,
    compensation: Option<CompensationHandler<S>>,
    accepted_in: Option<Vec<S::Phase>>,
}

impl<S: SagaDefinition> StepDefinition<S> {
    /// Creates a step for `message_type` with its forward handler.
    pub fn new<F>(message_type: &'static str, forward: F) -> Self
    where
        F: Fn(
                &S::Message,
                &mut InstanceState<S>,
                &mut StepContext<S::Message>,
            ) -> Result<Vec<S::Command>, StepError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            message_type,
            forward: Box::new(forward),
            compensation: None,
            accepted_in: None,
        }
    }

    /// Registers the handler that undoes this step.
    pub fn compensate_with<F>(mut self, compensation: F) -> Self
    where
        F: Fn(&S::Message, &mut InstanceState<S>) -> Result<Vec<S::Command>, StepError>
            + Send
            + Sync
            + 'static,
    {
        self.compensation = Some(Box::new(compensation));
        self
    }

    /// Restricts the phases in which the step is accepted. Messages arriving
    /// in any other phase are dropped as stale.
    pub fn when_in(mut self, phases: impl IntoIterator<Item = S::Phase>) -> Self {
        self.accepted_in = Some(phases.into_iter().collect());
        self
    }

    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }

    /// Returns true if the step may run while the saga is in `phase`.
    pub fn accepts(&self, phase: S::Phase) -> bool {
        self.accepted_in
            .as_ref()
            .is_none_or(|phases| phases.contains(&phase))
    }

    pub(crate) fn forward(&self) -> &ForwardHandler<S> {
        &self.forward
    }

    pub(crate) fn compensation(&self) -> Option<&CompensationHandler<S>> {
        self.compensation.as_ref()
    }
}

impl<S: SagaDefinition> std::fmt::Debug for StepDefinition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("message_type", &self.message_type)
            .field("has_compensation", &self.has_compensation())
            .field("accepted_in", &self.accepted_in)
            .finish()
    }
}

/// Read-only step table of one saga type, validated at build time.
pub struct StepRegistry<S: SagaDefinition> {
    start: &'static str,
    steps: HashMap<&'static str, StepDefinition<S>>,
    correlator: SagaCorrelator<S::Message>,
}

impl<S: SagaDefinition> StepRegistry<S> {
    pub fn builder() -> StepRegistryBuilder<S> {
        StepRegistryBuilder::new()
    }

    pub fn lookup(&self, message_type: &str) -> Option<&StepDefinition<S>> {
        self.steps.get(message_type)
    }

    pub fn start_message_type(&self) -> &'static str {
        self.start
    }

    pub fn is_start(&self, message_type: &str) -> bool {
        self.start == message_type
    }

    pub fn correlator(&self) -> &SagaCorrelator<S::Message> {
        &self.correlator
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<S: SagaDefinition> std::fmt::Debug for StepRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("saga_type", &S::SAGA_TYPE)
            .field("start", &self.start)
            .field("steps", &self.steps.len())
            .field("correlator", &self.correlator)
            .finish()
    }
}

/// Collects steps and correlation rules; `build` validates them.
pub struct StepRegistryBuilder<S: SagaDefinition> {
    starts: Vec<StepDefinition<S>>,
    steps: Vec<StepDefinition<S>>,
    start_correlation: Vec<CorrelationFn<S::Message>>,
    correlations: Vec<(&'static str, CorrelationFn<S::Message>)>,
}

impl<S: SagaDefinition> StepRegistryBuilder<S> {
    fn new() -> Self {
        Self {
            starts: Vec::new(),
            steps: Vec::new(),
            start_correlation: Vec::new(),
            correlations: Vec::new(),
        }
    }

    /// Registers the start step. Start steps are accepted in any phase of a
    /// new instance and carry no compensation unless one is set explicitly.
    pub fn start(mut self, step: StepDefinition<S>) -> Self {
        self.starts.push(step);
        self
    }

    /// Registers a non-start step.
    pub fn step(mut self, step: StepDefinition<S>) -> Self {
        self.steps.push(step);
        self
    }

    /// Sets how the start message is correlated. When `extract` yields
    /// nothing a new instance id is synthesized.
    pub fn correlate_start(mut self, extract: CorrelationFn<S::Message>) -> Self {
        self.start_correlation.push(extract);
        self
    }

    /// Correlates the given message types through a field every one of them
    /// carries.
    pub fn correlate_by(
        mut self,
        message_types: &[&'static str],
        extract: CorrelationFn<S::Message>,
    ) -> Self {
        self.correlations
            .extend(message_types.iter().map(|message_type| (*message_type, extract)));
        self
    }

    pub fn build(self) -> Result<StepRegistry<S>, RegistryError> {
        let saga_type = S::SAGA_TYPE;
        let known: HashSet<&str> = <S::Message as Message>::message_types()
            .iter()
            .copied()
            .collect();

        let mut starts = self.starts.into_iter();
        let start = starts
            .next()
            .ok_or(RegistryError::MissingStart { saga_type })?;
        if let Some(second) = starts.next() {
            return Err(RegistryError::DuplicateStart {
                saga_type,
                first: start.message_type,
                second: second.message_type,
            });
        }
        let start_type = start.message_type;

        let mut steps = HashMap::new();
        for step in std::iter::once(start).chain(self.steps) {
            let message_type = step.message_type;
            if !known.contains(message_type) {
                return Err(RegistryError::UnknownMessageType {
                    saga_type,
                    message_type,
                });
            }
            if steps.insert(message_type, step).is_some() {
                return Err(RegistryError::DuplicateStep {
                    saga_type,
                    message_type,
                });
            }
        }

        let mut rules = HashMap::new();
        match self.start_correlation.as_slice() {
            [] => {}
            [extract] => {
                rules.insert(start_type, CorrelationRule::Start(*extract));
            }
            _ => {
                return Err(RegistryError::DuplicateCorrelation {
                    saga_type,
                    message_type: start_type,
                });
            }
        }
        for (message_type, extract) in self.correlations {
            if !known.contains(message_type) {
                return Err(RegistryError::UnknownMessageType {
                    saga_type,
                    message_type,
                });
            }
            if rules
                .insert(message_type, CorrelationRule::Field(extract))
                .is_some()
            {
                return Err(RegistryError::DuplicateCorrelation {
                    saga_type,
                    message_type,
                });
            }
        }

        // Every message of the family must route somewhere, even without a step.
        for &message_type in <S::Message as Message>::message_types() {
            if !rules.contains_key(message_type) {
                return Err(RegistryError::MissingCorrelation {
                    saga_type,
                    message_type,
                });
            }
        }

        Ok(StepRegistry {
            start: start_type,
            steps,
            correlator: SagaCorrelator::new(rules),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_registration::{IdentityRegistrationSaga, RegistrationStep};
    use common::SagaId;
    use contracts::RegistrationMessage;
    use contracts::registration::message_types::*;

    type Builder = StepRegistryBuilder<IdentityRegistrationSaga>;

    fn noop(
        _: &RegistrationMessage,
        _: &mut InstanceState<IdentityRegistrationSaga>,
        _: &mut StepContext<RegistrationMessage>,
    ) -> Result<Vec<contracts::RegistrationCommand>, StepError> {
        Ok(Vec::new())
    }

    fn by_identity(message: &RegistrationMessage) -> Option<SagaId> {
        message.identity_id().map(SagaId::from)
    }

    fn all_but_start() -> Vec<&'static str> {
        ALL.iter()
            .copied()
            .filter(|t| *t != START_IDENTITY_REGISTRATION)
            .collect()
    }

    fn correlated(builder: Builder) -> Builder {
        builder
            .correlate_start(by_identity)
            .correlate_by(&all_but_start(), by_identity)
    }

    #[test]
    fn production_registry_is_valid() {
        let registry = IdentityRegistrationSaga::registry().unwrap();
        assert_eq!(registry.start_message_type(), START_IDENTITY_REGISTRATION);
        assert_eq!(registry.len(), ALL.len());
        assert!(registry.lookup(IDENTITY_CREATED).unwrap().has_compensation());
        assert!(!registry.lookup(START_IDENTITY_REGISTRATION).unwrap().has_compensation());
    }

    #[test]
    fn missing_start_is_rejected() {
        let result = correlated(Builder::new())
            .step(StepDefinition::new(IDENTITY_CREATED, noop))
            .build();
        assert!(matches!(result, Err(RegistryError::MissingStart { .. })));
    }

    #[test]
    fn second_start_is_rejected() {
        let result = correlated(Builder::new())
            .start(StepDefinition::new(START_IDENTITY_REGISTRATION, noop))
            .start(StepDefinition::new(IDENTITY_CREATED, noop))
            .build();
        assert_eq!(
            result.unwrap_err(),
            RegistryError::DuplicateStart {
                saga_type: "IdentityRegistration",
                first: START_IDENTITY_REGISTRATION,
                second: IDENTITY_CREATED,
            }
        );
    }

    #[test]
    fn duplicate_step_is_rejected() {
        let result = correlated(Builder::new())
            .start(StepDefinition::new(START_IDENTITY_REGISTRATION, noop))
            .step(StepDefinition::new(DID_CREATED, noop))
            .step(StepDefinition::new(DID_CREATED, noop))
            .build();
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateStep { message_type: DID_CREATED, .. })
        ));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let result = correlated(Builder::new())
            .start(StepDefinition::new(START_IDENTITY_REGISTRATION, noop))
            .step(StepDefinition::new("OrderShipped", noop))
            .build();
        assert!(matches!(
            result,
            Err(RegistryError::UnknownMessageType { message_type: "OrderShipped", .. })
        ));
    }

    #[test]
    fn uncorrelated_message_type_fails_at_build() {
        let result = Builder::new()
            .start(StepDefinition::new(START_IDENTITY_REGISTRATION, noop))
            .correlate_start(by_identity)
            .correlate_by(&[IDENTITY_CREATED], by_identity)
            .build();
        assert!(matches!(result, Err(RegistryError::MissingCorrelation { .. })));
    }

    #[test]
    fn guards_restrict_phases() {
        let step = StepDefinition::<IdentityRegistrationSaga>::new(IDENTITY_CREATED, noop)
            .when_in([RegistrationStep::Started]);
        assert!(step.accepts(RegistrationStep::Started));
        assert!(!step.accepts(RegistrationStep::DidIssuance));

        let unguarded = StepDefinition::<IdentityRegistrationSaga>::new(IDENTITY_CREATED, noop);
        assert!(unguarded.accepts(RegistrationStep::DidIssuance));
    }
}
