//! Compensation runner.

use chrono::{DateTime, Utc};

use crate::audit::AuditKind;
use crate::definition::{SagaDefinition, SagaPhase};
use crate::instance::{InstanceState, ReconciliationItem};
use crate::registry::StepRegistry;
use crate::status::RejectionKind;

/// What a compensation run did.
#[derive(Debug)]
pub(crate) struct CompensationReport<C> {
    /// Undo commands, in the order their steps were compensated.
    pub commands: Vec<C>,
    pub compensated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Rolls back the completed steps of an instance and makes it terminal.
///
/// Steps are compensated strictly newest first. A compensation that fails
/// leaves the state as it was before that handler ran, is recorded as a
/// reconciliation item, and does not stop the run.
pub(crate) fn compensate<S: SagaDefinition>(
    registry: &StepRegistry<S>,
    state: &mut InstanceState<S>,
    kind: RejectionKind,
    reason: &str,
    now: DateTime<Utc>,
) -> CompensationReport<S::Command> {
    let mut report = CompensationReport {
        commands: Vec::new(),
        compensated: 0,
        skipped: 0,
        failed: 0,
    };

    state.current_step = <S::Phase as SagaPhase>::compensating();
    state.error_message = Some(reason.to_string());
    state.record(
        now,
        AuditKind::CompensationStarted,
        None,
        "Compensation started",
        Some(reason.to_string()),
    );

    let completed = state.completed_steps.clone();
    for step in completed.iter().rev() {
        let message_type = step.message_type.as_str();
        let Some(compensation) = registry
            .lookup(message_type)
            .and_then(|definition| definition.compensation())
        else {
            tracing::debug!(step = message_type, "no compensation required");
            state.record(
                now,
                AuditKind::NoCompensationRequired,
                Some(message_type),
                format!("No compensation required for {message_type}"),
                None,
            );
            report.skipped += 1;
            continue;
        };

        let mut working = state.clone();
        match compensation(&step.message, &mut working) {
            Ok(commands) => {
                *state = working;
                tracing::info!(
                    step = message_type,
                    commands = commands.len(),
                    "step compensated"
                );
                state.record(
                    now,
                    AuditKind::Compensated,
                    Some(message_type),
                    format!("Compensated {message_type}"),
                    None,
                );
                report.commands.extend(commands);
                report.compensated += 1;
            }
            Err(e) => {
                tracing::warn!(step = message_type, error = %e, "compensation failed");
                metrics::counter!("saga_compensation_failures_total", "saga_type" => S::SAGA_TYPE)
                    .increment(1);
                state.record(
                    now,
                    AuditKind::CompensationFailed,
                    Some(message_type),
                    format!("Compensation of {message_type} failed"),
                    Some(e.to_string()),
                );
                state.reconciliation.push(ReconciliationItem {
                    message_type: message_type.to_string(),
                    reason: e.reason,
                    recorded_at: now,
                });
                report.failed += 1;
            }
        }
    }

    let status = kind.status();
    state.status = status;
    state.current_step = match kind {
        RejectionKind::Cancelled => <S::Phase as SagaPhase>::cancelled(),
        RejectionKind::Rejected | RejectionKind::Failed => <S::Phase as SagaPhase>::failed(),
    };
    state.completed_at = Some(now);
    state.deadlines.clear();
    state.record(
        now,
        AuditKind::RolledBack,
        None,
        format!("Saga {}", status.as_str().to_lowercase()),
        Some(format!(
            "{} compensated, {} skipped, {} failed",
            report.compensated, report.skipped, report.failed
        )),
    );

    report
}
