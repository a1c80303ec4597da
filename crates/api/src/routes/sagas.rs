//! Message ingress and saga inspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::SagaId;
use contracts::RegistrationMessage;
use contracts::registration::StartIdentityRegistrationData;
use saga::{
    AuditEntry, Disposition, EngineResult, IdentityRegistrationSaga, ReconciliationItem,
    RegistrationData, RegistrationState, SagaDispatcher, SagaEngine, SagaStatus,
    TokioTimeoutScheduler, TracingCommandPublisher,
};
use saga_store::{SagaQuery, SagaStore};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::ApiError;

/// Default page size of `GET /sagas`.
const DEFAULT_LIMIT: usize = 100;

/// The engine type served by the API.
pub type RegistrationEngine = SagaEngine<
    IdentityRegistrationSaga,
    Arc<dyn SagaStore>,
    TracingCommandPublisher,
    TokioTimeoutScheduler<RegistrationMessage>,
>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: Arc<RegistrationEngine>,
    pub dispatcher: SagaDispatcher<RegistrationMessage>,
    pub(crate) timeout_forwarder: JoinHandle<()>,
    pub(crate) outbox_sweeper: JoinHandle<()>,
}

impl AppState {
    /// Stops the dispatcher after its queued messages are handled.
    pub async fn shutdown(&self) {
        self.timeout_forwarder.abort();
        self.outbox_sweeper.abort();
        self.dispatcher.shutdown().await;
    }
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub terminal: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct RegistrationStartedResponse {
    pub instance_id: String,
    pub result: EngineResult,
}

#[derive(Serialize)]
pub struct DeadlineResponse {
    pub message_type: String,
    pub due_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SagaResponse {
    pub instance_id: String,
    pub saga_type: String,
    pub version: i64,
    pub status: SagaStatus,
    pub current_step: String,
    pub data: RegistrationData,
    pub completed_steps: Vec<String>,
    pub pending_timeouts: Vec<DeadlineResponse>,
    pub reconciliation: Vec<ReconciliationItem>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub audit_entries: usize,
}

impl From<RegistrationState> for SagaResponse {
    fn from(state: RegistrationState) -> Self {
        Self {
            instance_id: state.instance_id().to_string(),
            saga_type: state.saga_type().to_string(),
            version: state.version().as_i64(),
            status: state.status(),
            current_step: state.current_step().to_string(),
            completed_steps: state
                .completed_steps()
                .iter()
                .map(|step| step.message_type.clone())
                .collect(),
            pending_timeouts: state
                .deadlines()
                .iter()
                .map(|deadline| DeadlineResponse {
                    message_type: deadline.message_type.clone(),
                    due_at: deadline.due_at,
                })
                .collect(),
            reconciliation: state.reconciliation_items().to_vec(),
            error_message: state.error_message().map(String::from),
            started_at: state.started_at(),
            completed_at: state.completed_at(),
            audit_entries: state.audit_trail().len(),
            data: state.data,
        }
    }
}

#[derive(Serialize)]
pub struct SagaListResponse {
    pub total: usize,
    pub sagas: Vec<SagaResponse>,
}

// -- Handlers --

/// POST /registrations: start an identity registration.
#[tracing::instrument(skip(state, req))]
pub async fn start_registration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartIdentityRegistrationData>,
) -> Result<(StatusCode, Json<RegistrationStartedResponse>), ApiError> {
    let result = state
        .dispatcher
        .dispatch(RegistrationMessage::start(req))
        .await?;

    let status = if result.disposition == Disposition::Started {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RegistrationStartedResponse {
            instance_id: result.instance_id.to_string(),
            result,
        }),
    ))
}

/// POST /messages: deliver any registration message.
#[tracing::instrument(skip(state, message))]
pub async fn deliver_message(
    State(state): State<Arc<AppState>>,
    Json(message): Json<RegistrationMessage>,
) -> Result<Json<EngineResult>, ApiError> {
    let result = state.dispatcher.dispatch(message).await?;
    Ok(Json(result))
}

/// GET /sagas/:id: current state of one instance.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga = load(&state, &id).await?;
    Ok(Json(SagaResponse::from(saga)))
}

/// GET /sagas/:id/audit: the audit trail of one instance.
#[tracing::instrument(skip(state))]
pub async fn audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let saga = load(&state, &id).await?;
    Ok(Json(saga.audit_trail().entries().to_vec()))
}

/// GET /sagas: list instances, optionally filtered by status or terminality.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<SagaListResponse>, ApiError> {
    let mut filter = SagaQuery::new();
    if let Some(status) = &params.status {
        let status: SagaStatus = status
            .parse()
            .map_err(|e: String| ApiError::BadRequest(format!("Invalid status: {e}")))?;
        filter = filter.status(status.as_str());
    }
    if let Some(terminal) = params.terminal {
        filter = filter.terminal(terminal);
    }

    let total = state.engine.count_instances(filter.clone()).await?;
    let page = filter
        .limit(params.limit.unwrap_or(DEFAULT_LIMIT))
        .offset(params.offset.unwrap_or(0));
    let sagas = state
        .engine
        .list_instances(page)
        .await?
        .into_iter()
        .map(SagaResponse::from)
        .collect();

    Ok(Json(SagaListResponse { total, sagas }))
}

async fn load(state: &AppState, id: &str) -> Result<RegistrationState, ApiError> {
    let instance_id = parse_saga_id(id)?;
    state
        .engine
        .get_instance(&instance_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::BadRequest("Saga id must not be empty".to_string()));
    }
    Ok(SagaId::from(id))
}
