//! HTTP ingress and process wiring for the saga orchestrator.
//!
//! Accepts identity registration messages over REST, routes them through the
//! sharded saga dispatcher, and exposes read-only saga inspection, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{SagaDispatcher, SagaEngine, SagaError, TokioTimeoutScheduler, TracingCommandPublisher};
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::sagas::{AppState, RegistrationEngine};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/registrations", post(routes::sagas::start_registration))
        .route("/messages", post(routes::sagas::deliver_message))
        .route("/sagas", get(routes::sagas::list))
        .route("/sagas/{id}", get(routes::sagas::get))
        .route("/sagas/{id}/audit", get(routes::sagas::audit))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state: the registration engine over `store`, its
/// dispatcher, the Tokio timer feeding timeouts back into the dispatcher and
/// the periodic sweep of undelivered outboxes.
///
/// Must be called from within a Tokio runtime.
pub fn create_default_state(
    store: Arc<dyn SagaStore>,
    config: &Config,
) -> Result<Arc<AppState>, SagaError> {
    let (scheduler, timeouts) = TokioTimeoutScheduler::new();
    let engine: Arc<RegistrationEngine> = Arc::new(
        SagaEngine::new(store, TracingCommandPublisher, scheduler)?
            .with_config(config.engine_config()),
    );
    let dispatcher = SagaDispatcher::spawn(Arc::clone(&engine), config.saga_workers);
    let timeout_forwarder = dispatcher.forward_timeouts(timeouts);
    let outbox_sweeper = spawn_outbox_sweeper(Arc::clone(&engine), config.outbox_sweep_interval());

    Ok(Arc::new(AppState {
        engine,
        dispatcher,
        timeout_forwarder,
        outbox_sweeper,
    }))
}

/// Redelivers outboxes left pending by failed publishes every `period`.
fn spawn_outbox_sweeper(engine: Arc<RegistrationEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            if let Err(e) = engine.flush_outboxes().await {
                tracing::warn!(error = %e, "outbox sweep failed");
            }
        }
    })
}
