//! HTTP front door.
//!
//! `POST /api/build` authenticates the request with the shared secret, parses
//! it into a task and runs the pipeline to completion before answering, so
//! the status code reflects the outcome of the whole run. The run is spawned
//! on its own task: a caller that hangs up does not cancel it.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tower_http::trace::TraceLayer;

use pageforge_core::ForgeError;
use pageforge_core::orchestrator::TaskOrchestrator;
use pageforge_core::task::TaskRequest;

pub struct AppState {
    pub secret: String,
    pub orchestrator: Arc<TaskOrchestrator>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/build", post(api_build))
        .route("/api/health", get(api_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiResponse = (StatusCode, Json<Value>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "error": message.into() })))
}

/// Digests are compared instead of the raw strings so the comparison time
/// says nothing about how much of the secret matched.
fn secret_matches(given: Option<&str>, expected: &str) -> bool {
    given.is_some_and(|g| Sha256::digest(g.as_bytes()) == Sha256::digest(expected.as_bytes()))
}

fn status_for(error: &ForgeError) -> StatusCode {
    match error {
        ForgeError::Auth => StatusCode::UNAUTHORIZED,
        ForgeError::Validation(_) => StatusCode::BAD_REQUEST,
        ForgeError::Duplicate { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn api_build(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let Ok(Json(data)) = body else {
        return error(StatusCode::BAD_REQUEST, "Invalid JSON");
    };

    // Checked before anything else so unauthenticated callers learn nothing
    // about which fields are missing.
    if !secret_matches(data.get("secret").and_then(Value::as_str), &state.secret) {
        tracing::warn!(task = ?data.get("task"), "Rejected request with bad secret");
        return error(status_for(&ForgeError::Auth), ForgeError::Auth.to_string());
    }

    let task = match serde_json::from_value::<TaskRequest>(data)
        .map_err(|e| ForgeError::Validation(e.to_string()))
        .and_then(TaskRequest::into_task)
    {
        Ok(task) => task,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed task");
            return error(status_for(&e), e.to_string());
        }
    };
    tracing::info!(task = %task.id, round = %task.round, "Secret verified");

    let orchestrator = state.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run(&task).await });

    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Pipeline task aborted");
            return error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("A critical error occurred: {e}"),
            );
        }
    };

    match outcome {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "Process completed successfully." })),
        ),
        Err(failure) => {
            let status = status_for(&failure.error);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                return error(status, format!("A critical error occurred: {failure}"));
            }
            error(status, failure.error.to_string())
        }
    }
}

async fn api_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
