use crate::codec;
use crate::errors::Error;
use crate::metrics::{
    ACCEPTED_TOTAL, REJECTED_TOTAL, REQUESTS_TOTAL, STORE_FAILURES_TOTAL,
    STORE_WRITE_LATENCY_SECONDS,
};
use crate::model::IngestResponse;
use crate::store::DocumentStore;
use crate::validate::{self, ValidationError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn DocumentStore>,
    database: Arc<str>,
    container: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, database: &str, container: &str) -> Self {
        Self {
            store,
            database: database.into(),
            container: container.into(),
        }
    }
}

/// `/api/telemetry` is the route an Azure Functions custom handler receives.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/telemetry", post(ingest_telemetry))
        .route("/api/telemetry", post(ingest_telemetry))
        .with_state(state)
}

#[instrument(name = "ingest_telemetry", skip_all, fields(body_len = body.len()))]
async fn ingest_telemetry(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    REQUESTS_TOTAL.inc();

    let mut record = validate::parse(&body).map_err(|e| {
        REJECTED_TOTAL.inc();
        warn!(reason = e.reason(), "Rejected telemetry: {}", e);
        ApiError::Validation(e)
    })?;

    record.stamp(Utc::now());

    let summary = record
        .summary()
        .ok_or_else(|| ApiError::Internal("validated record is missing key fields".to_string()))?;
    let document = codec::to_document(&record).map_err(|e| ApiError::Internal(e.to_string()))?;

    debug!(id = %summary.id, device_id = %summary.device_id, "Persisting telemetry");

    let start = Instant::now();
    let result = state
        .store
        .create_item(&state.database, &state.container, &summary.device_id, &document)
        .await;
    STORE_WRITE_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

    if let Err(e) = result {
        STORE_FAILURES_TOTAL.inc();
        return Err(ApiError::store(e, &summary));
    }

    ACCEPTED_TOTAL.inc();
    info!(id = %summary.id, device_id = %summary.device_id, "Telemetry stored");

    Ok((StatusCode::CREATED, Json(summary)))
}

#[derive(Debug)]
enum ApiError {
    Validation(ValidationError),
    Conflict { id: String, device_id: String },
    Unavailable(Error),
    Store(Error),
    Internal(String),
}

impl ApiError {
    fn store(err: Error, summary: &IngestResponse) -> Self {
        if err.is_conflict() {
            ApiError::Conflict {
                id: summary.id.clone(),
                device_id: summary.device_id.clone(),
            }
        } else if err.is_unavailable() {
            ApiError::Unavailable(err)
        } else {
            ApiError::Store(err)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            ApiError::Conflict { id, device_id } => {
                warn!(%id, %device_id, "Duplicate telemetry id");
                (
                    StatusCode::CONFLICT,
                    format!(
                        "Telemetry with id '{}' already exists for device '{}'.",
                        id, device_id
                    ),
                )
                    .into_response()
            }
            ApiError::Unavailable(e) => {
                error!("Document store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Telemetry store is unavailable.".to_string(),
                )
                    .into_response()
            }
            ApiError::Store(e) => {
                error!("Document store error: {}", e);
                internal_error()
            }
            ApiError::Internal(message) => {
                error!("Internal error: {}", message);
                internal_error()
            }
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error.".to_string(),
    )
        .into_response()
}
