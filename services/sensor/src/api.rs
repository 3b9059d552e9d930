use crate::config::ApiConfig;
use crate::error::SensorError;
use crate::ingest::{IngestReport, Measurement};
use crate::service::{DeleteAck, SensorService};
use crate::statistics::SensorStatistic;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: SensorService,
    pub max_batch_size: usize,
}

/// Body of `POST /data`: a single measurement or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MeasurementBatch {
    Many(Vec<Measurement>),
    One(Measurement),
}

impl MeasurementBatch {
    pub fn into_vec(self) -> Vec<Measurement> {
        match self {
            MeasurementBatch::Many(entries) => entries,
            MeasurementBatch::One(entry) => vec![entry],
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

impl From<SensorError> for ApiError {
    fn from(err: SensorError) -> Self {
        let (status, code) = match &err {
            SensorError::InvalidTimestamp(_) => (StatusCode::BAD_REQUEST, "INVALID_TIMESTAMP"),
            SensorError::EmptyBatch => (StatusCode::BAD_REQUEST, "EMPTY_BATCH"),
            SensorError::StoreWriteFailed(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_WRITE_FAILED")
            }
            SensorError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            SensorError::StoreQueryFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_QUERY_FAILED")
            }
        };

        if err.is_client_error() {
            warn!(error = %err, "Rejected request");
        } else {
            error!(error = %err, "Request failed");
        }

        api_error(status, code, err.to_string())
    }
}

/// Create the API router
///
/// Authentication, when added, belongs here as a layer over the sensor routes.
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/healthz", get(health_check))
        .route("/data", post(put_sensor_entries))
        .route(
            "/statistics/:sensor_id",
            get(get_sensor_statistics).delete(delete_sensor_data),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint, fails closed when the store is unreachable
async fn health_check(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    match state.service.ping().await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "STORE_UNAVAILABLE",
            "Store did not answer PING",
        )),
        Err(e) => Err(e.into()),
    }
}

/// Ingest one or many measurements
#[instrument(skip(state, body))]
async fn put_sensor_entries(
    State(state): State<AppState>,
    Json(body): Json<MeasurementBatch>,
) -> Result<Json<IngestReport>, ApiError> {
    let entries = body.into_vec();

    if entries.len() > state.max_batch_size {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "BATCH_TOO_LARGE",
            format!("Maximum {} measurements per batch", state.max_batch_size),
        ));
    }

    let report = state.service.ingest(&entries).await?;
    Ok(Json(report))
}

/// Statistics for a sensor
#[instrument(skip(state))]
async fn get_sensor_statistics(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> Result<Json<SensorStatistic>, ApiError> {
    let stats = state.service.statistics(&sensor_id).await?;
    Ok(Json(stats))
}

/// Delete a sensor's series
#[instrument(skip(state))]
async fn delete_sensor_data(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> Result<Json<DeleteAck>, ApiError> {
    let ack = state.service.delete(&sensor_id).await?;
    Ok(Json(ack))
}

/// Start the HTTP API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting sensor API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
