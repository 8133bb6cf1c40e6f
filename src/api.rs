//! HTTP API exposing the load trigger, direct batch inserts, and the
//! hiring reports.
//!
//! Every response uses the same envelope: `status` is 1 on success and 0
//! on failure, `data` carries the payload, and `metadata` records the
//! service version and a timestamp.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::{DEFAULT_BATCH_SIZE, MAX_REQUEST_ROWS};
use crate::db::Pool;
use crate::io::BlobStore;
use crate::loader::{map_row, Destination, DestinationError, MappedRecord};
use crate::reports::{self, ReportError};
use crate::runner::{run_load, Format, LoadArgs};
use crate::schema::TargetTableSpec;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pool: Pool,
    pub blobs: Arc<dyn BlobStore>,
}

/// Request body for the load trigger.
#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub file_name: String,
    pub table: String,
    #[serde(default)]
    pub target_columns: Option<Vec<String>>,
    #[serde(default)]
    pub insert_columns: Option<Vec<String>>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_format() -> String {
    "csv".to_string()
}

/// Request body for a direct batch insert.
#[derive(Debug, Deserialize)]
pub struct BatchInsertRequest {
    pub table: String,
    pub rows: Vec<Vec<String>>,
}

fn metadata() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "status": 1,
        "message": "success",
        "data": data,
        "metadata": metadata(),
    }))
}

fn error_envelope(message: &str) -> Json<Value> {
    Json(json!({
        "status": 0,
        "message": message,
        "data": Value::Null,
        "metadata": metadata(),
    }))
}

/// Health check endpoint
async fn health(State(_state): State<ApiState>) -> Json<Value> {
    envelope(json!({ "status": "healthy" }))
}

/// Trigger a load of one source file into a target table.
///
/// Descriptor and configuration problems come back as errors; rejected
/// rows and rolled-back batches are part of the report payload.
async fn trigger_load(
    State(state): State<ApiState>,
    Json(request): Json<LoadRequest>,
) -> (StatusCode, Json<Value>) {
    let format = match Format::parse(&request.format) {
        Ok(format) => format,
        Err(err) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_envelope(&err.to_string()),
            );
        }
    };

    let args = LoadArgs {
        file_name: request.file_name,
        target_table: request.table,
        format,
        target_columns: request.target_columns,
        insert_columns: request.insert_columns,
        batch_size: request.batch_size,
    };

    match run_load(&state.pool, state.blobs.as_ref(), args, None).await {
        Ok(report) => {
            let data = serde_json::to_value(&report).unwrap_or(Value::Null);
            (StatusCode::OK, envelope(data))
        }
        Err(err) => {
            error!(error = %err, "Load request failed");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_envelope(&format!("{err:#}")),
            )
        }
    }
}

/// Insert up to `MAX_REQUEST_ROWS` rows into a catalog table in one
/// transaction. Any bad row rejects the whole request; nothing partial
/// is committed.
async fn batch_insert(
    State(state): State<ApiState>,
    Json(request): Json<BatchInsertRequest>,
) -> (StatusCode, Json<Value>) {
    if request.rows.is_empty() || request.rows.len() > MAX_REQUEST_ROWS {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_envelope(&format!(
                "Row count must be between 1 and {MAX_REQUEST_ROWS}, got {}",
                request.rows.len()
            )),
        );
    }

    let spec = match TargetTableSpec::catalog(&request.table) {
        Ok(spec) => spec,
        Err(err) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_envelope(&err.to_string()),
            );
        }
    };

    let mut records: Vec<MappedRecord> = Vec::with_capacity(request.rows.len());
    for (index, row) in request.rows.iter().enumerate() {
        let fields: Vec<&str> = row.iter().map(String::as_str).collect();
        match map_row(&fields, &spec) {
            Ok(record) => records.push(record),
            Err(err) => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    error_envelope(&format!("Row {}: {}", index + 1, err)),
                );
            }
        }
    }

    match state
        .pool
        .insert_batch(spec.table_name(), spec.insert_columns(), &records)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            envelope(json!({ "inserted": records.len() })),
        ),
        Err(DestinationError::Connectivity(message)) => {
            error!(error = %message, "Batch insert could not reach the database");
            (StatusCode::SERVICE_UNAVAILABLE, error_envelope(&message))
        }
        Err(DestinationError::Commit(message)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_envelope(&message),
        ),
    }
}

/// Employees hired per quarter for each department and job in a year.
async fn employees_by_quarter(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let year = match parse_year(&params) {
        Ok(year) => year,
        Err(response) => return response,
    };

    match reports::hires_by_quarter(&state.pool, year).await {
        Ok(rows) => {
            let data = serde_json::to_value(&rows).unwrap_or(Value::Null);
            (StatusCode::OK, envelope(data))
        }
        Err(err @ ReportError::InvalidYear(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_envelope(&err.to_string()),
        ),
        Err(err) => {
            error!(error = %err, "Quarter report failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_envelope("Report query failed"),
            )
        }
    }
}

/// Departments that hired above the cross-department average in a year.
async fn employees_hired(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let year = match parse_year(&params) {
        Ok(year) => year,
        Err(response) => return response,
    };

    match reports::departments_above_average(&state.pool, year).await {
        Ok(rows) => {
            let data = serde_json::to_value(&rows).unwrap_or(Value::Null);
            (StatusCode::OK, envelope(data))
        }
        Err(err @ ReportError::InvalidYear(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_envelope(&err.to_string()),
        ),
        Err(err) => {
            error!(error = %err, "Hired report failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_envelope("Report query failed"),
            )
        }
    }
}

fn parse_year(params: &HashMap<String, String>) -> Result<i32, (StatusCode, Json<Value>)> {
    match params.get("year").map(|s| s.parse::<i32>()) {
        Some(Ok(year)) => Ok(year),
        _ => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            error_envelope("Query parameter 'year' must be an integer"),
        )),
    }
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/load", post(trigger_load))
        .route("/api/v1/batch-insert", post(batch_insert))
        .route("/api/v1/employees-by-quarter", get(employees_by_quarter))
        .route("/api/v1/employees-hired", get(employees_hired))
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(bind: &str, state: ApiState) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    info!(addr = %bind, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
