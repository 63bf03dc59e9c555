use crate::db::schema::SchemaSnapshot;
use crate::pipeline::types::{Answer, FormatHint, Query};
use crate::pipeline::PipelineError;
use crate::web::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub format_hint: Option<FormatHint>,
}

/// Answer a natural-language question against the corpus and database.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<Answer>, (StatusCode, String)> {
    if payload.question.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "question must not be empty".to_string(),
        ));
    }

    let query = Query {
        question: payload.question,
        format_hint: payload.format_hint,
    };

    match state.pipeline.answer(&query).await {
        Ok(answer) => Ok(Json(answer)),
        Err(err) => {
            error!("Failed to answer question: {}", err);
            let status = match err {
                PipelineError::ModelInvocation(_) => StatusCode::BAD_GATEWAY,
                PipelineError::SchemaUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((status, err.to_string()))
        }
    }
}

/// Current table/column structure of the analytical database.
pub async fn get_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchemaSnapshot>, (StatusCode, String)> {
    let pool = state.db_pool.clone();
    let snapshot = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
        SchemaSnapshot::introspect(&conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub corpus_chunks: usize,
    pub table_count: usize,
}

pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let pool = state.db_pool.clone();
    let table_count = tokio::task::spawn_blocking(move || {
        let conn = pool.get().ok()?;
        SchemaSnapshot::introspect(&conn).ok().map(|s| s.tables.len())
    })
    .await
    .ok()
    .flatten()
    .unwrap_or(0);

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (Utc::now() - state.startup_time).num_seconds(),
        corpus_chunks: state.corpus_chunks,
        table_count,
    }))
}
