use crate::corrections::{self, MAX_EXAMPLES};
use crate::error::AppError;
use crate::eval::rubric::EvaluationResult;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRequest {
    /// The report as the engine produced it.
    pub original: EvaluationResult,
    /// The same report after human edits.
    pub corrected: EvaluationResult,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// POST /api/v1/corrections
///
/// Diffs a human-edited report against the original and records each
/// per-criterion delta as a calibration example for future evaluations.
pub async fn submit_correction(
    state: web::Data<AppState>,
    body: web::Json<CorrectionRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let examples = corrections::diff_reports(&request.original, &request.corrected);
    let recorded = examples.len();

    for example in examples {
        state.corrections.append(example);
    }

    info!(recorded, "correction feedback recorded");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "recorded": recorded,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// GET /api/v1/corrections?limit=N
pub async fn recent_corrections(
    state: web::Data<AppState>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = query.limit.unwrap_or(MAX_EXAMPLES).min(MAX_EXAMPLES);
    let examples = state.corrections.recent(limit);

    Ok(HttpResponse::Ok().json(json!({
        "count": examples.len(),
        "examples": examples
    })))
}
