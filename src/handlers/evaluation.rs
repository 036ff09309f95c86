use crate::call::transcript::TranscriptEntry;
use crate::error::AppError;
use crate::eval::engine::EvaluationEngine;
use crate::eval::generator::HttpGenerator;
use crate::simulation::SimulationConfig;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub config: SimulationConfig,
    pub transcription: Vec<TranscriptEntry>,
}

/// POST /api/v1/evaluation
///
/// Scores a finished call. The response is always a complete report; when
/// the upstream generation fails the report comes back zero-scored with
/// manual-review comments instead of an error status.
pub async fn evaluate_call(
    state: web::Data<AppState>,
    body: web::Json<EvaluationRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let config = state.get_config();

    let generator = HttpGenerator::new(
        &config.evaluation.base_url,
        &config.evaluation.model,
        &config.evaluation.api_key,
    )?;
    let engine = EvaluationEngine::new(Arc::new(generator), state.corrections.clone());

    let result = engine.evaluate(&request.config, &request.transcription).await;
    state.increment_evaluations_completed();

    info!(
        agent = %result.agent_name,
        total_score = result.total_score,
        criteria = result.criteria_breakdown.len(),
        "evaluation completed"
    );

    Ok(HttpResponse::Ok().json(result))
}
