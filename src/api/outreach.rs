use axum::extract::State;
use axum::Json;

use crate::error::ApiError;
use crate::outreach::OutreachSummary;
use crate::AppState;

/// POST /api/outreach/process: run one outreach batch now.
pub async fn handle_process(
    State(state): State<AppState>,
) -> Result<Json<OutreachSummary>, ApiError> {
    let summary = state.outreach.run_once().await?;
    Ok(Json(summary))
}
