use axum::extract::State;
use axum::Json;
use rulewatch_core::MetricRecord;

use crate::state::AppState;

/// GET /campaigns: latest metric snapshot per campaign.
pub async fn list_campaigns(State(app): State<AppState>) -> Json<Vec<MetricRecord>> {
    Json(app.store.list_campaigns())
}
