use axum::extract::State;
use axum::Json;
use rulewatch_core::ActionLogEntry;

use crate::state::AppState;

/// GET /actions: triggered-action log, oldest first.
pub async fn list_actions(State(app): State<AppState>) -> Json<Vec<ActionLogEntry>> {
    Json(app.store.list_actions())
}
