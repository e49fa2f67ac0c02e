use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rulewatch_core::{NewRule, Rule, RulewatchError};

use crate::error::AppError;
use crate::hub::HubEvent;
use crate::state::AppState;

/// GET /rules: all rules in registration order.
pub async fn list_rules(State(app): State<AppState>) -> Json<Vec<Rule>> {
    Json(app.store.list_rules())
}

#[derive(serde::Deserialize)]
pub struct CreateRuleBody {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /rules: validate, store and announce a new rule.
///
/// A body that is not a JSON object with string fields is reported the same
/// way as a missing field.
pub async fn create_rule(
    State(app): State<AppState>,
    body: Result<Json<CreateRuleBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Rule>), AppError> {
    let Json(body) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected rule body");
        RulewatchError::MissingField
    })?;

    let new = NewRule {
        id: None,
        description: body.description,
        condition: body.condition,
        action: body.action,
    };
    let compiled = new.validate()?;

    let rule = app.store.add_validated(new, compiled)?;
    app.events.broadcast(HubEvent::RuleAdded { rule: rule.clone() });
    Ok((StatusCode::CREATED, Json(rule)))
}
