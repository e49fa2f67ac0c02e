use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::{Result, RulewatchError};

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A registered (condition, action) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub condition: String,
    pub action: String,
}

/// Registration input. `id` is normally left empty and assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

impl NewRule {
    pub fn new(condition: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Check registration input: both `condition` and `action` must be
    /// present and non-blank, and the condition must parse.
    pub fn validate(&self) -> Result<Condition> {
        let condition = non_blank(self.condition.as_deref());
        let action = non_blank(self.action.as_deref());
        let (Some(condition), Some(_)) = (condition, action) else {
            return Err(RulewatchError::MissingField);
        };
        Ok(Condition::parse(condition)?)
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// TriggeredAction
// ---------------------------------------------------------------------------

/// A rule whose condition matched one metric record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredAction {
    pub rule_id: String,
    pub condition: String,
    pub action: String,
}

// ---------------------------------------------------------------------------
// ActionLogEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub campaign_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}
