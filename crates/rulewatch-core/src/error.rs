use std::path::PathBuf;
use thiserror::Error;

use crate::condition::ConditionError;

#[derive(Debug, Error)]
pub enum RulewatchError {
    #[error("condition and action are required")]
    MissingField,

    #[error("invalid condition syntax: {0}")]
    InvalidCondition(#[from] ConditionError),

    #[error("rule already exists: {0}")]
    RuleExists(String),

    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RulewatchError>;
