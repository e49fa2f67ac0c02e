pub mod condition;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rule;
pub mod store;

pub use condition::{Condition, ConditionError};
pub use error::{Result, RulewatchError};
pub use metrics::{MetricRecord, Metrics};
pub use rule::{ActionLogEntry, NewRule, Rule, TriggeredAction};
pub use store::RuleStore;
