use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::condition::Condition;
use crate::error::{Result, RulewatchError};
use crate::metrics::MetricRecord;
use crate::rule::{ActionLogEntry, NewRule, Rule, TriggeredAction};

/// A rule plus its compiled condition. `None` means the condition did not
/// compile, so the rule can never trigger.
struct StoredRule {
    rule: Rule,
    compiled: Option<Condition>,
}

#[derive(Default)]
struct Inner {
    rules: Vec<StoredRule>,
    actions: Vec<ActionLogEntry>,
    fired: HashSet<(String, String)>,
    campaigns: BTreeMap<String, MetricRecord>,
}

/// In-memory store of rules, the triggered-action log, fired
/// (campaign, rule) pairs and the latest metric snapshot per campaign.
///
/// Cloning yields another handle to the same store. Each method holds the
/// lock for its whole body, so callers never observe a half-applied update.
#[derive(Clone, Default)]
pub struct RuleStore {
    inner: Arc<RwLock<Inner>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Register a rule, generating an id when none is given.
    ///
    /// Only presence of `condition` and `action` is checked here; a condition
    /// that fails to parse is stored but never triggers. Use
    /// [`NewRule::validate`] and [`RuleStore::add_validated`] to reject it
    /// instead.
    pub fn add_rule(&self, new: NewRule) -> Result<Rule> {
        let (Some(condition), Some(_)) = (new.condition.as_deref(), new.action.as_deref()) else {
            return Err(RulewatchError::MissingField);
        };
        let compiled = match Condition::parse(condition) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(condition = %condition, error = %e, "storing rule whose condition does not compile");
                None
            }
        };
        self.insert(new, compiled)
    }

    /// Register a rule whose condition was already compiled by
    /// [`NewRule::validate`].
    pub fn add_validated(&self, new: NewRule, compiled: Condition) -> Result<Rule> {
        self.insert(new, Some(compiled))
    }

    fn insert(&self, new: NewRule, compiled: Option<Condition>) -> Result<Rule> {
        let (Some(condition), Some(action)) = (new.condition, new.action) else {
            return Err(RulewatchError::MissingField);
        };

        let mut inner = self.write();
        let id = match new.id.filter(|id| !id.is_empty()) {
            Some(id) if inner.rules.iter().any(|r| r.rule.id == id) => {
                return Err(RulewatchError::RuleExists(id));
            }
            Some(id) => id,
            None => loop {
                let id = Uuid::new_v4().to_string();
                if !inner.rules.iter().any(|r| r.rule.id == id) {
                    break id;
                }
            },
        };

        let rule = Rule {
            id,
            description: new.description,
            condition,
            action,
        };
        inner.rules.push(StoredRule {
            rule: rule.clone(),
            compiled,
        });
        tracing::info!(rule_id = %rule.id, condition = %rule.condition, action = %rule.action, "rule added");
        Ok(rule)
    }

    /// All rules in registration order.
    pub fn list_rules(&self) -> Vec<Rule> {
        self.read().rules.iter().map(|r| r.rule.clone()).collect()
    }

    /// Evaluate every rule against one record, in registration order.
    pub fn evaluate(&self, record: &MetricRecord) -> Vec<TriggeredAction> {
        let metrics = record.metrics();
        self.read()
            .rules
            .iter()
            .filter(|r| r.compiled.as_ref().is_some_and(|c| c.matches(&metrics)))
            .map(|r| TriggeredAction {
                rule_id: r.rule.id.clone(),
                condition: r.rule.condition.clone(),
                action: r.rule.action.clone(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Action log
    // -----------------------------------------------------------------------

    pub fn log_action(
        &self,
        campaign_id: &str,
        action: &str,
        condition: Option<&str>,
    ) -> ActionLogEntry {
        let entry = new_entry(campaign_id, action, condition);
        self.write().actions.push(entry.clone());
        entry
    }

    /// The action log in chronological order.
    pub fn list_actions(&self) -> Vec<ActionLogEntry> {
        self.read().actions.clone()
    }

    // -----------------------------------------------------------------------
    // Dedup
    // -----------------------------------------------------------------------

    pub fn has_fired(&self, campaign_id: &str, rule_id: &str) -> bool {
        self.read()
            .fired
            .contains(&(campaign_id.to_string(), rule_id.to_string()))
    }

    pub fn mark_fired(&self, campaign_id: &str, rule_id: &str) {
        self.write()
            .fired
            .insert((campaign_id.to_string(), rule_id.to_string()));
    }

    /// Log `triggered` for `campaign_id` unless this (campaign, rule) pair
    /// has fired before. The check, the mark and the append happen under one
    /// lock. Returns the new entry, or `None` for a duplicate.
    pub fn record_firing(
        &self,
        campaign_id: &str,
        triggered: &TriggeredAction,
    ) -> Option<ActionLogEntry> {
        let mut inner = self.write();
        if !inner
            .fired
            .insert((campaign_id.to_string(), triggered.rule_id.clone()))
        {
            return None;
        }
        let entry = new_entry(campaign_id, &triggered.action, Some(&triggered.condition));
        inner.actions.push(entry.clone());
        Some(entry)
    }

    // -----------------------------------------------------------------------
    // Campaign snapshot
    // -----------------------------------------------------------------------

    /// Replace the latest-snapshot cache.
    pub fn set_campaigns(&self, records: Vec<MetricRecord>) {
        self.write().campaigns = records
            .into_iter()
            .map(|r| (r.campaign_id.clone(), r))
            .collect();
    }

    /// Latest snapshot, ordered by campaign id.
    pub fn list_campaigns(&self) -> Vec<MetricRecord> {
        self.read().campaigns.values().cloned().collect()
    }
}

fn new_entry(campaign_id: &str, action: &str, condition: Option<&str>) -> ActionLogEntry {
    ActionLogEntry {
        timestamp: chrono::Utc::now().timestamp_millis(),
        campaign_id: campaign_id.to_string(),
        action: action.to_string(),
        condition: condition.map(str::to_string),
    }
}
