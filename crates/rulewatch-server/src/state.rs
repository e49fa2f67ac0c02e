use rulewatch_core::RuleStore;

use crate::hub::EventHub;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: RuleStore,
    pub events: EventHub,
}

impl AppState {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            store: RuleStore::new(),
            events: EventHub::new(event_buffer),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_store_and_hub() {
        let state = AppState::default();
        let other = state.clone();
        let _sub = other.events.subscribe();
        other
            .store
            .add_rule(rulewatch_core::NewRule::new("spend > 1", "pause"))
            .unwrap();
        assert_eq!(state.store.list_rules().len(), 1);
        assert_eq!(state.events.subscriber_count(), 1);
    }
}
