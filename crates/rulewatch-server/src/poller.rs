use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rulewatch_core::{MetricRecord, RuleStore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::hub::{EventHub, HubEvent};
use crate::source::{MetricSource, SourceError};

/// Shortest accepted tick period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A previous cycle was still running.
    Skipped,
    Completed {
        campaigns: usize,
        triggered: usize,
        logged: usize,
    },
    /// The cycle ended early; the error was logged.
    Failed,
}

/// Clears the in-flight flag when dropped, including on cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The fetch → evaluate → dedup → log → notify cycle.
pub struct Poller {
    store: RuleStore,
    events: EventHub,
    source: Arc<dyn MetricSource>,
    campaigns: Vec<String>,
    fetch_timeout: Duration,
    polling: AtomicBool,
}

impl Poller {
    pub fn new(
        store: RuleStore,
        events: EventHub,
        source: Arc<dyn MetricSource>,
        campaigns: Vec<String>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            events,
            source,
            campaigns,
            fetch_timeout,
            polling: AtomicBool::new(false),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Run one cycle unless one is already in flight.
    pub async fn poll_once(&self) -> PollOutcome {
        let Some(_guard) = InFlight::acquire(&self.polling) else {
            debug!("previous poll still running; skipping cycle");
            return PollOutcome::Skipped;
        };
        match self.run_cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "poll cycle failed");
                PollOutcome::Failed
            }
        }
    }

    async fn run_cycle(&self) -> Result<PollOutcome, SourceError> {
        let fetches = self.campaigns.iter().map(|id| self.fetch(id));
        let records = futures::future::try_join_all(fetches).await?;
        self.store.set_campaigns(records.clone());

        let mut triggered = 0;
        let mut logged = 0;
        for record in &records {
            for hit in self.store.evaluate(record) {
                triggered += 1;
                let Some(entry) = self.store.record_firing(&record.campaign_id, &hit) else {
                    continue;
                };
                logged += 1;
                info!(
                    campaign_id = %record.campaign_id,
                    rule_id = %hit.rule_id,
                    action = %hit.action,
                    "rule fired"
                );
                self.events.broadcast(HubEvent::ActionLogged { action: entry });
            }
        }

        debug!(campaigns = records.len(), triggered, logged, "poll cycle complete");
        Ok(PollOutcome::Completed {
            campaigns: records.len(),
            triggered,
            logged,
        })
    }

    async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError> {
        tokio::time::timeout(self.fetch_timeout, self.source.fetch(campaign_id))
            .await
            .map_err(|_| SourceError::Timeout {
                campaign_id: campaign_id.to_string(),
                timeout: self.fetch_timeout,
            })?
    }

    /// Start polling every `interval`, beginning immediately. Each tick runs
    /// its cycle on its own task so a slow cycle makes later ticks skip
    /// rather than queue. Cycle tasks live in a `JoinSet` owned by the loop,
    /// so stopping the loop also cancels a cycle that is still running.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PollTask {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut cycles = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let poller = Arc::clone(&self);
                        cycles.spawn(async move {
                            poller.poll_once().await;
                        });
                    }
                    Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                        if let Err(e) = joined {
                            warn!(error = %e, "poll cycle task ended abnormally");
                        }
                    }
                }
            }
        });
        PollTask { handle }
    }
}

/// Handle to the background polling task; stops it when dropped.
pub struct PollTask {
    handle: JoinHandle<()>,
}

impl PollTask {
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rulewatch_core::NewRule;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Replays a fixed sequence of spend values; other metrics are constant.
    struct ScriptedSource {
        spend: Mutex<VecDeque<f64>>,
    }

    impl ScriptedSource {
        fn new(spend: &[f64]) -> Arc<Self> {
            Arc::new(Self {
                spend: Mutex::new(spend.iter().copied().collect()),
            })
        }
    }

    #[async_trait]
    impl MetricSource for ScriptedSource {
        async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError> {
            let spend = self.spend.lock().unwrap().pop_front().unwrap_or(0.0);
            Ok(MetricRecord::new(campaign_id, spend, 0.5, 3.0))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl MetricSource for FailingSource {
        async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError> {
            Err(SourceError::Fetch {
                campaign_id: campaign_id.to_string(),
                message: "boom".into(),
            })
        }
    }

    /// Blocks inside `fetch` until released.
    struct GatedSource {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricSource for GatedSource {
        async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(MetricRecord::new(campaign_id, 600.0, 0.5, 3.0))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl MetricSource for SlowSource {
        async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(MetricRecord::new(campaign_id, 600.0, 0.5, 3.0))
        }
    }

    fn poller(store: &RuleStore, hub: &EventHub, source: Arc<dyn MetricSource>) -> Poller {
        Poller::new(
            store.clone(),
            hub.clone(),
            source,
            vec!["c1".to_string()],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn repeated_trigger_is_logged_once() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        store.add_rule(NewRule::new("spend > 500", "pause")).unwrap();
        let p = poller(&store, &hub, ScriptedSource::new(&[600.0, 650.0]));

        assert_eq!(
            p.poll_once().await,
            PollOutcome::Completed {
                campaigns: 1,
                triggered: 1,
                logged: 1
            }
        );
        assert_eq!(
            p.poll_once().await,
            PollOutcome::Completed {
                campaigns: 1,
                triggered: 1,
                logged: 0
            }
        );

        let actions = store.list_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].campaign_id, "c1");
        assert_eq!(actions[0].action, "pause");
        assert_eq!(actions[0].condition.as_deref(), Some("spend > 500"));
    }

    #[tokio::test]
    async fn non_matching_poll_logs_nothing() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        store.add_rule(NewRule::new("spend > 500", "pause")).unwrap();
        let p = poller(&store, &hub, ScriptedSource::new(&[400.0]));

        assert_eq!(
            p.poll_once().await,
            PollOutcome::Completed {
                campaigns: 1,
                triggered: 0,
                logged: 0
            }
        );
        assert!(store.list_actions().is_empty());
        assert_eq!(store.list_campaigns()[0].spend, 400.0);
    }

    #[tokio::test]
    async fn logged_action_is_broadcast() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        let mut sub = hub.subscribe();
        store.add_rule(NewRule::new("spend > 500", "pause")).unwrap();
        let p = poller(&store, &hub, ScriptedSource::new(&[600.0]));

        p.poll_once().await;
        match sub.recv().await {
            Some(HubEvent::ActionLogged { action }) => {
                assert_eq!(action, store.list_actions()[0]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_campaign_is_evaluated() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        store.add_rule(NewRule::new("spend > 500", "pause")).unwrap();
        let p = Poller::new(
            store.clone(),
            hub.clone(),
            ScriptedSource::new(&[600.0, 700.0]),
            vec!["a".to_string(), "b".to_string()],
            Duration::from_secs(5),
        );

        assert_eq!(
            p.poll_once().await,
            PollOutcome::Completed {
                campaigns: 2,
                triggered: 2,
                logged: 2
            }
        );
        let mut campaigns: Vec<_> = store
            .list_actions()
            .into_iter()
            .map(|a| a.campaign_id)
            .collect();
        campaigns.sort();
        assert_eq!(campaigns, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn source_error_ends_cycle_without_state_change() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        store.add_rule(NewRule::new("spend > 0", "pause")).unwrap();
        store.set_campaigns(vec![MetricRecord::new("old", 1.0, 1.0, 1.0)]);
        let p = poller(&store, &hub, Arc::new(FailingSource));

        assert_eq!(p.poll_once().await, PollOutcome::Failed);
        assert!(!p.is_polling());
        assert!(store.list_actions().is_empty());
        assert_eq!(store.list_campaigns()[0].campaign_id, "old");
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        let p = Poller::new(
            store.clone(),
            hub,
            Arc::new(SlowSource),
            vec!["c1".to_string()],
            Duration::from_millis(50),
        );
        assert_eq!(p.poll_once().await, PollOutcome::Failed);
        assert!(!p.is_polling());
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        store.add_rule(NewRule::new("spend > 500", "pause")).unwrap();
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let p = Arc::new(poller(&store, &hub, source.clone()));

        let first = tokio::spawn({
            let p = Arc::clone(&p);
            async move { p.poll_once().await }
        });
        source.entered.notified().await;
        assert!(p.is_polling());

        assert_eq!(p.poll_once().await, PollOutcome::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        source.release.notify_one();
        assert!(matches!(
            first.await.unwrap(),
            PollOutcome::Completed { logged: 1, .. }
        ));
        assert!(!p.is_polling());
    }

    #[tokio::test]
    async fn spawned_loop_polls_immediately() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        let mut sub = hub.subscribe();
        store.add_rule(NewRule::new("spend > 500", "pause")).unwrap();
        let p = Arc::new(poller(&store, &hub, ScriptedSource::new(&[600.0])));

        let task = p.spawn(Duration::from_secs(3600));
        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("first tick should poll right away");
        assert!(matches!(event, Some(HubEvent::ActionLogged { .. })));
        drop(task);
    }

    #[tokio::test]
    async fn stopping_the_loop_cancels_a_running_cycle() {
        let store = RuleStore::new();
        let hub = EventHub::new(8);
        store.add_rule(NewRule::new("spend > 500", "pause")).unwrap();
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let p = Arc::new(poller(&store, &hub, source.clone()));

        let task = Arc::clone(&p).spawn(Duration::from_secs(3600));
        source.entered.notified().await;
        assert!(p.is_polling());

        drop(task);
        tokio::time::timeout(Duration::from_secs(5), async {
            while p.is_polling() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cycle should be cancelled with the loop");

        source.release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(store.list_actions().is_empty());
        assert!(store.list_campaigns().is_empty());
    }
}
