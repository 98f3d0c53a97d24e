//! Periodic background refresh of a subscribed token set.

use crate::engine::PriceEngine;
use crate::types::{BatchPriceResult, Network, TokenDescriptor};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

#[derive(Debug, Clone)]
struct Subscription {
    network: Network,
    tokens: Vec<TokenDescriptor>,
}

/// Owns the refresh cadence for one token set. The background task started
/// by [`PriceScheduler::spawn`] only holds a weak reference and ends once the
/// scheduler (and with it the engine) is dropped.
pub struct PriceScheduler {
    engine: Arc<PriceEngine>,
    subscription: Mutex<Subscription>,
    refresh_interval: Duration,
    max_backoff: Duration,
    latest: watch::Sender<Option<Arc<BatchPriceResult>>>,
}

impl PriceScheduler {
    pub fn new(
        engine: Arc<PriceEngine>,
        network: Network,
        tokens: Vec<TokenDescriptor>,
        refresh_interval: Duration,
        max_backoff: Duration,
    ) -> Arc<Self> {
        let (latest, _) = watch::channel(None);
        Arc::new(Self {
            engine,
            subscription: Mutex::new(Subscription { network, tokens }),
            refresh_interval,
            max_backoff: max_backoff.max(refresh_interval),
            latest,
        })
    }

    pub fn engine(&self) -> &Arc<PriceEngine> {
        &self.engine
    }

    fn current(&self) -> Subscription {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replaces the token set the scheduler keeps fresh.
    pub fn subscribe(&self, network: Network, tokens: Vec<TokenDescriptor>) {
        info!(%network, tokens = tokens.len(), "price subscription updated");
        *self.subscription.lock().unwrap_or_else(|e| e.into_inner()) = Subscription { network, tokens };
    }

    pub fn network(&self) -> Network {
        self.current().network
    }

    pub fn tokens(&self) -> Vec<TokenDescriptor> {
        self.current().tokens
    }

    /// Prices the subscribed set and publishes the result to watchers.
    pub async fn refresh(&self, force: bool) -> BatchPriceResult {
        let Subscription { network, tokens } = self.current();
        let result = self.engine.get_batch(&tokens, network, force).await;
        self.latest.send_replace(Some(Arc::new(result.clone())));
        result
    }

    /// Forces a cache bypass for the subscribed set.
    pub async fn refetch(&self) -> BatchPriceResult {
        self.refresh(true).await
    }

    pub fn latest(&self) -> Option<Arc<BatchPriceResult>> {
        self.latest.borrow().clone()
    }

    pub fn updates(&self) -> watch::Receiver<Option<Arc<BatchPriceResult>>> {
        self.latest.subscribe()
    }

    /// Delay before the next run given the outcome of the last one.
    fn next_delay(&self, previous: Duration, rate_limited: bool) -> Duration {
        if rate_limited {
            previous.saturating_mul(2).clamp(self.refresh_interval, self.max_backoff)
        } else {
            self.refresh_interval
        }
    }

    /// Starts the background refresh loop. The first refresh runs right away.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let network = self.network();
        tokio::spawn(run(weak).instrument(tracing::info_span!("price_scheduler", %network)))
    }
}

async fn run(scheduler: Weak<PriceScheduler>) {
    let mut backoff: Option<Duration> = None;
    while let Some(this) = scheduler.upgrade() {
        let started = Instant::now();
        let result = this.refresh(true).await;
        let delay = this.next_delay(backoff.unwrap_or(this.refresh_interval), result.rate_limited);
        if result.rate_limited {
            warn!(backoff = ?delay, "rate limited, backing off");
        }
        backoff = Some(delay);
        drop(this);
        tokio::time::sleep(delay.saturating_sub(started.elapsed())).await;
    }
    info!("price scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;

    fn scheduler(refresh: u64, max: u64) -> Arc<PriceScheduler> {
        let engine = Arc::new(PriceEngine::new(EngineSettings::default()));
        PriceScheduler::new(engine, Network::Ethereum, vec![], Duration::from_secs(refresh), Duration::from_secs(max))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let s = scheduler(120, 600);
        let d = s.next_delay(Duration::from_secs(120), true);
        assert_eq!(d, Duration::from_secs(240));
        let d = s.next_delay(d, true);
        assert_eq!(d, Duration::from_secs(480));
        let d = s.next_delay(d, true);
        assert_eq!(d, Duration::from_secs(600));
        assert_eq!(s.next_delay(d, false), Duration::from_secs(120));
    }

    #[test]
    fn max_backoff_never_below_interval() {
        let s = scheduler(120, 10);
        assert_eq!(s.next_delay(Duration::from_secs(120), true), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn refresh_publishes_latest() {
        let s = scheduler(120, 600);
        let mut updates = s.updates();
        assert!(s.latest().is_none());
        s.refetch().await;
        assert!(updates.has_changed().unwrap());
        // unconfigured network: an error result is still published
        let latest = updates.borrow_and_update().clone().unwrap();
        assert!(latest.error.is_some());
    }
}
