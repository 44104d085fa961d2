//! Realtime polling for the currently viewed site.
//!
//! One poller per viewed site; navigating away cancels it so a backgrounded
//! view never keeps hitting the vendor API. Consumers observe updates
//! through a `watch` channel and always see only the latest snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sitepulse_core::model::RealtimeSnapshot;
use sitepulse_core::provider::AnalyticsProvider;

pub const POLL_INTERVAL_SECS: u64 = 10;

pub struct RealtimePoller {
    snapshot: watch::Receiver<Option<RealtimeSnapshot>>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RealtimePoller {
    /// Start polling immediately and then every [`POLL_INTERVAL_SECS`].
    /// A failed poll logs and waits for the next tick; it never ends the
    /// loop.
    pub fn spawn(provider: Arc<dyn AnalyticsProvider>, website_id: String) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!(website = %website_id, "realtime poller stopped");
                            return;
                        }
                        continue;
                    }
                }
                match provider.realtime(&website_id).await {
                    Ok(snapshot) => {
                        let _ = snapshot_tx.send(Some(snapshot));
                    }
                    Err(err) => {
                        warn!(website = %website_id, error = %err, "realtime poll failed");
                    }
                }
            }
        });

        Self {
            snapshot: snapshot_rx,
            shutdown: shutdown_tx,
            handle,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RealtimeSnapshot>> {
        self.snapshot.clone()
    }

    pub fn latest(&self) -> Option<RealtimeSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Stop polling. The in-flight fetch, if any, completes but its result
    /// is the last one published.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for RealtimePoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitepulse_core::account::Credentials;
    use sitepulse_core::daterange::DateRange;
    use sitepulse_core::error::ProviderError;
    use sitepulse_core::model::{ChartPoint, MetricItem, ProviderType, Stats, Website};
    use sitepulse_core::provider::{MetricKind, SeriesMetric};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts realtime fetches; all other operations are unreachable in
    /// these tests.
    #[derive(Default)]
    struct CountingProvider {
        polls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl AnalyticsProvider for CountingProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Umami
        }

        fn server_url(&self) -> String {
            "https://stats.example.com".to_string()
        }

        fn is_authenticated(&self) -> bool {
            true
        }

        async fn authenticate(&self, _credentials: &Credentials) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn websites(&self) -> Result<Vec<Website>, ProviderError> {
            Ok(Vec::new())
        }

        async fn stats(
            &self,
            _website_id: &str,
            _range: &DateRange,
        ) -> Result<Stats, ProviderError> {
            Ok(Stats::default())
        }

        async fn series(
            &self,
            _website_id: &str,
            _range: &DateRange,
            _metric: SeriesMetric,
        ) -> Result<Vec<ChartPoint>, ProviderError> {
            Ok(Vec::new())
        }

        async fn active_visitors(&self, _website_id: &str) -> Result<u64, ProviderError> {
            Ok(0)
        }

        async fn realtime(&self, _website_id: &str) -> Result<RealtimeSnapshot, ProviderError> {
            let count = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RealtimeSnapshot {
                active_visitors: Some(count),
                ..RealtimeSnapshot::default()
            })
        }

        async fn metric_breakdown(
            &self,
            _website_id: &str,
            _range: &DateRange,
            _kind: MetricKind,
            _limit: u32,
        ) -> Result<Vec<MetricItem>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_publishes_snapshots_every_interval() {
        let provider = Arc::new(CountingProvider::default());
        let poller = RealtimePoller::spawn(provider.clone(), "w1".to_string());

        // t=0, t=10, t=20.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(provider.polls.load(Ordering::SeqCst), 3);
        let latest = poller.latest().expect("snapshot published");
        assert_eq!(latest.active_visitors, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_all_further_polling() {
        let provider = Arc::new(CountingProvider::default());
        let poller = RealtimePoller::spawn(provider.clone(), "w1".to_string());

        tokio::time::sleep(Duration::from_secs(15)).await;
        poller.cancel();
        // Let the cancellation land before sampling the count.
        tokio::time::sleep(Duration::from_millis(1)).await;
        let after_cancel = provider.polls.load(Ordering::SeqCst);
        assert!(after_cancel >= 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(provider.polls.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_observe_updates() {
        let provider = Arc::new(CountingProvider::default());
        let poller = RealtimePoller::spawn(provider, "w1".to_string());
        let mut rx = poller.subscribe();

        rx.changed().await.expect("first update");
        let first = rx.borrow_and_update().clone().expect("snapshot");
        assert_eq!(first.active_visitors, Some(1));
    }
}
