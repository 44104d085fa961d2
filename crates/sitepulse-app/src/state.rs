//! Application state: the cached fetch paths and the cross-subsystem
//! command sequences.
//!
//! Fetches are cache-first. A fresh entry short-circuits the network; a
//! successful fetch refreshes the entry; a failed fetch falls back to the
//! stale entry when one exists, so the dashboard keeps rendering offline.
//!
//! Account removal is an explicit sequence here rather than a side effect of
//! observing registry state: remove from the registry, purge that account's
//! notification settings, purge its cache entries, then reschedule. Each
//! step is inspectable and nothing happens twice.

use std::sync::Arc;

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use sitepulse_cache::{CacheKey, CacheKind, OfflineCache, SharedProjection, SharedSnapshot};
use sitepulse_core::config::Config;
use sitepulse_core::daterange::DateRange;
use sitepulse_core::model::{ChartPoint, MetricItem, ProviderType, Stats, Website};
use sitepulse_core::notify::{NotificationDelivery, NotificationSetting};
use sitepulse_core::provider::{MetricKind, SeriesMetric};
use sitepulse_core::secrets::{SecretKey, SecretStore};
use sitepulse_core::transport::Transport;
use sitepulse_providers::titles::pair_titles;

use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::settings::SettingsStore;

pub struct AppState {
    registry: Arc<Registry>,
    cache: Arc<OfflineCache>,
    shared: SharedProjection,
    secrets: Arc<dyn SecretStore>,
    settings: SettingsStore,
    scheduler: Arc<Scheduler>,
}

impl AppState {
    pub async fn new(
        config: &Config,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn Transport>,
        delivery: Arc<dyn NotificationDelivery>,
    ) -> anyhow::Result<Self> {
        let registry =
            Arc::new(Registry::load(&config.data_dir, secrets.clone(), transport).await?);
        let cache = Arc::new(OfflineCache::open(&config.cache_dir)?);
        let shared = SharedProjection::open(&config.shared_dir)?;
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            SettingsStore::new(&config.data_dir),
            delivery,
        ));
        Ok(Self {
            registry,
            cache,
            shared,
            secrets,
            settings: SettingsStore::new(&config.data_dir),
            scheduler,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<OfflineCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Website list for an account, cache-first. A successful fetch also
    /// updates the account's persisted site list.
    pub async fn websites(&self, account_id: &str) -> anyhow::Result<Vec<Website>> {
        let key = CacheKey::for_account(CacheKind::Websites, account_id);
        self.cached(key, self.registry.refresh_sites(account_id))
            .await
    }

    pub async fn stats(&self, website_id: &str, range: &DateRange) -> anyhow::Result<Stats> {
        let (account, provider) = self.resolve(website_id).await?;
        let key = CacheKey::for_website(CacheKind::Stats, &account.id, website_id, range);
        self.cached(key, async {
            provider
                .stats(website_id, range)
                .await
                .map_err(anyhow::Error::from)
        })
        .await
    }

    pub async fn sparkline(
        &self,
        website_id: &str,
        range: &DateRange,
        metric: SeriesMetric,
    ) -> anyhow::Result<Vec<ChartPoint>> {
        let (account, provider) = self.resolve(website_id).await?;
        let subtype = match metric {
            SeriesMetric::Pageviews => "pageviews",
            SeriesMetric::Visitors => "visitors",
        };
        let key = CacheKey::for_website(CacheKind::Sparkline, &account.id, website_id, range)
            .with_subtype(subtype);
        self.cached(key, async {
            provider
                .series(website_id, range, metric)
                .await
                .map_err(anyhow::Error::from)
        })
        .await
    }

    pub async fn metric_breakdown(
        &self,
        website_id: &str,
        range: &DateRange,
        kind: MetricKind,
        limit: u32,
    ) -> anyhow::Result<Vec<MetricItem>> {
        let (account, provider) = self.resolve(website_id).await?;
        let key = CacheKey::for_website(CacheKind::Metrics, &account.id, website_id, range)
            .with_subtype(kind.as_str());
        self.cached(key, async {
            provider
                .metric_breakdown(website_id, range, kind, limit)
                .await
                .map_err(anyhow::Error::from)
        })
        .await
    }

    /// Ranked pages with display titles attached. Titles come from a
    /// separate breakdown with no join key, so attachment is a best-effort
    /// pairing by view count; a page keeps `None` when nothing pairs. A
    /// backend without a title dimension yields paths with no titles.
    pub async fn pages_with_titles(
        &self,
        website_id: &str,
        range: &DateRange,
        limit: u32,
    ) -> anyhow::Result<Vec<(MetricItem, Option<String>)>> {
        let paths = self
            .metric_breakdown(website_id, range, MetricKind::Path, limit)
            .await?;
        let titles = match self
            .metric_breakdown(website_id, range, MetricKind::Title, limit)
            .await
        {
            Ok(titles) => titles,
            Err(err) => {
                warn!(website = %website_id, error = %err, "title breakdown unavailable");
                Vec::new()
            }
        };
        Ok(pair_titles(&paths, &titles))
    }

    /// Change one site's notification cadence and rebuild the trigger set.
    pub async fn set_notification_setting(
        &self,
        account_id: &str,
        website_id: &str,
        setting: NotificationSetting,
    ) -> anyhow::Result<()> {
        let mut settings = self.settings.load();
        settings.set_setting(account_id, website_id, setting);
        self.settings.save(&settings)?;
        self.scheduler.reschedule().await;
        Ok(())
    }

    /// Remove an account and everything derived from it.
    pub async fn remove_account(&self, account_id: &str) -> anyhow::Result<()> {
        let Some(account) = self.registry.remove_account(account_id).await? else {
            return Ok(());
        };

        let mut settings = self.settings.load();
        settings.remove_account(account_id);
        if let Err(err) = self.settings.save(&settings) {
            warn!(account = %account_id, error = %err, "could not persist settings purge");
        }

        for site in account.sites.unwrap_or_default() {
            self.cache.clear_for_website(&site.id);
        }
        self.cache
            .delete(&CacheKey::for_account(CacheKind::Websites, account_id));

        if self.registry.accounts().await.is_empty() {
            // Last account gone; nothing may survive for the widget to read.
            self.shared.clear();
            self.cache.clear_all();
        }

        self.scheduler.reschedule().await;
        Ok(())
    }

    /// Publish the widget's view of the current selection. The secret goes
    /// through the store, never through the adapter's in-memory copy, so the
    /// projection matches what a fresh process would see.
    pub async fn project_to_widget(
        &self,
        account_id: &str,
        website_id: Option<&str>,
        time_range: Option<DateRange>,
    ) -> anyhow::Result<()> {
        let account = self
            .registry
            .accounts()
            .await
            .into_iter()
            .find(|account| account.id == account_id)
            .with_context(|| format!("unknown account {account_id}"))?;

        let secret_key = match account.provider {
            ProviderType::Umami => SecretKey::Token,
            ProviderType::Plausible => SecretKey::ApiKey,
        };
        let token = self
            .secrets
            .load(account_id, secret_key)
            .await
            .unwrap_or_default();

        let website_name = website_id.and_then(|id| {
            account
                .sites
                .as_deref()
                .and_then(|sites| sites.iter().find(|site| site.id == id))
                .map(|site| site.name.clone())
        });

        self.shared.write(&SharedSnapshot {
            server_url: account.server_url.clone(),
            token,
            provider_type: account.provider,
            website_id: website_id.map(str::to_string),
            website_name,
            time_range,
            sites: account.sites.clone(),
        })?;
        Ok(())
    }

    /// Evict entries past their TTL. Returns how many were removed.
    pub fn sweep_cache(&self) -> usize {
        self.cache.clear_expired()
    }

    async fn resolve(
        &self,
        website_id: &str,
    ) -> anyhow::Result<(
        sitepulse_core::account::Account,
        Arc<dyn sitepulse_core::provider::AnalyticsProvider>,
    )> {
        self.registry
            .website_provider(website_id)
            .await
            .with_context(|| format!("no account owns website {website_id}"))
    }

    async fn cached<T>(
        &self,
        key: CacheKey,
        fetch: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let stale = match self.cache.load::<T>(&key) {
            Some(entry) if !entry.is_expired() => return Ok(entry.data),
            other => other,
        };
        match fetch.await {
            Ok(value) => {
                if let Err(err) = self.cache.save(&key, &value) {
                    warn!(key = %key, error = %err, "could not write cache entry");
                }
                Ok(value)
            }
            Err(err) => match stale {
                Some(entry) => {
                    warn!(key = %key, error = %err, "fetch failed; serving stale cache entry");
                    Ok(entry.data)
                }
                None => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::LogDelivery;
    use crate::secrets::InMemorySecretStore;
    use crate::settings::NotificationSettings;
    use crate::testutil::{unique_data_dir, MockTransport};
    use sitepulse_core::account::Credentials;
    use sitepulse_core::model::ProviderType;
    use std::path::Path;

    const LOGIN_OK: &str = r#"{"token":"tok-umami","user":{"id":"u1"}}"#;
    const SITES_OK: &str = r#"{"data":[{"id":"w1","name":"Blog","domain":"blog.example.com"}]}"#;
    const STATS_OK: &str = r#"{
        "pageviews":{"value":479,"prev":600},
        "visitors":{"value":120,"prev":100},
        "visits":{"value":150,"prev":150},
        "bounces":{"value":30,"prev":28},
        "totaltime":{"value":9000,"prev":8800}
    }"#;

    fn test_config(base: &Path) -> Config {
        Config {
            data_dir: base.to_path_buf(),
            cache_dir: base.join("cache"),
            shared_dir: base.join("shared"),
            request_timeout_secs: 15,
            scheduler_tick_seconds: 60,
        }
    }

    struct Fixture {
        config: Config,
        state: AppState,
        account_id: String,
        mock: Arc<MockTransport>,
        delivery: Arc<LogDelivery>,
    }

    async fn fixture(tag: &str) -> Fixture {
        let base = unique_data_dir(tag);
        let config = test_config(&base);
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/auth/login", 200, LOGIN_OK);
        mock.respond("limit=200", 200, SITES_OK);
        let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::new());
        let delivery = Arc::new(LogDelivery::new());
        let state = AppState::new(&config, secrets, mock.clone(), delivery.clone())
            .await
            .expect("app state");
        let account = state
            .registry()
            .add_account(
                "Personal",
                "https://stats.example.com",
                ProviderType::Umami,
                Credentials::UsernamePassword {
                    username: "admin".to_string(),
                    password: "umami".to_string(),
                },
            )
            .await
            .expect("add account");
        Fixture {
            config,
            state,
            account_id: account.id,
            mock,
            delivery,
        }
    }

    fn stats_requests(mock: &MockTransport) -> usize {
        mock.requested_urls()
            .iter()
            .filter(|url| url.contains("/stats?"))
            .count()
    }

    #[tokio::test]
    async fn second_stats_fetch_is_served_from_cache() {
        let fx = fixture("state-cache").await;
        fx.mock.respond("/stats?", 200, STATS_OK);

        let first = fx.state.stats("w1", &DateRange::Today).await.expect("fetch");
        assert_eq!(first.visitors.value, 120);
        assert_eq!(stats_requests(&fx.mock), 1);

        let second = fx.state.stats("w1", &DateRange::Today).await.expect("cached");
        assert_eq!(second, first);
        assert_eq!(stats_requests(&fx.mock), 1, "no second network round trip");
    }

    #[tokio::test]
    async fn expired_entry_is_served_when_the_fetch_fails() {
        let fx = fixture("state-stale").await;
        // No canned /stats response, so every fetch fails. Plant an
        // already-expired entry the way a long-idle process would find one.
        let key = CacheKey::for_website(CacheKind::Stats, &fx.account_id, "w1", &DateRange::Today);
        let envelope = serde_json::json!({
            "cached_at": "2026-01-01T00:00:00Z",
            "expires_at": "2026-01-01T01:00:00Z",
            "data": {
                "visitors": {"value": 77, "change": 7},
                "pageviews": {"value": 200, "change": 0},
                "visits": {"value": 90, "change": 0},
                "bounces": {"value": 10, "change": 0},
                "total_time": {"value": 600, "change": 0}
            }
        });
        std::fs::write(
            fx.config.cache_dir.join(format!("{key}.json")),
            serde_json::to_vec(&envelope).expect("encode"),
        )
        .expect("plant entry");

        let stats = fx
            .state
            .stats("w1", &DateRange::Today)
            .await
            .expect("stale fallback");
        assert_eq!(stats.visitors.value, 77);
    }

    #[tokio::test]
    async fn fetch_failure_without_cache_propagates() {
        let fx = fixture("state-miss").await;
        assert!(fx.state.stats("w1", &DateRange::Today).await.is_err());
    }

    #[tokio::test]
    async fn remove_account_purges_settings_cache_and_triggers() {
        let fx = fixture("state-remove").await;
        fx.mock.respond("/stats?", 200, STATS_OK);

        fx.state
            .set_notification_setting(&fx.account_id, "w1", NotificationSetting::Daily)
            .await
            .expect("enable");
        assert_eq!(fx.delivery.pending_count().await, 1);
        fx.state.stats("w1", &DateRange::Today).await.expect("warm cache");
        assert!(fx.state.cache().size_bytes() > 0);

        fx.state.remove_account(&fx.account_id).await.expect("remove");

        assert!(fx.state.registry().accounts().await.is_empty());
        assert_eq!(fx.state.cache().size_bytes(), 0, "last account clears everything");
        assert_eq!(fx.delivery.pending_count().await, 0);
        let settings = SettingsStore::new(&fx.config.data_dir).load();
        assert_eq!(settings, NotificationSettings::default());
    }

    #[tokio::test]
    async fn widget_projection_round_trips_with_secret_from_store() {
        let fx = fixture("state-widget").await;
        fx.state
            .project_to_widget(&fx.account_id, Some("w1"), Some(DateRange::Last7Days))
            .await
            .expect("project");

        let projection = SharedProjection::open(&fx.config.shared_dir).expect("open");
        let snapshot = projection.read().expect("snapshot present");
        assert_eq!(snapshot.token, "tok-umami");
        assert_eq!(snapshot.provider_type, ProviderType::Umami);
        assert_eq!(snapshot.website_id.as_deref(), Some("w1"));
        assert_eq!(snapshot.website_name.as_deref(), Some("Blog"));
        assert_eq!(snapshot.time_range, Some(DateRange::Last7Days));
    }

    #[tokio::test]
    async fn pages_get_titles_paired_by_view_count() {
        let fx = fixture("state-titles").await;
        fx.mock.respond(
            "type=url",
            200,
            r#"[{"x":"/pricing","y":100},{"x":"/about","y":40}]"#,
        );
        fx.mock.respond(
            "type=title",
            200,
            r#"[{"x":"Pricing","y":100},{"x":"About us","y":40}]"#,
        );

        let pages = fx
            .state
            .pages_with_titles("w1", &DateRange::Today, 5)
            .await
            .expect("pages");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].0.name, "/pricing");
        assert_eq!(pages[0].1.as_deref(), Some("Pricing"));
        assert_eq!(pages[1].1.as_deref(), Some("About us"));
    }

    #[tokio::test]
    async fn missing_title_dimension_omits_titles_without_failing() {
        let base = unique_data_dir("state-notitles");
        let config = test_config(&base);
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/v1/sites", 200, r#"{"sites":[{"domain":"example.com"}]}"#);
        mock.respond(
            "event%3Apage",
            200,
            r#"{"results":[{"page":"/","visitors":31},{"page":"/pricing","visitors":9}]}"#,
        );
        let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::new());
        let state = AppState::new(&config, secrets, mock.clone(), Arc::new(LogDelivery::new()))
            .await
            .expect("app state");
        state
            .registry()
            .add_account(
                "Company",
                "https://plausible.example.com",
                ProviderType::Plausible,
                Credentials::ApiKey {
                    key: "key-123".to_string(),
                },
            )
            .await
            .expect("add account");

        // Plausible has no title dimension; the combined view must still
        // deliver the paths, just with no titles attached.
        let pages = state
            .pages_with_titles("example.com", &DateRange::Today, 5)
            .await
            .expect("paths load despite missing titles");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].0.name, "/");
        assert!(pages.iter().all(|(_, title)| title.is_none()));
    }

    #[tokio::test]
    async fn websites_listing_is_cached_account_wide() {
        let fx = fixture("state-sites").await;
        let sites = fx.state.websites(&fx.account_id).await.expect("listing");
        assert_eq!(sites.len(), 1);

        let listed_before = fx
            .mock
            .requested_urls()
            .iter()
            .filter(|url| url.contains("limit=200"))
            .count();
        let again = fx.state.websites(&fx.account_id).await.expect("cached");
        assert_eq!(again, sites);
        let listed_after = fx
            .mock
            .requested_urls()
            .iter()
            .filter(|url| url.contains("limit=200"))
            .count();
        assert_eq!(listed_before, listed_after, "served from cache");
    }
}
