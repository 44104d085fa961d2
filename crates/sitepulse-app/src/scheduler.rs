//! Notification scheduling.
//!
//! Every pass rebuilds the full trigger set from scratch: cancel everything,
//! then register one recurring trigger per enabled site. Rebuilding is what
//! makes the pass idempotent, so callers can invoke it after any settings or
//! account change without tracking deltas.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use sitepulse_core::daterange::DateRange;
use sitepulse_core::model::Website;
use sitepulse_core::notify::{
    NotificationContent, NotificationDelivery, NotificationSetting, TriggerSpec,
};
use sitepulse_core::provider::AnalyticsProvider;
use sitepulse_core::secrets::SecretStore;
use sitepulse_core::transport::Transport;

use crate::digest::{digest_body, digest_title, effective_range, UNAVAILABLE_BODY};
use crate::registry::Registry;
use crate::settings::{NotificationSettings, SettingsStore};

pub struct Scheduler {
    registry: Arc<Registry>,
    settings: SettingsStore,
    delivery: Arc<dyn NotificationDelivery>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        settings: SettingsStore,
        delivery: Arc<dyn NotificationDelivery>,
    ) -> Self {
        Self {
            registry,
            settings,
            delivery,
        }
    }

    /// Rebuild the trigger set. Returns the number of registered triggers.
    ///
    /// With no site enabled this cancels and returns without touching the
    /// permission state, so a user who disabled everything never sees a
    /// permission prompt. A failed stats fetch still registers the trigger
    /// with a fallback body; one transient failure must not silence a site.
    pub async fn reschedule(&self) -> usize {
        self.delivery.cancel_all().await;
        let settings = self.settings.load();
        if !settings.any_enabled() {
            return 0;
        }
        if !self.delivery.permission_granted().await {
            info!("notification permission not granted; leaving triggers cancelled");
            return 0;
        }

        let mut registered = 0;
        for account in self.registry.accounts().await {
            let Some(provider) = self.registry.provider_for(&account.id).await else {
                continue;
            };
            for site in account.sites.as_deref().unwrap_or(&[]) {
                let setting = settings.setting_for(&account.id, &site.id);
                let Some(range) = effective_range(setting, settings.data_source, settings.hour)
                else {
                    continue;
                };
                let content =
                    build_digest(provider.as_ref(), site, setting, &range).await;
                let trigger = trigger_for(setting, &settings);
                let id = format!("scheduled-{}-{}", account.id, site.id);
                match self.delivery.register_recurring(&id, trigger, content).await {
                    Ok(()) => registered += 1,
                    Err(err) => {
                        warn!(id, error = %err, "could not register notification trigger")
                    }
                }
            }
        }
        info!(registered, "notification triggers rebuilt");
        registered
    }
}

fn trigger_for(setting: NotificationSetting, settings: &NotificationSettings) -> TriggerSpec {
    match setting {
        NotificationSetting::Weekly => TriggerSpec::WeeklyMonday {
            hour: settings.hour,
            minute: settings.minute,
        },
        _ => TriggerSpec::Daily {
            hour: settings.hour,
            minute: settings.minute,
        },
    }
}

async fn build_digest(
    provider: &dyn AnalyticsProvider,
    site: &Website,
    setting: NotificationSetting,
    range: &DateRange,
) -> NotificationContent {
    let title = digest_title(&site.name, setting);
    match provider.stats(&site.id, range).await {
        Ok(stats) => NotificationContent {
            title,
            body: digest_body(&stats),
        },
        Err(err) => {
            warn!(website = %site.id, error = %err, "stats fetch for digest failed");
            NotificationContent {
                title,
                body: UNAVAILABLE_BODY.to_string(),
            }
        }
    }
}

/// Deliver today's digests immediately, rebuilding all state from disk.
///
/// This path runs in a detached invocation that shares nothing with a
/// possibly-running main process, so accounts, adapters and settings come
/// from persisted storage only. Returns the number of delivered digests.
pub async fn fire_now(
    data_dir: &Path,
    secrets: Arc<dyn SecretStore>,
    transport: Arc<dyn Transport>,
    delivery: Arc<dyn NotificationDelivery>,
) -> anyhow::Result<usize> {
    let registry = Registry::load(data_dir, secrets, transport).await?;
    let settings = SettingsStore::new(data_dir).load();
    if !settings.any_enabled() {
        return Ok(0);
    }

    let mut delivered = 0;
    for account in registry.accounts().await {
        let Some(provider) = registry.provider_for(&account.id).await else {
            continue;
        };
        for site in account.sites.as_deref().unwrap_or(&[]) {
            let setting = settings.setting_for(&account.id, &site.id);
            let Some(range) = effective_range(setting, settings.data_source, settings.hour)
            else {
                continue;
            };
            let content = build_digest(provider.as_ref(), site, setting, &range).await;
            match delivery.deliver_now(content).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(website = %site.id, error = %err, "delivery failed"),
            }
        }
    }
    Ok(delivered)
}

pub async fn run_scheduler_loop(scheduler: Arc<Scheduler>, tick_seconds: u64) {
    info!(tick_seconds, "notification scheduler started");
    let mut interval = tokio::time::interval(Duration::from_secs(tick_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        scheduler.reschedule().await;
    }
}
