//! Persisted notification settings.
//!
//! The settings document lives on disk rather than in a process singleton
//! because the fire-now path may run in a detached invocation that never
//! initialized the in-memory managers. Per-site settings are keyed by
//! `{account_id}:{website_id}` — website ids alone are not unique across
//! providers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use sitepulse_core::notify::{NotificationDataSource, NotificationSetting};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub hour: u32,
    pub minute: u32,
    /// Process-wide "which day's data" policy; per-site overrides do not
    /// exist by design.
    pub data_source: NotificationDataSource,
    sites: HashMap<String, NotificationSetting>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            hour: 9,
            minute: 0,
            data_source: NotificationDataSource::default(),
            sites: HashMap::new(),
        }
    }
}

fn site_key(account_id: &str, website_id: &str) -> String {
    format!("{account_id}:{website_id}")
}

impl NotificationSettings {
    pub fn setting_for(&self, account_id: &str, website_id: &str) -> NotificationSetting {
        self.sites
            .get(&site_key(account_id, website_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_setting(
        &mut self,
        account_id: &str,
        website_id: &str,
        setting: NotificationSetting,
    ) {
        let key = site_key(account_id, website_id);
        if setting == NotificationSetting::Disabled {
            // Disabled is the default; storing it would only grow the map.
            self.sites.remove(&key);
        } else {
            self.sites.insert(key, setting);
        }
    }

    pub fn remove_account(&mut self, account_id: &str) {
        let prefix = format!("{account_id}:");
        self.sites.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn any_enabled(&self) -> bool {
        !self.sites.is_empty()
    }
}

/// File-backed settings store. Load never fails: a missing or corrupt
/// document yields defaults.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("notification-settings.json"),
        }
    }

    pub fn load(&self) -> NotificationSettings {
        let Ok(bytes) = fs::read(&self.path) else {
            return NotificationSettings::default();
        };
        match serde_json::from_slice(&bytes) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "settings document corrupt; using defaults");
                NotificationSettings::default()
            }
        }
    }

    pub fn save(&self, settings: &NotificationSettings) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(settings)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
