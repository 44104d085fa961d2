//! Default secret-store implementations.
//!
//! Real deployments wire an OS keychain behind the [`SecretStore`] trait.
//! `FileSecretStore` is the stand-in used by the headless binary: a JSON
//! document in the data dir, file-permission protected. `InMemorySecretStore`
//! backs tests and throwaway sessions.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use sitepulse_core::secrets::{SecretKey, SecretStore};

fn entry_key(account_id: &str, key: SecretKey) -> String {
    format!("{account_id}/{}", key.as_str())
}

pub struct FileSecretStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileSecretStore {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("secrets.json");
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        restrict_permissions(&tmp);
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[async_trait::async_trait]
impl SecretStore for FileSecretStore {
    async fn save(&self, account_id: &str, key: SecretKey, value: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(entry_key(account_id, key), value.to_string());
        self.persist(&entries)
    }

    async fn load(&self, account_id: &str, key: SecretKey) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(&entry_key(account_id, key))
            .cloned()
    }

    async fn delete(&self, account_id: &str, key: SecretKey) {
        let mut entries = self.entries.lock().await;
        entries.remove(&entry_key(account_id, key));
        let _ = self.persist(&entries);
    }

    async fn delete_all(&self, account_id: &str) {
        let prefix = format!("{account_id}/");
        let mut entries = self.entries.lock().await;
        entries.retain(|k, _| !k.starts_with(&prefix));
        let _ = self.persist(&entries);
    }
}

#[derive(Default)]
pub struct InMemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SecretStore for InMemorySecretStore {
    async fn save(&self, account_id: &str, key: SecretKey, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .await
            .insert(entry_key(account_id, key), value.to_string());
        Ok(())
    }

    async fn load(&self, account_id: &str, key: SecretKey) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(&entry_key(account_id, key))
            .cloned()
    }

    async fn delete(&self, account_id: &str, key: SecretKey) {
        self.entries.lock().await.remove(&entry_key(account_id, key));
    }

    async fn delete_all(&self, account_id: &str) {
        let prefix = format!("{account_id}/");
        self.entries
            .lock()
            .await
            .retain(|k, _| !k.starts_with(&prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_data_dir() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("unix time")
            .as_nanos();
        std::env::temp_dir().join(format!("sitepulse-secrets-{nanos}"))
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let dir = unique_data_dir();
        {
            let store = FileSecretStore::open(&dir).expect("open");
            store
                .save("acc", SecretKey::Token, "tok-1")
                .await
                .expect("save");
        }
        let reopened = FileSecretStore::open(&dir).expect("reopen");
        assert_eq!(
            reopened.load("acc", SecretKey::Token).await.as_deref(),
            Some("tok-1")
        );
    }

    #[tokio::test]
    async fn delete_all_clears_one_account_only() {
        let store = InMemorySecretStore::new();
        store.save("a", SecretKey::Token, "t1").await.expect("save");
        store.save("a", SecretKey::ServerUrl, "u1").await.expect("save");
        store.save("b", SecretKey::Token, "t2").await.expect("save");

        store.delete_all("a").await;
        assert!(store.load("a", SecretKey::Token).await.is_none());
        assert!(store.load("a", SecretKey::ServerUrl).await.is_none());
        assert_eq!(store.load("b", SecretKey::Token).await.as_deref(), Some("t2"));
    }
}
