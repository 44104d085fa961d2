//! Encrypted cross-process projection for the widget.
//!
//! The widget runs as a separate process with no access to the app's secret
//! store, so the app projects the minimum it needs (server, token, selected
//! site) into a shared directory. The file is ChaCha20-Poly1305 encrypted
//! with a random per-installation key stored alongside it; the key file
//! relies on file permissions, the data file does not.
//!
//! File layout: `widget.dat` = `nonce_12 || ciphertext`. Earlier releases
//! wrote plaintext `widget.json`; the read path still understands it and
//! migrates it to the encrypted form on first contact.

use std::fs;
use std::path::{Path, PathBuf};

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sitepulse_core::{
    daterange::DateRange,
    model::{ProviderType, Website},
};

use crate::store::atomic_write;
use crate::CacheError;

const DATA_FILE: &str = "widget.dat";
const KEY_FILE: &str = "widget.key";
const LEGACY_FILE: &str = "widget.json";
const NONCE_LEN: usize = 12;

/// The narrow projection the widget is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedSnapshot {
    pub server_url: String,
    pub token: String,
    pub provider_type: ProviderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sites: Option<Vec<Website>>,
}

pub struct SharedProjection {
    dir: PathBuf,
}

impl SharedProjection {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Encrypt and atomically replace the projection file.
    pub fn write(&self, snapshot: &SharedSnapshot) -> Result<(), CacheError> {
        let key = self.load_or_create_key()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let plaintext = serde_json::to_vec(snapshot)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| CacheError::Crypto(format!("encrypt failed: {e}")))?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        atomic_write(&self.dir.join(DATA_FILE), &framed)
    }

    /// Read the projection. Tries the encrypted file first, then the legacy
    /// plaintext file — which is migrated (re-written encrypted, deleted)
    /// the moment it is successfully read. Corrupt or missing data is `None`.
    pub fn read(&self) -> Option<SharedSnapshot> {
        if let Some(snapshot) = self.read_encrypted() {
            return Some(snapshot);
        }
        self.migrate_legacy()
    }

    pub fn clear(&self) {
        let _ = fs::remove_file(self.dir.join(DATA_FILE));
        let _ = fs::remove_file(self.dir.join(LEGACY_FILE));
    }

    fn read_encrypted(&self) -> Option<SharedSnapshot> {
        let framed = fs::read(self.dir.join(DATA_FILE)).ok()?;
        if framed.len() <= NONCE_LEN {
            return None;
        }
        let key = fs::read(self.dir.join(KEY_FILE)).ok()?;
        if key.len() != 32 {
            return None;
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
        let plaintext = match cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!("shared projection failed authentication; treating as absent");
                return None;
            }
        };
        serde_json::from_slice(&plaintext).ok()
    }

    fn migrate_legacy(&self) -> Option<SharedSnapshot> {
        let legacy_path = self.dir.join(LEGACY_FILE);
        let bytes = fs::read(&legacy_path).ok()?;
        let snapshot: SharedSnapshot = serde_json::from_slice(&bytes).ok()?;
        match self.write(&snapshot) {
            Ok(()) => {
                let _ = fs::remove_file(&legacy_path);
                info!("migrated legacy plaintext widget projection to encrypted format");
            }
            Err(err) => {
                // Keep the legacy file; the next read retries the migration.
                warn!(error = %err, "legacy projection migration failed");
            }
        }
        Some(snapshot)
    }

    fn load_or_create_key(&self) -> Result<Vec<u8>, CacheError> {
        let path = self.dir.join(KEY_FILE);
        if let Ok(key) = fs::read(&path) {
            if key.len() == 32 {
                return Ok(key);
            }
        }
        let mut key = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        atomic_write(&path, &key)?;
        restrict_permissions(&path);
        Ok(key)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_shared_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("unix time")
            .as_nanos();
        std::env::temp_dir().join(format!("sitepulse-shared-{tag}-{nanos}"))
    }

    fn sample_snapshot() -> SharedSnapshot {
        SharedSnapshot {
            server_url: "https://stats.example.com".to_string(),
            token: "tok-123".to_string(),
            provider_type: ProviderType::Umami,
            website_id: Some("w1".to_string()),
            website_name: Some("Blog".to_string()),
            time_range: Some(DateRange::Last7Days),
            sites: None,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let projection = SharedProjection::open(unique_shared_dir("roundtrip")).expect("open");
        projection.write(&sample_snapshot()).expect("write");
        assert_eq!(projection.read(), Some(sample_snapshot()));
    }

    #[test]
    fn data_file_is_not_plaintext() {
        let dir = unique_shared_dir("opaque");
        let projection = SharedProjection::open(&dir).expect("open");
        projection.write(&sample_snapshot()).expect("write");
        let raw = fs::read(dir.join(DATA_FILE)).expect("read raw");
        let raw_text = String::from_utf8_lossy(&raw);
        assert!(!raw_text.contains("tok-123"), "token must not appear in clear");
    }

    #[test]
    fn tampered_ciphertext_reads_as_absent() {
        let dir = unique_shared_dir("tamper");
        let projection = SharedProjection::open(&dir).expect("open");
        projection.write(&sample_snapshot()).expect("write");

        let mut raw = fs::read(dir.join(DATA_FILE)).expect("read raw");
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        fs::write(dir.join(DATA_FILE), &raw).expect("write tampered");

        assert_eq!(projection.read(), None, "authentication failure degrades to absent");
    }

    #[test]
    fn legacy_plaintext_file_is_migrated_on_read() {
        let dir = unique_shared_dir("legacy");
        let projection = SharedProjection::open(&dir).expect("open");
        fs::write(
            dir.join(LEGACY_FILE),
            serde_json::to_vec(&sample_snapshot()).expect("to vec"),
        )
        .expect("write legacy");

        let first = projection.read();
        assert_eq!(first, Some(sample_snapshot()), "legacy format still readable");
        assert!(!dir.join(LEGACY_FILE).exists(), "legacy file deleted after migration");
        assert!(dir.join(DATA_FILE).exists(), "encrypted replacement written");

        // Subsequent reads come from the encrypted file.
        assert_eq!(projection.read(), Some(sample_snapshot()));
    }

    #[test]
    fn missing_files_read_as_absent() {
        let projection = SharedProjection::open(unique_shared_dir("missing")).expect("open");
        assert_eq!(projection.read(), None);
    }
}
