//! Account registry.
//!
//! Holds every authenticated account together with its provider adapter.
//! Adapters are instantiated once per account at configuration time — the
//! registry stores the capability interface, never a provider tag that gets
//! re-inspected per call — and two accounts of the same provider type get
//! two independent adapter instances.
//!
//! Account metadata is persisted to `accounts.json`; credentials go to the
//! secret store only. Cache purging and trigger rescheduling after a removal
//! are sequenced by the caller (see `AppState`), keeping the registry free
//! of side effects on unrelated subsystems.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use sitepulse_core::{
    account::{Account, Credentials},
    model::{ProviderType, Website},
    provider::AnalyticsProvider,
    secrets::{SecretKey, SecretStore},
    transport::Transport,
};
use sitepulse_providers::{PlausibleProvider, UmamiProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    AccountAdded(String),
    AccountRemoved(String),
    /// Emitted after the last account is removed so session state can
    /// reconcile to "logged out" without polling.
    AllAccountsRemoved,
}

struct AccountEntry {
    account: Account,
    provider: Arc<dyn AnalyticsProvider>,
}

pub struct Registry {
    path: PathBuf,
    secrets: Arc<dyn SecretStore>,
    transport: Arc<dyn Transport>,
    entries: RwLock<Vec<AccountEntry>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    /// Load persisted accounts and rebuild their adapters from stored
    /// secrets. An account whose adapter cannot be rebuilt is skipped with a
    /// warning rather than failing the whole registry.
    pub async fn load(
        data_dir: &Path,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("accounts.json");
        let accounts: Vec<Account> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(error = %err, "accounts document corrupt; starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        let mut entries = Vec::with_capacity(accounts.len());
        for account in accounts {
            match restore_adapter(&transport, secrets.as_ref(), &account).await {
                Ok(provider) => entries.push(AccountEntry { account, provider }),
                Err(err) => {
                    warn!(account = %account.id, error = %err, "skipping account with unusable adapter");
                }
            }
        }

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            path,
            secrets,
            transport,
            entries: RwLock::new(entries),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.entries
            .read()
            .await
            .iter()
            .map(|entry| entry.account.clone())
            .collect()
    }

    pub async fn provider_for(&self, account_id: &str) -> Option<Arc<dyn AnalyticsProvider>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.account.id == account_id)
            .map(|entry| entry.provider.clone())
    }

    /// Resolve which account and adapter handle a given site.
    pub async fn website_provider(
        &self,
        website_id: &str,
    ) -> Option<(Account, Arc<dyn AnalyticsProvider>)> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| {
                entry
                    .account
                    .sites
                    .as_deref()
                    .is_some_and(|sites| sites.iter().any(|site| site.id == website_id))
            })
            .map(|entry| (entry.account.clone(), entry.provider.clone()))
    }

    /// Authenticate against the server and, on success, persist the account
    /// and its secrets. Authentication errors propagate — login is a
    /// user-facing action.
    pub async fn add_account(
        &self,
        name: &str,
        server_url: &str,
        provider_type: ProviderType,
        credentials: Credentials,
    ) -> anyhow::Result<Account> {
        let account_id = Uuid::new_v4().to_string();
        let provider = configure_adapter(&self.transport, server_url, provider_type)?;
        provider
            .authenticate(&credentials)
            .await
            .context("authentication failed")?;

        // Site list fetch is best-effort; login should not fail because the
        // list endpoint hiccuped.
        let sites = match provider.websites().await {
            Ok(sites) => Some(sites),
            Err(err) => {
                warn!(error = %err, "could not fetch site list during login");
                None
            }
        };

        self.persist_secrets(&account_id, server_url, provider_type, &credentials, provider.as_ref())
            .await?;

        let account = Account {
            id: account_id.clone(),
            name: name.to_string(),
            server_url: server_url.to_string(),
            provider: provider_type,
            sites,
        };

        {
            let mut entries = self.entries.write().await;
            entries.push(AccountEntry {
                account: account.clone(),
                provider,
            });
            self.persist(&entries)?;
        }
        info!(account = %account_id, provider = provider_type.as_str(), "account added");
        let _ = self.events.send(RegistryEvent::AccountAdded(account_id));
        Ok(account)
    }

    /// Remove the account and its secrets. Returns the removed account so
    /// the caller can purge caches and reschedule notifications for its
    /// sites.
    pub async fn remove_account(&self, account_id: &str) -> anyhow::Result<Option<Account>> {
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            let mut removed = None;
            entries.retain(|entry| {
                if entry.account.id == account_id {
                    removed = Some(entry.account.clone());
                    false
                } else {
                    true
                }
            });
            if entries.len() != before {
                self.persist(&entries)?;
            }
            removed
        };

        if let Some(account) = &removed {
            self.secrets.delete_all(account_id).await;
            info!(account = %account_id, "account removed");
            let _ = self
                .events
                .send(RegistryEvent::AccountRemoved(account_id.to_string()));
            if self.entries.read().await.is_empty() {
                let _ = self.events.send(RegistryEvent::AllAccountsRemoved);
            }
            return Ok(Some(account.clone()));
        }
        Ok(None)
    }

    /// Re-fetch the site list for an account and persist it.
    pub async fn refresh_sites(&self, account_id: &str) -> anyhow::Result<Vec<Website>> {
        let provider = self
            .provider_for(account_id)
            .await
            .with_context(|| format!("unknown account {account_id}"))?;
        let sites = provider.websites().await?;
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.account.id == account_id) {
            entry.account.sites = Some(sites.clone());
            self.persist(&entries)?;
        }
        Ok(sites)
    }

    async fn persist_secrets(
        &self,
        account_id: &str,
        server_url: &str,
        provider_type: ProviderType,
        credentials: &Credentials,
        provider: &dyn AnalyticsProvider,
    ) -> anyhow::Result<()> {
        self.secrets
            .save(account_id, SecretKey::ServerUrl, server_url)
            .await?;
        self.secrets
            .save(account_id, SecretKey::ProviderType, provider_type.as_str())
            .await?;
        match credentials {
            Credentials::UsernamePassword { username, .. } => {
                self.secrets
                    .save(account_id, SecretKey::Username, username)
                    .await?;
                // The session token, not the password, is what gets stored.
                if let Some(token) = provider.session_secret() {
                    self.secrets.save(account_id, SecretKey::Token, &token).await?;
                }
            }
            Credentials::ApiKey { key } => {
                self.secrets.save(account_id, SecretKey::ApiKey, key).await?;
            }
        }
        Ok(())
    }

    fn persist(&self, entries: &[AccountEntry]) -> anyhow::Result<()> {
        let accounts: Vec<&Account> = entries.iter().map(|entry| &entry.account).collect();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&accounts)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn configure_adapter(
    transport: &Arc<dyn Transport>,
    server_url: &str,
    provider_type: ProviderType,
) -> anyhow::Result<Arc<dyn AnalyticsProvider>> {
    let adapter: Arc<dyn AnalyticsProvider> = match provider_type {
        ProviderType::Umami => Arc::new(UmamiProvider::new(transport.clone(), server_url)?),
        ProviderType::Plausible => Arc::new(PlausibleProvider::new(transport.clone(), server_url)?),
    };
    Ok(adapter)
}

/// Rebuild an adapter from persisted secrets; used at startup and by the
/// detached fire-now path.
async fn restore_adapter(
    transport: &Arc<dyn Transport>,
    secrets: &dyn SecretStore,
    account: &Account,
) -> anyhow::Result<Arc<dyn AnalyticsProvider>> {
    let adapter: Arc<dyn AnalyticsProvider> = match account.provider {
        ProviderType::Umami => match secrets.load(&account.id, SecretKey::Token).await {
            Some(token) => Arc::new(UmamiProvider::with_token(
                transport.clone(),
                &account.server_url,
                &token,
            )?),
            None => Arc::new(UmamiProvider::new(transport.clone(), &account.server_url)?),
        },
        ProviderType::Plausible => match secrets.load(&account.id, SecretKey::ApiKey).await {
            Some(key) => Arc::new(PlausibleProvider::with_key(
                transport.clone(),
                &account.server_url,
                &key,
            )?),
            None => Arc::new(PlausibleProvider::new(
                transport.clone(),
                &account.server_url,
            )?),
        },
    };
    Ok(adapter)
}
