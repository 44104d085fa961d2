//! Secret store capability.
//!
//! Credential storage itself (keychain, OS secret service, …) is an external
//! collaborator; the core only depends on this save/load/delete surface.
//! Keys are namespaced per account so two accounts of the same provider
//! never collide.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKey {
    ServerUrl,
    Token,
    ApiKey,
    Username,
    ProviderType,
    ServerType,
}

impl SecretKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKey::ServerUrl => "server_url",
            SecretKey::Token => "token",
            SecretKey::ApiKey => "api_key",
            SecretKey::Username => "username",
            SecretKey::ProviderType => "provider_type",
            SecretKey::ServerType => "server_type",
        }
    }
}

#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    async fn save(&self, account_id: &str, key: SecretKey, value: &str) -> anyhow::Result<()>;

    /// Absent keys are `None`, never an error.
    async fn load(&self, account_id: &str, key: SecretKey) -> Option<String>;

    async fn delete(&self, account_id: &str, key: SecretKey);

    /// Remove every secret stored for the account.
    async fn delete_all(&self, account_id: &str);
}
