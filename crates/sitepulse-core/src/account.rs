//! Account metadata and credentials.
//!
//! Metadata (`Account`) is persisted as plain JSON; credentials only ever
//! live in the secret store capability.

use serde::{Deserialize, Serialize};

use crate::model::{ProviderType, Website};

/// One authenticated analytics account. An account is bound to exactly one
/// provider adapter instance, configured at login time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub server_url: String,
    pub provider: ProviderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sites: Option<Vec<Website>>,
}

/// What an adapter needs to authenticate. Umami logs in with username and
/// password and holds a bearer token afterwards; Plausible uses a static
/// API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    UsernamePassword { username: String, password: String },
    ApiKey { key: String },
}
