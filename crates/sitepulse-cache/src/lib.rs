//! Offline cache for normalized provider responses, plus the encrypted
//! cross-process projection consumed by the widget.
//!
//! Cache failures never cross this crate's boundary as user-visible errors:
//! a failed load is a miss, a corrupt entry is removed and treated as absent.

use thiserror::Error;

pub mod key;
pub mod shared;
pub mod store;

pub use key::{CacheKey, CacheKind};
pub use shared::{SharedProjection, SharedSnapshot};
pub use store::{CacheEntry, OfflineCache};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("shared projection crypto error: {0}")]
    Crypto(String),
}
