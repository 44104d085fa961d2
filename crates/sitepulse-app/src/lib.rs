//! Application layer: account registry, notification scheduling, realtime
//! polling and the cached fetch paths that tie the provider adapters to the
//! offline cache.

pub mod delivery;
pub mod digest;
pub mod realtime;
pub mod registry;
pub mod scheduler;
pub mod secrets;
pub mod settings;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;
