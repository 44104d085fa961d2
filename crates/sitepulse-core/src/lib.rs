pub mod account;
pub mod config;
pub mod daterange;
pub mod error;
pub mod model;
pub mod notify;
pub mod provider;
pub mod secrets;
pub mod transport;
