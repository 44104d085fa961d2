//! Analytics provider abstraction.
//!
//! The single seam between the app and the two vendor APIs. Adapters do
//! normalization only — no caching, no scheduling, no business logic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    account::Credentials,
    daterange::DateRange,
    error::ProviderError,
    model::{ChartPoint, MetricItem, ProviderType, RealtimeSnapshot, Stats, Website},
};

/// Dimension of a ranked breakdown. Adapters support a subset; unsupported
/// kinds fail with [`ProviderError::UnsupportedMetric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Path,
    Referrer,
    Browser,
    Os,
    Device,
    Country,
    Region,
    City,
    Language,
    Screen,
    Event,
    Query,
    Title,
    Hostname,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Path => "path",
            MetricKind::Referrer => "referrer",
            MetricKind::Browser => "browser",
            MetricKind::Os => "os",
            MetricKind::Device => "device",
            MetricKind::Country => "country",
            MetricKind::Region => "region",
            MetricKind::City => "city",
            MetricKind::Language => "language",
            MetricKind::Screen => "screen",
            MetricKind::Event => "event",
            MetricKind::Query => "query",
            MetricKind::Title => "title",
            MetricKind::Hostname => "hostname",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which series a chart request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesMetric {
    Pageviews,
    Visitors,
}

/// Capability contract implemented by the Umami and Plausible adapters.
///
/// One adapter instance serves exactly one account. Instances are configured
/// once at account-creation time and are not shared across two concurrently
/// active accounts of the same provider type — authentication state
/// (`is_authenticated`, the bearer token) is adapter-local.
#[async_trait::async_trait]
pub trait AnalyticsProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn server_url(&self) -> String;

    fn is_authenticated(&self) -> bool;

    /// Opaque credential material held after authentication, surfaced so the
    /// caller can persist it. None while unauthenticated.
    fn session_secret(&self) -> Option<String> {
        None
    }

    /// Fails with [`ProviderError::Auth`] on bad credentials and
    /// [`ProviderError::Network`] on transport failure.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ProviderError>;

    async fn websites(&self) -> Result<Vec<Website>, ProviderError>;

    /// Fetch stats for the range together with the server-side comparison
    /// period in one logical call, so callers never pay two sequential
    /// round trips.
    async fn stats(&self, website_id: &str, range: &DateRange) -> Result<Stats, ProviderError>;

    /// Time series for the range, sorted ascending by date.
    async fn series(
        &self,
        website_id: &str,
        range: &DateRange,
        metric: SeriesMetric,
    ) -> Result<Vec<ChartPoint>, ProviderError>;

    async fn active_visitors(&self, website_id: &str) -> Result<u64, ProviderError>;

    /// Near-live snapshot. Sections the vendor does not expose are omitted
    /// rather than failing the call.
    async fn realtime(&self, website_id: &str) -> Result<RealtimeSnapshot, ProviderError>;

    /// Ranked breakdown rows, sorted descending by value.
    async fn metric_breakdown(
        &self,
        website_id: &str,
        range: &DateRange,
        kind: MetricKind,
        limit: u32,
    ) -> Result<Vec<MetricItem>, ProviderError>;
}
