//! Normalized analytics data model shared by both provider adapters.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Which backend a website or account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Umami,
    Plausible,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Umami => "umami",
            ProviderType::Plausible => "plausible",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "umami" => Some(ProviderType::Umami),
            "plausible" => Some(ProviderType::Plausible),
            _ => None,
        }
    }
}

/// A tracked website. `id` is unique only within one provider/account, so
/// cache keys and notification identifiers must carry the account scope too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    pub id: String,
    pub name: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    pub provider: ProviderType,
}

/// A metric value paired with its change against the prior comparable period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatValue {
    pub value: i64,
    pub change: i64,
}

impl StatValue {
    pub fn new(value: i64, change: i64) -> Self {
        Self { value, change }
    }

    /// Percentage change against the prior period; 0.0 when the prior period
    /// had no data (the denominator `value - change` is zero).
    pub fn change_percentage(&self) -> f64 {
        let previous = self.value - self.change;
        if previous == 0 {
            return 0.0;
        }
        self.change as f64 / previous as f64 * 100.0
    }

    /// Zero change counts as positive/neutral.
    pub fn is_positive_change(&self) -> bool {
        self.change >= 0
    }
}

/// Aggregate stats for one website over one resolved date range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub visitors: StatValue,
    pub pageviews: StatValue,
    pub visits: StatValue,
    pub bounces: StatValue,
    pub total_time: StatValue,
}

impl Stats {
    /// Bounced visits as a percentage of all visits, 0.0 when there are none.
    pub fn bounce_rate(&self) -> f64 {
        if self.visits.value == 0 {
            return 0.0;
        }
        self.bounces.value as f64 / self.visits.value as f64 * 100.0
    }

    /// Mean visit duration in seconds, 0.0 when there are no visits.
    pub fn average_time(&self) -> f64 {
        if self.visits.value == 0 {
            return 0.0;
        }
        self.total_time.value as f64 / self.visits.value as f64
    }
}

/// One point of a time series. Producers sort series ascending by `date`;
/// consumers may rely on that ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: NaiveDateTime,
    pub value: i64,
}

/// One row of a ranked dimension breakdown (path → views, country → visitors,
/// …). Descending order is a presentation concern; producers document it when
/// they guarantee it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricItem {
    pub name: String,
    pub value: i64,
}

/// Near-live activity snapshot. Every section is optional — an adapter omits
/// what its vendor API does not expose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_visitors: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countries: Option<Vec<MetricItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<MetricItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrers: Option<Vec<MetricItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<MetricItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<ChartPoint>>,
}
