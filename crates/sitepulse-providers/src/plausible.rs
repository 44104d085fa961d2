//! Plausible adapter.
//!
//! Plausible speaks key-auth REST (`Authorization: Bearer <api key>`) and has
//! no login endpoint — authentication is validated by listing sites. Its
//! aggregate endpoint does not return bounces or total time directly, so both
//! are derived from `bounce_rate` and `visit_duration`, and the comparison
//! period is a second aggregate request issued concurrently with the first.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Local, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use sitepulse_core::{
    account::Credentials,
    daterange::{ChartUnit, DateRange},
    error::ProviderError,
    model::{ChartPoint, MetricItem, ProviderType, RealtimeSnapshot, Stats, StatValue, Website},
    provider::{AnalyticsProvider, MetricKind, SeriesMetric},
    transport::{Method, Transport, TransportResponse},
};

use crate::timestamp::parse_timestamp;

pub struct PlausibleProvider {
    transport: Arc<dyn Transport>,
    base_url: Url,
    api_key: RwLock<Option<String>>,
}

impl PlausibleProvider {
    pub fn new(transport: Arc<dyn Transport>, server_url: &str) -> Result<Self, ProviderError> {
        let base_url = Url::parse(server_url)
            .map_err(|e| ProviderError::Decode(format!("invalid server url: {e}")))?;
        Ok(Self {
            transport,
            base_url,
            api_key: RwLock::new(None),
        })
    }

    /// Restore an adapter from a persisted API key without re-validating,
    /// for detached invocations.
    pub fn with_key(
        transport: Arc<dyn Transport>,
        server_url: &str,
        key: &str,
    ) -> Result<Self, ProviderError> {
        let provider = Self::new(transport, server_url)?;
        provider.set_key(Some(key.to_string()));
        Ok(provider)
    }

    pub fn api_key(&self) -> Option<String> {
        match self.api_key.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_key(&self, key: Option<String>) {
        match self.api_key.write() {
            Ok(mut guard) => *guard = key,
            Err(poisoned) => *poisoned.into_inner() = key,
        }
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ProviderError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ProviderError::Decode(format!("invalid endpoint {path}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(key) = self.api_key() {
            headers.push(("Authorization".to_string(), format!("Bearer {key}")));
        }
        headers
    }

    async fn get_json(&self, url: Url) -> Result<Value, ProviderError> {
        let response = self
            .transport
            .request(Method::Get, url.as_str(), &self.headers(), None)
            .await?;
        decode_json(response, url.as_str())
    }

    async fn aggregate(
        &self,
        website_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AggregateTotals, ProviderError> {
        let url = self.endpoint(
            "/api/v1/stats/aggregate",
            &[
                ("site_id", website_id.to_string()),
                ("period", "custom".to_string()),
                ("date", format!("{start},{end}")),
                (
                    "metrics",
                    "visitors,pageviews,visits,bounce_rate,visit_duration".to_string(),
                ),
            ],
        )?;
        let payload = self.get_json(url).await?;
        let wire: WireAggregate = serde_json::from_value(payload)?;
        Ok(wire.totals())
    }
}

fn decode_json(response: TransportResponse, url: &str) -> Result<Value, ProviderError> {
    if !(200..300).contains(&response.status) {
        return Err(ProviderError::from_status(response.status, url));
    }
    Ok(serde_json::from_slice(&response.body)?)
}

#[derive(Debug, Deserialize, Default)]
struct WireMetric {
    #[serde(default)]
    value: f64,
}

#[derive(Debug, Deserialize)]
struct WireAggregate {
    results: HashMap<String, WireMetric>,
}

/// Flattened aggregate totals with the derived metrics the unified model
/// needs: Plausible reports bounce rate (%) and mean visit duration, not raw
/// bounces and total time.
#[derive(Debug, Clone, Copy, Default)]
struct AggregateTotals {
    visitors: i64,
    pageviews: i64,
    visits: i64,
    bounces: i64,
    total_time: i64,
}

impl WireAggregate {
    fn totals(&self) -> AggregateTotals {
        let metric = |name: &str| self.results.get(name).map(|m| m.value).unwrap_or(0.0);
        let visits = metric("visits");
        AggregateTotals {
            visitors: metric("visitors") as i64,
            pageviews: metric("pageviews") as i64,
            visits: visits as i64,
            bounces: (metric("bounce_rate") * visits / 100.0).round() as i64,
            total_time: (metric("visit_duration") * visits).round() as i64,
        }
    }
}

/// Breakdown property per dimension; `None` means Plausible has no such
/// dimension and the call fails with `UnsupportedMetric`.
fn breakdown_property(kind: MetricKind) -> Option<(&'static str, &'static str)> {
    // (API property, response row key)
    match kind {
        MetricKind::Path => Some(("event:page", "page")),
        MetricKind::Referrer => Some(("visit:source", "source")),
        MetricKind::Browser => Some(("visit:browser", "browser")),
        MetricKind::Os => Some(("visit:os", "os")),
        MetricKind::Device => Some(("visit:device", "device")),
        MetricKind::Country => Some(("visit:country", "country")),
        MetricKind::Region => Some(("visit:region", "region")),
        MetricKind::City => Some(("visit:city", "city")),
        MetricKind::Event => Some(("event:name", "name")),
        MetricKind::Hostname => Some(("event:hostname", "hostname")),
        MetricKind::Language | MetricKind::Screen | MetricKind::Query | MetricKind::Title => None,
    }
}

#[async_trait::async_trait]
impl AnalyticsProvider for PlausibleProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Plausible
    }

    fn server_url(&self) -> String {
        self.base_url.to_string()
    }

    fn is_authenticated(&self) -> bool {
        self.api_key().is_some()
    }

    fn session_secret(&self) -> Option<String> {
        self.api_key()
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ProviderError> {
        let key = match credentials {
            Credentials::ApiKey { key } => key.clone(),
            Credentials::UsernamePassword { .. } => {
                return Err(ProviderError::Auth(
                    "plausible authenticates with an API key".to_string(),
                ));
            }
        };
        self.set_key(Some(key));
        // The v1 API has no dedicated verify endpoint; listing sites is the
        // cheapest call that exercises the key.
        match self.websites().await {
            Ok(_) => {
                debug!(server = %self.base_url, "plausible key accepted");
                Ok(())
            }
            Err(err) => {
                self.set_key(None);
                Err(err)
            }
        }
    }

    async fn websites(&self) -> Result<Vec<Website>, ProviderError> {
        let url = self.endpoint("/api/v1/sites", &[("limit", "200".to_string())])?;
        let payload = self.get_json(url).await?;
        let rows = payload
            .get("sites")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Decode("sites payload lacks site list".to_string()))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                // The domain doubles as the site identifier.
                let domain = row.get("domain").and_then(Value::as_str)?;
                Some(Website {
                    id: domain.to_string(),
                    name: domain.to_string(),
                    domain: domain.to_string(),
                    share_id: None,
                    provider: ProviderType::Plausible,
                })
            })
            .collect())
    }

    async fn stats(&self, website_id: &str, range: &DateRange) -> Result<Stats, ProviderError> {
        let resolved = range.resolve(Local::now().naive_local());
        let start = resolved.start.date();
        let end = resolved.end.date();
        let span_days = (end - start).num_days();
        let prev_end = start - Duration::days(1);
        let prev_start = prev_end - Duration::days(span_days);

        // One logical call: the comparison period rides alongside the
        // primary fetch instead of a second sequential round trip.
        let (current, previous) = tokio::join!(
            self.aggregate(website_id, start, end),
            self.aggregate(website_id, prev_start, prev_end),
        );
        let current = current?;
        let previous = previous?;

        let stat = |cur: i64, prev: i64| StatValue::new(cur, cur - prev);
        Ok(Stats {
            visitors: stat(current.visitors, previous.visitors),
            pageviews: stat(current.pageviews, previous.pageviews),
            visits: stat(current.visits, previous.visits),
            bounces: stat(current.bounces, previous.bounces),
            total_time: stat(current.total_time, previous.total_time),
        })
    }

    async fn series(
        &self,
        website_id: &str,
        range: &DateRange,
        metric: SeriesMetric,
    ) -> Result<Vec<ChartPoint>, ProviderError> {
        let now = Local::now().naive_local();
        let resolved = range.resolve(now);
        let metric_name = match metric {
            SeriesMetric::Pageviews => "pageviews",
            SeriesMetric::Visitors => "visitors",
        };
        let mut query = vec![
            ("site_id", website_id.to_string()),
            ("metrics", metric_name.to_string()),
        ];
        match resolved.unit {
            // Single-day spans chart hourly; Plausible does that with
            // period=day rather than an interval parameter.
            ChartUnit::Hour => {
                query.push(("period", "day".to_string()));
                query.push(("date", resolved.start.date().to_string()));
            }
            ChartUnit::Day | ChartUnit::Month => {
                query.push(("period", "custom".to_string()));
                query.push((
                    "date",
                    format!("{},{}", resolved.start.date(), resolved.end.date()),
                ));
                query.push((
                    "interval",
                    match resolved.unit {
                        ChartUnit::Month => "month".to_string(),
                        _ => "date".to_string(),
                    },
                ));
            }
        }
        let url = self.endpoint("/api/v1/stats/timeseries", &query)?;
        let payload = self.get_json(url).await?;
        let rows = payload
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Decode("timeseries payload lacks results".to_string()))?;
        let mut points: Vec<ChartPoint> = rows
            .iter()
            .map(|row| ChartPoint {
                date: row
                    .get("date")
                    .and_then(Value::as_str)
                    .map(|raw| parse_timestamp(raw, now))
                    .unwrap_or(now),
                value: row.get(metric_name).and_then(Value::as_i64).unwrap_or(0),
            })
            .collect();
        points.sort_by_key(|p| p.date);
        Ok(points)
    }

    async fn active_visitors(&self, website_id: &str) -> Result<u64, ProviderError> {
        let url = self.endpoint(
            "/api/v1/stats/realtime/visitors",
            &[("site_id", website_id.to_string())],
        )?;
        let payload = self.get_json(url).await?;
        // The endpoint returns a bare number.
        Ok(payload.as_u64().unwrap_or(0))
    }

    async fn realtime(&self, website_id: &str) -> Result<RealtimeSnapshot, ProviderError> {
        // Plausible exposes no realtime detail beyond the active-visitor
        // count, so every other section stays absent.
        let active = self.active_visitors(website_id).await?;
        Ok(RealtimeSnapshot {
            active_visitors: Some(active),
            ..RealtimeSnapshot::default()
        })
    }

    async fn metric_breakdown(
        &self,
        website_id: &str,
        range: &DateRange,
        kind: MetricKind,
        limit: u32,
    ) -> Result<Vec<MetricItem>, ProviderError> {
        let Some((property, row_key)) = breakdown_property(kind) else {
            return Err(ProviderError::UnsupportedMetric(kind));
        };
        let resolved = range.resolve(Local::now().naive_local());
        let url = self.endpoint(
            "/api/v1/stats/breakdown",
            &[
                ("site_id", website_id.to_string()),
                ("period", "custom".to_string()),
                (
                    "date",
                    format!("{},{}", resolved.start.date(), resolved.end.date()),
                ),
                ("property", property.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        let payload = self.get_json(url).await?;
        let rows = payload
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Decode("breakdown payload lacks results".to_string()))?;
        let mut items: Vec<MetricItem> = rows
            .iter()
            .map(|row| MetricItem {
                name: row
                    .get(row_key)
                    .and_then(Value::as_str)
                    .unwrap_or("(none)")
                    .to_string(),
                value: row.get("visitors").and_then(Value::as_i64).unwrap_or(0),
            })
            .collect();
        items.sort_by(|a, b| b.value.cmp(&a.value));
        items.truncate(limit as usize);
        Ok(items)
    }
}
