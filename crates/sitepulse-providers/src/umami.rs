//! Umami adapter.
//!
//! Umami speaks token-auth REST: `POST /api/auth/login` issues a bearer
//! token, everything else is GET with `Authorization: Bearer`. Stats
//! responses already carry the comparison period (`prev`/`change` per
//! metric), so one request covers both.

use std::sync::{Arc, RwLock};

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use sitepulse_core::{
    account::Credentials,
    daterange::DateRange,
    error::ProviderError,
    model::{ChartPoint, MetricItem, ProviderType, RealtimeSnapshot, Stats, StatValue, Website},
    provider::{AnalyticsProvider, MetricKind, SeriesMetric},
    transport::{Method, Transport, TransportResponse},
};

use crate::timestamp::parse_timestamp;

pub struct UmamiProvider {
    transport: Arc<dyn Transport>,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl UmamiProvider {
    pub fn new(transport: Arc<dyn Transport>, server_url: &str) -> Result<Self, ProviderError> {
        let base_url = Url::parse(server_url)
            .map_err(|e| ProviderError::Decode(format!("invalid server url: {e}")))?;
        Ok(Self {
            transport,
            base_url,
            token: RwLock::new(None),
        })
    }

    /// Restore an adapter from a persisted session token, e.g. in the
    /// detached fire-now path where no interactive login is possible.
    pub fn with_token(
        transport: Arc<dyn Transport>,
        server_url: &str,
        token: &str,
    ) -> Result<Self, ProviderError> {
        let provider = Self::new(transport, server_url)?;
        provider.set_token(Some(token.to_string()));
        Ok(provider)
    }

    pub fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
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
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(token) = self.token() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
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
}

fn decode_json(response: TransportResponse, url: &str) -> Result<Value, ProviderError> {
    if !(200..300).contains(&response.status) {
        return Err(ProviderError::from_status(response.status, url));
    }
    Ok(serde_json::from_slice(&response.body)?)
}

fn range_query(range: &DateRange, now: NaiveDateTime) -> (String, String, &'static str) {
    let resolved = range.resolve(now);
    (
        epoch_millis(resolved.start).to_string(),
        epoch_millis(resolved.end).to_string(),
        resolved.unit.as_str(),
    )
}

/// Epoch millis for a local wall-clock instant. Ranges resolve against the
/// local calendar, so the instant must carry the local UTC offset; a
/// nonexistent wall-clock time (DST spring-forward gap) falls back to a UTC
/// reading.
fn epoch_millis(naive: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| naive.and_utc().timestamp_millis())
}

/// One per-metric stats cell. Umami 2.x reports the previous period as
/// `prev`, 1.x reported the delta directly as `change`.
#[derive(Debug, Deserialize, Default)]
struct WireStat {
    #[serde(default)]
    value: i64,
    #[serde(default)]
    prev: Option<i64>,
    #[serde(default)]
    change: Option<i64>,
}

impl WireStat {
    fn normalized(&self) -> StatValue {
        let change = match (self.change, self.prev) {
            (Some(change), _) => change,
            (None, Some(prev)) => self.value - prev,
            (None, None) => 0,
        };
        StatValue::new(self.value, change)
    }
}

#[derive(Debug, Deserialize)]
struct WireStats {
    #[serde(default)]
    visitors: WireStat,
    #[serde(default)]
    pageviews: WireStat,
    #[serde(default)]
    visits: WireStat,
    #[serde(default)]
    bounces: WireStat,
    #[serde(default)]
    totaltime: WireStat,
}

/// Breakdown rows and chart points both arrive as `{x, y}` pairs; `x` is a
/// label or a timestamp depending on the endpoint, and may be null for
/// direct traffic.
fn metric_items_from(value: &Value) -> Vec<MetricItem> {
    match value {
        Value::Array(rows) => rows
            .iter()
            .map(|row| MetricItem {
                name: row
                    .get("x")
                    .and_then(Value::as_str)
                    .unwrap_or("(none)")
                    .to_string(),
                value: row.get("y").and_then(Value::as_i64).unwrap_or(0),
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(name, count)| MetricItem {
                name: name.clone(),
                value: count.as_i64().unwrap_or(0),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn chart_points_from(value: &Value, now: NaiveDateTime) -> Vec<ChartPoint> {
    let Some(rows) = value.as_array() else {
        return Vec::new();
    };
    let mut points: Vec<ChartPoint> = rows
        .iter()
        .map(|row| ChartPoint {
            date: row
                .get("x")
                .and_then(Value::as_str)
                .map(|raw| parse_timestamp(raw, now))
                .unwrap_or(now),
            value: row.get("y").and_then(Value::as_i64).unwrap_or(0),
        })
        .collect();
    points.sort_by_key(|p| p.date);
    points
}

fn metric_type(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Path => "url",
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
        MetricKind::Hostname => "host",
    }
}

#[async_trait::async_trait]
impl AnalyticsProvider for UmamiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Umami
    }

    fn server_url(&self) -> String {
        self.base_url.to_string()
    }

    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    fn session_secret(&self) -> Option<String> {
        self.token()
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ProviderError> {
        match credentials {
            Credentials::UsernamePassword { username, password } => {
                let url = self.endpoint("/api/auth/login", &[])?;
                let body = serde_json::to_vec(&serde_json::json!({
                    "username": username,
                    "password": password,
                }))?;
                let response = self
                    .transport
                    .request(Method::Post, url.as_str(), &self.headers(), Some(body))
                    .await?;
                if response.status == 401 || response.status == 403 {
                    return Err(ProviderError::Auth("invalid username or password".to_string()));
                }
                let payload = decode_json(response, url.as_str())?;
                let token = payload
                    .get("token")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::Decode("login response lacks token".to_string()))?;
                self.set_token(Some(token.to_string()));
            }
            Credentials::ApiKey { key } => {
                // Pre-issued token (Umami Cloud). Verify it actually works
                // before accepting it.
                self.set_token(Some(key.clone()));
                let url = self.endpoint("/api/auth/verify", &[])?;
                let response = self
                    .transport
                    .request(Method::Post, url.as_str(), &self.headers(), None)
                    .await?;
                if !(200..300).contains(&response.status) {
                    self.set_token(None);
                    return Err(ProviderError::from_status(response.status, url.as_str()));
                }
            }
        }
        debug!(server = %self.base_url, "umami authentication succeeded");
        Ok(())
    }

    async fn websites(&self) -> Result<Vec<Website>, ProviderError> {
        let url = self.endpoint("/api/websites", &[("limit", "200".to_string())])?;
        let payload = self.get_json(url).await?;
        // 2.x wraps the list in {data: [...]}, 1.x returns a bare array.
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| payload.as_array())
            .ok_or_else(|| ProviderError::Decode("websites payload is not a list".to_string()))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .or_else(|| row.get("websiteUuid").and_then(Value::as_str))?;
                Some(Website {
                    id: id.to_string(),
                    name: row
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(id)
                        .to_string(),
                    domain: row
                        .get("domain")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    share_id: row
                        .get("shareId")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    provider: ProviderType::Umami,
                })
            })
            .collect())
    }

    async fn stats(&self, website_id: &str, range: &DateRange) -> Result<Stats, ProviderError> {
        let (start, end, _) = range_query(range, Local::now().naive_local());
        let url = self.endpoint(
            &format!("/api/websites/{website_id}/stats"),
            &[("startAt", start), ("endAt", end)],
        )?;
        let payload = self.get_json(url).await?;
        let wire: WireStats = serde_json::from_value(payload)?;
        Ok(Stats {
            visitors: wire.visitors.normalized(),
            pageviews: wire.pageviews.normalized(),
            visits: wire.visits.normalized(),
            bounces: wire.bounces.normalized(),
            total_time: wire.totaltime.normalized(),
        })
    }

    async fn series(
        &self,
        website_id: &str,
        range: &DateRange,
        metric: SeriesMetric,
    ) -> Result<Vec<ChartPoint>, ProviderError> {
        let now = Local::now().naive_local();
        let (start, end, unit) = range_query(range, now);
        let url = self.endpoint(
            &format!("/api/websites/{website_id}/pageviews"),
            &[
                ("startAt", start),
                ("endAt", end),
                ("unit", unit.to_string()),
                ("timezone", "UTC".to_string()),
            ],
        )?;
        let payload = self.get_json(url).await?;
        let field = match metric {
            SeriesMetric::Pageviews => "pageviews",
            SeriesMetric::Visitors => "sessions",
        };
        Ok(chart_points_from(
            payload.get(field).unwrap_or(&Value::Null),
            now,
        ))
    }

    async fn active_visitors(&self, website_id: &str) -> Result<u64, ProviderError> {
        let url = self.endpoint(&format!("/api/websites/{website_id}/active"), &[])?;
        let payload = self.get_json(url).await?;
        // 2.x: {visitors: n} or {x: n}; 1.x: [{x: n}].
        let count = payload
            .get("visitors")
            .and_then(Value::as_u64)
            .or_else(|| payload.get("x").and_then(Value::as_u64))
            .or_else(|| {
                payload
                    .as_array()
                    .and_then(|rows| rows.first())
                    .and_then(|row| row.get("x"))
                    .and_then(Value::as_u64)
            })
            .unwrap_or(0);
        Ok(count)
    }

    async fn realtime(&self, website_id: &str) -> Result<RealtimeSnapshot, ProviderError> {
        let now = Local::now().naive_local();
        let url = self.endpoint(&format!("/api/realtime/{website_id}"), &[])?;
        let payload = self.get_json(url).await?;

        let section = |name: &str| -> Option<Vec<MetricItem>> {
            payload.get(name).map(metric_items_from)
        };
        Ok(RealtimeSnapshot {
            active_visitors: payload
                .get("totals")
                .and_then(|totals| totals.get("visitors"))
                .and_then(Value::as_u64),
            countries: section("countries"),
            urls: section("urls"),
            referrers: section("referrers"),
            events: section("events"),
            series: payload
                .get("series")
                .and_then(|series| series.get("views"))
                .map(|views| chart_points_from(views, now)),
        })
    }

    async fn metric_breakdown(
        &self,
        website_id: &str,
        range: &DateRange,
        kind: MetricKind,
        limit: u32,
    ) -> Result<Vec<MetricItem>, ProviderError> {
        let (start, end, _) = range_query(range, Local::now().naive_local());
        let url = self.endpoint(
            &format!("/api/websites/{website_id}/metrics"),
            &[
                ("type", metric_type(kind).to_string()),
                ("startAt", start),
                ("endAt", end),
                ("limit", limit.to_string()),
            ],
        )?;
        let payload = self.get_json(url).await?;
        let mut items = metric_items_from(&payload);
        items.sort_by(|a, b| b.value.cmp(&a.value));
        items.truncate(limit as usize);
        Ok(items)
    }
}
