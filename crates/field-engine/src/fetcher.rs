// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-field batched fetchers.
//!
//! A [`FieldFetcher`] turns a map center and an optional timestamp into one
//! batched request covering the whole sample grid, normalizes the response
//! into one [`FieldSample`] per grid point, and reads/writes through its
//! [`ExpiringCache`]. Fetching never fails: errors resolve to an empty
//! vector and are logged.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::ExpiringCache;
use crate::config::{EngineConfig, Endpoints};
use crate::grid::{GridPoint, GridSpec};
use crate::transport::{FetchError, Transport};

/// Width of the temporal cache bucket.
pub const TIME_BUCKET_SECS: i64 = 30 * 60;

/// Cache shared by every fetcher of one field kind.
pub type SampleCache = ExpiringCache<Vec<FieldSample>>;

/// Weather quantity sampled over the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Temperature,
    Wind,
    CloudCover,
    Humidity,
    AirQuality,
    Alerts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upstream {
    Forecast,
    AirQuality,
}

impl FieldKind {
    pub const ALL: [FieldKind; 6] = [
        FieldKind::Temperature,
        FieldKind::Wind,
        FieldKind::CloudCover,
        FieldKind::Humidity,
        FieldKind::AirQuality,
        FieldKind::Alerts,
    ];

    /// Stable identifier used in cache keys and layer ids.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Temperature => "temperature",
            FieldKind::Wind => "wind",
            FieldKind::CloudCover => "clouds",
            FieldKind::Humidity => "humidity",
            FieldKind::AirQuality => "aqi",
            FieldKind::Alerts => "alerts",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            FieldKind::Temperature => "Temperature",
            FieldKind::Wind => "Wind",
            FieldKind::CloudCover => "Cloud cover",
            FieldKind::Humidity => "Humidity",
            FieldKind::AirQuality => "Air quality",
            FieldKind::Alerts => "Alerts",
        }
    }

    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            FieldKind::Temperature => "°C",
            FieldKind::Wind => "km/h",
            FieldKind::CloudCover | FieldKind::Humidity => "%",
            FieldKind::AirQuality => "EAQI",
            FieldKind::Alerts => "level",
        }
    }

    /// Range used to normalize values for coloring.
    #[must_use]
    pub fn value_range(self) -> (f64, f64) {
        match self {
            FieldKind::Temperature => (-30.0, 45.0),
            FieldKind::Wind => (0.0, 100.0),
            FieldKind::CloudCover | FieldKind::Humidity | FieldKind::AirQuality => (0.0, 100.0),
            FieldKind::Alerts => (0.0, 3.0),
        }
    }

    /// Hourly variables requested upstream; the first one is the field value.
    fn hourly_variables(self) -> &'static [&'static str] {
        match self {
            FieldKind::Temperature => &["temperature_2m"],
            FieldKind::Wind => &["wind_speed_10m", "wind_direction_10m"],
            FieldKind::CloudCover => &["cloud_cover"],
            FieldKind::Humidity => &["relative_humidity_2m"],
            FieldKind::AirQuality => &["european_aqi"],
            FieldKind::Alerts => &["weather_code"],
        }
    }

    fn upstream(self) -> Upstream {
        match self {
            FieldKind::AirQuality => Upstream::AirQuality,
            _ => Upstream::Forecast,
        }
    }

    /// Whether the historical archive serves this field.
    #[must_use]
    pub fn supports_archive(self) -> bool {
        !matches!(self, FieldKind::AirQuality | FieldKind::Alerts)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown field: {s}"))
    }
}

/// Severity level derived from a WMO weather code.
#[must_use]
#[allow(clippy::cast_possible_truncation, reason = "WMO codes are small integers")]
pub fn alert_severity(weather_code: f64) -> f64 {
    if !weather_code.is_finite() {
        return 0.0;
    }
    match weather_code.round() as i64 {
        95..=99 => 3.0,
        65 | 67 | 75 | 82 | 86 => 2.0,
        45 | 48 | 55 | 63 | 73 | 81 | 85 => 1.0,
        _ => 0.0,
    }
}

/// One grid point's value and hourly series for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSample {
    pub lat: f64,
    pub lon: f64,
    /// Value at the requested instant, if upstream had one.
    pub current: Option<f64>,
    /// Hourly values; empty when upstream returned nothing for this point.
    pub series: Vec<Option<f64>>,
    /// Time of the slot `current` was taken from.
    pub timestamp: Option<DateTime<Utc>>,
    /// Wind direction in degrees, wind fields only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
}

impl FieldSample {
    fn empty(point: GridPoint) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            current: None,
            series: Vec::new(),
            timestamp: None,
            direction: None,
        }
    }
}

/// Temporal component of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeBucket {
    Now,
    At(DateTime<Utc>),
}

impl TimeBucket {
    /// Round a timestamp down to the nearest half hour; `None` means now.
    #[must_use]
    pub fn normalize(timestamp: Option<DateTime<Utc>>) -> Self {
        let Some(ts) = timestamp else {
            return TimeBucket::Now;
        };
        let secs = ts.timestamp();
        let floored = secs - secs.rem_euclid(TIME_BUCKET_SECS);
        DateTime::from_timestamp(floored, 0).map_or(TimeBucket::Now, TimeBucket::At)
    }

    fn instant(self) -> DateTime<Utc> {
        match self {
            TimeBucket::Now => Utc::now(),
            TimeBucket::At(ts) => ts,
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBucket::Now => f.write_str("now"),
            TimeBucket::At(ts) => write!(f, "{}", ts.format("%Y%m%dT%H%MZ")),
        }
    }
}

/// Cache key for a live fetch.
#[must_use]
pub fn cache_key(kind: FieldKind, lat: f64, lon: f64, timestamp: Option<DateTime<Utc>>) -> String {
    format!(
        "{}:{:.2}:{:.2}:{}",
        kind.as_str(),
        lat,
        lon,
        TimeBucket::normalize(timestamp)
    )
}

/// Cache key for a historical range; no temporal rounding.
#[must_use]
pub fn archive_key(kind: FieldKind, lat: f64, lon: f64, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{}:{:.2}:{:.2}:archive:{}:{}",
        kind.as_str(),
        lat,
        lon,
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}

/// Batched fetcher for one field kind.
pub struct FieldFetcher {
    kind: FieldKind,
    transport: Arc<dyn Transport>,
    cache: Arc<SampleCache>,
    grid: GridSpec,
    ttl: Duration,
    archive_ttl: Duration,
    endpoints: Endpoints,
}

impl fmt::Debug for FieldFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldFetcher")
            .field("kind", &self.kind)
            .field("grid", &self.grid)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl FieldFetcher {
    #[must_use]
    pub fn new(
        kind: FieldKind,
        transport: Arc<dyn Transport>,
        cache: Arc<SampleCache>,
        config: &EngineConfig,
    ) -> Self {
        let ttl = match kind {
            FieldKind::Alerts => config.cache.alerts_ttl(),
            _ => config.cache.live_ttl(),
        };
        Self {
            kind,
            transport,
            cache,
            grid: config.grid,
            ttl,
            archive_ttl: config.cache.archive_ttl(),
            endpoints: config.endpoints.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<SampleCache> {
        &self.cache
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Samples for the grid around `(lat, lon)` at `timestamp` (or now).
    pub async fn fetch(
        &self,
        lat: f64,
        lon: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Vec<FieldSample> {
        let bucket = TimeBucket::normalize(timestamp);
        let key = cache_key(self.kind, lat, lon, timestamp);

        if let Some(samples) = self.cache.get(&key) {
            debug!("{} cache hit: {}", self.kind, key);
            return samples;
        }

        let points = self.grid.generate(lat, lon);
        if points.is_empty() {
            warn!("{} grid around ({}, {}) is empty", self.kind, lat, lon);
            return Vec::new();
        }

        debug!("{} cache miss: {} ({} points)", self.kind, key, points.len());
        let url = match self.kind.upstream() {
            Upstream::Forecast => &self.endpoints.forecast_url,
            Upstream::AirQuality => &self.endpoints.air_quality_url,
        };
        let mut query = grid_query(&points, self.kind);
        match bucket {
            TimeBucket::Now => query.push(("forecast_days".to_string(), "1".to_string())),
            TimeBucket::At(ts) => {
                let day = ts.date_naive().format("%Y-%m-%d").to_string();
                query.push(("start_date".to_string(), day.clone()));
                query.push(("end_date".to_string(), day));
            }
        }

        match self.request(url, &query, &points, Some(bucket.instant())).await {
            Ok(samples) => {
                self.cache.set(&key, samples.clone(), self.ttl);
                samples
            }
            Err(e) => {
                warn!("{} fetch for {} failed: {}", self.kind, key, e);
                Vec::new()
            }
        }
    }

    /// Samples for a historical date range from the archive endpoint.
    pub async fn fetch_range(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<FieldSample> {
        if !self.kind.supports_archive() {
            warn!("{} has no archive data", self.kind);
            return Vec::new();
        }
        if end < start {
            warn!("{} archive range {} to {} is inverted", self.kind, start, end);
            return Vec::new();
        }

        let key = archive_key(self.kind, lat, lon, start, end);
        if let Some(samples) = self.cache.get(&key) {
            debug!("{} cache hit: {}", self.kind, key);
            return samples;
        }

        let points = self.grid.generate(lat, lon);
        if points.is_empty() {
            return Vec::new();
        }

        let mut query = grid_query(&points, self.kind);
        query.push(("start_date".to_string(), start.format("%Y-%m-%d").to_string()));
        query.push(("end_date".to_string(), end.format("%Y-%m-%d").to_string()));

        match self.request(&self.endpoints.archive_url, &query, &points, None).await {
            Ok(samples) => {
                self.cache.set(&key, samples.clone(), self.archive_ttl);
                samples
            }
            Err(e) => {
                warn!("{} archive fetch for {} failed: {}", self.kind, key, e);
                Vec::new()
            }
        }
    }

    async fn request(
        &self,
        url: &str,
        query: &[(String, String)],
        points: &[GridPoint],
        target: Option<DateTime<Utc>>,
    ) -> Result<Vec<FieldSample>, FetchError> {
        let body = self.transport.get_json(url, query).await?;
        parse_response(self.kind, &body, points, target)
    }
}

fn join_coords(points: &[GridPoint], coord: impl Fn(&GridPoint) -> f64) -> String {
    points
        .iter()
        .map(|p| format!("{:.4}", coord(p)))
        .collect::<Vec<_>>()
        .join(",")
}

fn grid_query(points: &[GridPoint], kind: FieldKind) -> Vec<(String, String)> {
    vec![
        ("latitude".to_string(), join_coords(points, |p| p.lat)),
        ("longitude".to_string(), join_coords(points, |p| p.lon)),
        ("hourly".to_string(), kind.hourly_variables().join(",")),
        ("timeformat".to_string(), "unixtime".to_string()),
        ("timezone".to_string(), "GMT".to_string()),
    ]
}

/// Split a batched response into per-point samples, aligned by index.
fn parse_response(
    kind: FieldKind,
    body: &Value,
    points: &[GridPoint],
    target: Option<DateTime<Utc>>,
) -> Result<Vec<FieldSample>, FetchError> {
    let locations: Vec<&Value> = match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if map.get("error").and_then(Value::as_bool) == Some(true) => {
            let reason = map
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unspecified");
            return Err(FetchError::Malformed(format!("upstream error: {reason}")));
        }
        Value::Object(_) => vec![body],
        other => {
            return Err(FetchError::Malformed(format!(
                "expected array or object, got {other}"
            )))
        }
    };

    let variables = kind.hourly_variables();
    let target_secs = target.map(|t| t.timestamp());

    let samples: Vec<FieldSample> = points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            locations.get(i).map_or_else(
                || FieldSample::empty(*point),
                |location| parse_location(kind, variables, location, *point, target_secs),
            )
        })
        .collect();

    // Partial responses keep their empty slots; a response with nothing usable is an error
    if samples.iter().all(|s| s.series.is_empty()) {
        return Err(FetchError::Malformed(format!(
            "no {} series in {} locations",
            variables[0],
            locations.len()
        )));
    }
    Ok(samples)
}

fn parse_location(
    kind: FieldKind,
    variables: &[&str],
    location: &Value,
    point: GridPoint,
    target_secs: Option<i64>,
) -> FieldSample {
    let hourly = &location["hourly"];
    let times: Vec<i64> = hourly["time"]
        .as_array()
        .map(|times| times.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    let read_series = |name: &str| -> Vec<Option<f64>> {
        hourly[name]
            .as_array()
            .map(|values| values.iter().map(Value::as_f64).collect())
            .unwrap_or_default()
    };

    let mut series = read_series(variables[0]);
    if kind == FieldKind::Alerts {
        series = series
            .into_iter()
            .map(|code| code.map(alert_severity))
            .collect();
    }
    if series.is_empty() {
        return FieldSample::empty(point);
    }

    let slot = select_slot(&times, target_secs);
    let current = slot.and_then(|i| series.get(i).copied().flatten());
    let timestamp = slot
        .and_then(|i| times.get(i).copied())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    let direction = variables
        .get(1)
        .and_then(|name| slot.and_then(|i| read_series(*name).get(i).copied().flatten()));

    FieldSample {
        lat: point.lat,
        lon: point.lon,
        current,
        series,
        timestamp,
        direction,
    }
}

/// Latest slot not after `target`, else the first; without a target, the last.
fn select_slot(times: &[i64], target_secs: Option<i64>) -> Option<usize> {
    if times.is_empty() {
        return None;
    }
    match target_secs {
        Some(target) => Some(times.iter().rposition(|&t| t <= target).unwrap_or(0)),
        None => Some(times.len() - 1),
    }
}
