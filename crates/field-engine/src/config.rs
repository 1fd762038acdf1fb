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

//! Engine configuration.
//!
//! All durations are stored as integer seconds/milliseconds so the structs
//! serialize cleanly into the application's TOML config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::grid::GridSpec;

/// Default Open-Meteo forecast endpoint
pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Default Open-Meteo air quality endpoint
pub const DEFAULT_AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

/// Default Open-Meteo historical archive endpoint
pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Cache TTL policy and sweep cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for near-real-time fields.
    #[serde(default = "default_live_ttl_secs")]
    pub live_ttl_secs: u64,

    /// TTL for weather alerts.
    #[serde(default = "default_alerts_ttl_secs")]
    pub alerts_ttl_secs: u64,

    /// How often the background sweep drops expired entries.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_live_ttl_secs() -> u64 {
    10 * 60
}

fn default_alerts_ttl_secs() -> u64 {
    5 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            live_ttl_secs: default_live_ttl_secs(),
            alerts_ttl_secs: default_alerts_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn live_ttl(&self) -> Duration {
        Duration::from_secs(self.live_ttl_secs)
    }

    #[must_use]
    pub fn alerts_ttl(&self) -> Duration {
        Duration::from_secs(self.alerts_ttl_secs)
    }

    /// Archive windows never change, so they live twice as long.
    #[must_use]
    pub fn archive_ttl(&self) -> Duration {
        self.live_ttl() * 2
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Timeline frame cadence and playback speed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,

    #[serde(default = "default_past_hours")]
    pub past_hours: u32,

    #[serde(default = "default_future_hours")]
    pub future_hours: u32,

    /// Delay between frames while playing.
    #[serde(default = "default_playback_interval_ms")]
    pub playback_interval_ms: u64,
}

fn default_step_minutes() -> u32 {
    15
}

fn default_past_hours() -> u32 {
    24
}

fn default_future_hours() -> u32 {
    6
}

fn default_playback_interval_ms() -> u64 {
    750
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            step_minutes: default_step_minutes(),
            past_hours: default_past_hours(),
            future_hours: default_future_hours(),
            playback_interval_ms: default_playback_interval_ms(),
        }
    }
}

impl TimelineConfig {
    #[must_use]
    pub fn playback_interval(&self) -> Duration {
        Duration::from_millis(self.playback_interval_ms)
    }
}

/// Network timeout and retry policy for batched requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay, doubled on each retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    500
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Upstream endpoint base URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,

    #[serde(default = "default_air_quality_url")]
    pub air_quality_url: String,

    #[serde(default = "default_archive_url")]
    pub archive_url: String,
}

fn default_forecast_url() -> String {
    DEFAULT_FORECAST_URL.to_string()
}

fn default_air_quality_url() -> String {
    DEFAULT_AIR_QUALITY_URL.to_string()
}

fn default_archive_url() -> String {
    DEFAULT_ARCHIVE_URL.to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            forecast_url: default_forecast_url(),
            air_quality_url: default_air_quality_url(),
            archive_url: default_archive_url(),
        }
    }
}

/// Everything the engine needs to run one map view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub grid: GridSpec,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub endpoints: Endpoints,
}
