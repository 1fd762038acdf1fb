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

//! Application configuration management.
//!
//! Persistent configuration is stored as TOML via `confy`. It holds the
//! default map center, which layers to attach on startup, cache location
//! and the embedded engine settings.

use std::path::PathBuf;

use field_engine::{EngineConfig, FieldKind, FileStore};
use log::warn;
use serde::{Deserialize, Serialize};

/// Application name used for the config file location
pub const APP_NAME: &str = "wxgrid";

/// Default map center (Frankfurt am Main)
pub const DEFAULT_CENTER: (f64, f64) = (50.1109, 8.6821);

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Map center latitude
    #[serde(default = "default_center_latitude")]
    pub center_latitude: f64,

    /// Map center longitude
    #[serde(default = "default_center_longitude")]
    pub center_longitude: f64,

    /// Layer ids attached on startup
    #[serde(default = "default_enabled_layers")]
    pub enabled_layers: Vec<String>,

    /// Layer opacity (0.0 - 1.0)
    #[serde(default = "default_layer_opacity")]
    pub layer_opacity: f32,

    /// Mirror cached field data to disk between runs
    #[serde(default = "default_true")]
    pub persist_cache: bool,

    /// Override for the on-disk cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Grid, cache, timeline and transport settings
    #[serde(default)]
    pub engine: EngineConfig,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_center_latitude() -> f64 {
    DEFAULT_CENTER.0
}

fn default_center_longitude() -> f64 {
    DEFAULT_CENTER.1
}

fn default_enabled_layers() -> Vec<String> {
    vec![
        FieldKind::Temperature.as_str().to_string(),
        FieldKind::Wind.as_str().to_string(),
    ]
}

fn default_layer_opacity() -> f32 {
    0.6
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            center_latitude: default_center_latitude(),
            center_longitude: default_center_longitude(),
            enabled_layers: default_enabled_layers(),
            layer_opacity: default_layer_opacity(),
            persist_cache: true,
            cache_dir: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, writing defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, "config")
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, "config")
    }

    /// Directory used by the on-disk cache mirror
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(FileStore::default_dir)
    }

    /// Enabled layer ids that name a known field, in config order
    pub fn layer_kinds(&self) -> Vec<FieldKind> {
        self.enabled_layers
            .iter()
            .filter_map(|id| match id.parse::<FieldKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    warn!("Ignoring configured layer: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.layer_kinds(), vec![FieldKind::Temperature, FieldKind::Wind]);
        assert_eq!(config.engine.grid.point_count(), 289);
        assert!(config.persist_cache);
    }

    #[test]
    fn test_unknown_layers_are_skipped() {
        let config = AppConfig {
            enabled_layers: vec!["aqi".to_string(), "pressure".to_string(), "Alerts".to_string()],
            ..AppConfig::default()
        };
        assert_eq!(config.layer_kinds(), vec![FieldKind::AirQuality, FieldKind::Alerts]);
    }

    #[test]
    fn test_cache_dir_override() {
        let config = AppConfig {
            cache_dir: Some(PathBuf::from("/tmp/wx")),
            ..AppConfig::default()
        };
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/wx"));
    }
}
