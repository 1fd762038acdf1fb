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

//! Visual layer contract and the field layer adapter.
//!
//! The engine never draws. Layers implement [`Layer`] and push samples to
//! an external [`RenderSurface`]; the registry drives them through these
//! hooks only.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetcher::{FieldFetcher, FieldKind, FieldSample};
use crate::transport::BoxFuture;
use crate::view::MapCenter;

/// Errors reported by layer hooks. The registry logs and drops them.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("no {0} data for this frame")]
    NoData(FieldKind),

    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    #[error("surface rejected {render_id}: {reason}")]
    Surface { render_id: String, reason: String },
}

/// Gradient used to color a layer's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    Thermal,
    Wind,
    Clouds,
    Humidity,
    AirQuality,
    Alerts,
    Monochrome,
}

impl ColorScheme {
    /// Default scheme for a field.
    #[must_use]
    pub fn for_field(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Temperature => ColorScheme::Thermal,
            FieldKind::Wind => ColorScheme::Wind,
            FieldKind::CloudCover => ColorScheme::Clouds,
            FieldKind::Humidity => ColorScheme::Humidity,
            FieldKind::AirQuality => ColorScheme::AirQuality,
            FieldKind::Alerts => ColorScheme::Alerts,
        }
    }

    fn stops(self) -> &'static [(f32, [f32; 3])] {
        match self {
            ColorScheme::Thermal => &[
                (0.0, [40.0, 40.0, 200.0]),  // Deep blue
                (0.4, [0.0, 200.0, 200.0]),  // Cyan
                (0.6, [150.0, 200.0, 0.0]),  // Yellow-green
                (0.8, [255.0, 150.0, 0.0]),  // Orange
                (1.0, [220.0, 30.0, 30.0]),  // Red
            ],
            ColorScheme::Wind => &[
                (0.0, [200.0, 230.0, 255.0]),
                (0.5, [80.0, 140.0, 220.0]),
                (1.0, [150.0, 50.0, 255.0]),
            ],
            ColorScheme::Clouds => &[(0.0, [30.0, 30.0, 40.0]), (1.0, [235.0, 235.0, 240.0])],
            ColorScheme::Humidity => &[
                (0.0, [210.0, 180.0, 120.0]),
                (0.5, [120.0, 200.0, 160.0]),
                (1.0, [20.0, 90.0, 200.0]),
            ],
            ColorScheme::AirQuality => &[
                (0.0, [80.0, 240.0, 230.0]),
                (0.2, [80.0, 204.0, 170.0]),
                (0.4, [240.0, 230.0, 65.0]),
                (0.6, [255.0, 80.0, 80.0]),
                (0.8, [150.0, 0.0, 50.0]),
                (1.0, [125.0, 33.0, 129.0]),
            ],
            ColorScheme::Alerts => &[
                (0.0, [0.0, 0.0, 0.0]),
                (0.34, [255.0, 220.0, 0.0]),
                (0.67, [255.0, 130.0, 0.0]),
                (1.0, [230.0, 0.0, 0.0]),
            ],
            ColorScheme::Monochrome => &[(0.0, [0.0, 0.0, 0.0]), (1.0, [255.0, 255.0, 255.0])],
        }
    }

    /// Color at position `t` in `[0, 1]`, linearly interpolated between stops.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "channels are clamped to 0..=255 before the cast"
    )]
    pub fn color_at(self, t: f32) -> [u8; 3] {
        let stops = self.stops();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };

        let to_rgb = |c: [f32; 3]| c.map(|v| v.round().clamp(0.0, 255.0) as u8);

        for pair in stops.windows(2) {
            let (t1, c1) = pair[0];
            let (t2, c2) = pair[1];
            if t >= t1 && t <= t2 {
                let f = if t2 > t1 { (t - t1) / (t2 - t1) } else { 0.0 };
                return to_rgb([
                    c1[0] + (c2[0] - c1[0]) * f,
                    c1[1] + (c2[1] - c1[1]) * f,
                    c1[2] + (c2[2] - c1[2]) * f,
                ]);
            }
        }
        to_rgb(stops[stops.len() - 1].1)
    }
}

/// Presentation settings applied when a layer draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    pub opacity: f32,
    pub color_scheme: ColorScheme,
}

impl LayerStyle {
    /// Color for a raw field value, normalized by the field's range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "color precision only")]
    pub fn color_for(&self, kind: FieldKind, value: f64) -> [u8; 3] {
        let (min, max) = kind.value_range();
        let t = (value - min) / (max - min);
        self.color_scheme.color_at(t as f32)
    }
}

/// Public description of a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub id: String,
    pub source_id: String,
    pub render_id: String,
    pub opacity: f32,
    pub color_scheme: ColorScheme,
    pub is_active: bool,
}

/// Map rendering surface. Implemented outside the engine.
pub trait RenderSurface: Send + Sync + fmt::Debug {
    /// Replace the drawable for `render_id` with `samples`.
    fn draw(&self, render_id: &str, samples: &[FieldSample], style: &LayerStyle)
        -> Result<(), LayerError>;

    /// Remove the drawable for `render_id`.
    fn clear(&self, render_id: &str);

    fn set_visible(&self, render_id: &str, visible: bool);

    fn set_opacity(&self, render_id: &str, opacity: f32);
}

/// Hooks every pluggable layer implements.
pub trait Layer: Send + Sync + fmt::Debug {
    /// Identity and current style. `is_active` is owned by the registry.
    fn descriptor(&self) -> LayerDescriptor;

    /// Attach to the surface: first fetch and draw.
    fn on_add<'a>(
        &'a self,
        surface: &'a dyn RenderSurface,
        timestamp: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), LayerError>>;

    /// Remove every drawable this layer owns.
    fn on_remove(&self, surface: &dyn RenderSurface);

    /// Refetch and redraw for a timeline frame.
    fn on_timeline_update<'a>(
        &'a self,
        surface: &'a dyn RenderSurface,
        timestamp: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), LayerError>>;

    fn set_opacity(&self, surface: &dyn RenderSurface, opacity: f32);

    /// Takes effect on the next draw.
    fn set_color_scheme(&self, scheme: ColorScheme);
}

/// Layer that renders one weather field around the view center.
pub struct FieldLayer {
    fetcher: Arc<FieldFetcher>,
    center: MapCenter,
    style: Mutex<LayerStyle>,
}

impl fmt::Debug for FieldLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldLayer")
            .field("kind", &self.fetcher.kind())
            .field("style", &self.style())
            .finish_non_exhaustive()
    }
}

impl FieldLayer {
    #[must_use]
    pub fn new(fetcher: Arc<FieldFetcher>, center: MapCenter, opacity: f32) -> Self {
        let color_scheme = ColorScheme::for_field(fetcher.kind());
        Self {
            fetcher,
            center,
            style: Mutex::new(LayerStyle {
                opacity: opacity.clamp(0.0, 1.0),
                color_scheme,
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.fetcher.kind()
    }

    fn style(&self) -> LayerStyle {
        *self.style.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render_id(&self) -> String {
        format!("{}-layer", self.kind().as_str())
    }

    async fn refresh(
        &self,
        surface: &dyn RenderSurface,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), LayerError> {
        let center = self.center.get();
        let samples = self.fetcher.fetch(center.lat, center.lon, timestamp).await;
        if samples.is_empty() {
            // Keep whatever is on screen
            return Err(LayerError::NoData(self.kind()));
        }
        debug!("{} drawing {} samples", self.kind(), samples.len());
        surface.draw(&self.render_id(), &samples, &self.style())
    }
}

impl Layer for FieldLayer {
    fn descriptor(&self) -> LayerDescriptor {
        let id = self.kind().as_str();
        let style = self.style();
        LayerDescriptor {
            id: id.to_string(),
            source_id: format!("{id}-source"),
            render_id: self.render_id(),
            opacity: style.opacity,
            color_scheme: style.color_scheme,
            is_active: false,
        }
    }

    fn on_add<'a>(
        &'a self,
        surface: &'a dyn RenderSurface,
        timestamp: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), LayerError>> {
        Box::pin(self.refresh(surface, timestamp))
    }

    fn on_remove(&self, surface: &dyn RenderSurface) {
        surface.clear(&self.render_id());
    }

    fn on_timeline_update<'a>(
        &'a self,
        surface: &'a dyn RenderSurface,
        timestamp: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), LayerError>> {
        Box::pin(self.refresh(surface, timestamp))
    }

    fn set_opacity(&self, surface: &dyn RenderSurface, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        self.style.lock().unwrap_or_else(PoisonError::into_inner).opacity = opacity;
        surface.set_opacity(&self.render_id(), opacity);
    }

    fn set_color_scheme(&self, scheme: ColorScheme) {
        self.style.lock().unwrap_or_else(PoisonError::into_inner).color_scheme = scheme;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fetcher::SampleCache;
    use crate::store::MemoryStore;
    use crate::testing::{RecordingSurface, ScriptedTransport};

    fn field_layer(kind: FieldKind, transport: ScriptedTransport) -> FieldLayer {
        let cache = Arc::new(SampleCache::new(kind.as_str(), Arc::new(MemoryStore::new())));
        let fetcher = FieldFetcher::new(kind, Arc::new(transport), cache, &EngineConfig::default());
        FieldLayer::new(Arc::new(fetcher), MapCenter::new(35.0, -97.0), 0.6)
    }

    #[test]
    fn test_color_gradient_endpoints() {
        assert_eq!(ColorScheme::Monochrome.color_at(0.0), [0, 0, 0]);
        assert_eq!(ColorScheme::Monochrome.color_at(1.0), [255, 255, 255]);
        assert_eq!(ColorScheme::Monochrome.color_at(0.5), [128, 128, 128]);
        assert_eq!(ColorScheme::Monochrome.color_at(7.0), [255, 255, 255]);
        assert_eq!(ColorScheme::Monochrome.color_at(f32::NAN), [0, 0, 0]);
    }

    #[test]
    fn test_color_for_normalizes_by_field_range() {
        let style = LayerStyle {
            opacity: 1.0,
            color_scheme: ColorScheme::Thermal,
        };
        assert_eq!(style.color_for(FieldKind::Temperature, -30.0), [40, 40, 200]);
        assert_eq!(style.color_for(FieldKind::Temperature, 45.0), [220, 30, 30]);
    }

    #[test]
    fn test_descriptor_ids() {
        let layer = field_layer(FieldKind::Wind, ScriptedTransport::synthetic("wind_speed_10m"));
        let descriptor = layer.descriptor();
        assert_eq!(descriptor.id, "wind");
        assert_eq!(descriptor.source_id, "wind-source");
        assert_eq!(descriptor.render_id, "wind-layer");
        assert_eq!(descriptor.color_scheme, ColorScheme::Wind);
        assert!((descriptor.opacity - 0.6).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_add_draws_and_remove_clears() {
        let layer = field_layer(FieldKind::Temperature, ScriptedTransport::synthetic("temperature_2m"));
        let surface = RecordingSurface::new();

        layer.on_add(&surface, None).await.unwrap();
        assert_eq!(surface.draw_count("temperature-layer"), 1);
        assert_eq!(surface.last_sample_count("temperature-layer"), Some(289));

        layer.on_remove(&surface);
        assert_eq!(surface.cleared(), vec!["temperature-layer".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_previous_drawing() {
        let layer = field_layer(FieldKind::Humidity, ScriptedTransport::failing());
        let surface = RecordingSurface::new();

        let err = layer.on_timeline_update(&surface, None).await.unwrap_err();
        assert!(matches!(err, LayerError::NoData(FieldKind::Humidity)));
        assert_eq!(surface.draw_count("humidity-layer"), 0);
    }

    #[tokio::test]
    async fn test_style_changes() {
        let layer = field_layer(FieldKind::CloudCover, ScriptedTransport::synthetic("cloud_cover"));
        let surface = RecordingSurface::new();

        layer.set_opacity(&surface, 1.7);
        layer.set_color_scheme(ColorScheme::Monochrome);

        let descriptor = layer.descriptor();
        assert!((descriptor.opacity - 1.0).abs() < f32::EPSILON);
        assert_eq!(descriptor.color_scheme, ColorScheme::Monochrome);
        assert_eq!(surface.opacity("clouds-layer"), Some(1.0));

        layer.on_timeline_update(&surface, None).await.unwrap();
        assert_eq!(surface.last_style("clouds-layer").unwrap().color_scheme, ColorScheme::Monochrome);
    }
}
