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

//! Text rendering surface for the command line.
//!
//! Keeps per-drawable statistics in place of pixels and logs every draw with
//! the color of the mean value, so a terminal session shows what a map
//! overlay would be painting.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use field_engine::{FieldKind, FieldSample, LayerError, LayerStyle, RenderSurface};
use log::{debug, info};

/// Summary of the samples last drawn under one render id.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawableStats {
    pub draws: usize,
    pub points: usize,
    pub valued: usize,
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub visible: bool,
    pub opacity: f32,
}

impl Default for DrawableStats {
    fn default() -> Self {
        Self {
            draws: 0,
            points: 0,
            valued: 0,
            min: None,
            mean: None,
            max: None,
            visible: true,
            opacity: 1.0,
        }
    }
}

/// Field kind behind a `"{kind}-layer"` render id.
fn kind_for(render_id: &str) -> Option<FieldKind> {
    render_id.strip_suffix("-layer")?.parse().ok()
}

#[derive(Debug, Default)]
pub struct ConsoleSurface {
    drawables: Mutex<HashMap<String, DrawableStats>>,
}

impl ConsoleSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, render_id: &str) -> Option<DrawableStats> {
        self.drawables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(render_id)
            .cloned()
    }

    /// One line per drawable, sorted by render id.
    pub fn summary(&self) -> Vec<String> {
        let drawables = self.drawables.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lines: Vec<String> = drawables
            .iter()
            .map(|(id, s)| {
                let unit = kind_for(id).map_or("", FieldKind::unit);
                format!(
                    "{id}: {} draws, {}/{} points valued, min {} mean {} max {} {unit}{}",
                    s.draws,
                    s.valued,
                    s.points,
                    fmt_value(s.min),
                    fmt_value(s.mean),
                    fmt_value(s.max),
                    if s.visible { "" } else { " (hidden)" },
                )
            })
            .collect();
        lines.sort();
        lines
    }
}

fn fmt_value(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

impl RenderSurface for ConsoleSurface {
    #[allow(clippy::cast_precision_loss, reason = "sample counts are small")]
    fn draw(&self, render_id: &str, samples: &[FieldSample], style: &LayerStyle) -> Result<(), LayerError> {
        let values: Vec<f64> = samples.iter().filter_map(|s| s.current).collect();
        let min = values.iter().copied().reduce(f64::min);
        let max = values.iter().copied().reduce(f64::max);
        let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);

        let mut drawables = self.drawables.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = drawables.entry(render_id.to_string()).or_default();
        entry.draws += 1;
        entry.points = samples.len();
        entry.valued = values.len();
        entry.min = min;
        entry.mean = mean;
        entry.max = max;
        entry.opacity = style.opacity;

        match (kind_for(render_id), mean) {
            (Some(kind), Some(mean)) => {
                let [r, g, b] = style.color_for(kind, mean);
                info!(
                    "{}: {} points, mean {:.1} {} #{:02x}{:02x}{:02x} @ {:.0}%",
                    render_id,
                    samples.len(),
                    mean,
                    kind.unit(),
                    r,
                    g,
                    b,
                    style.opacity * 100.0
                );
            }
            _ => info!("{}: {} points, no values", render_id, samples.len()),
        }
        Ok(())
    }

    fn clear(&self, render_id: &str) {
        debug!("Clearing {}", render_id);
        self.drawables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(render_id);
    }

    fn set_visible(&self, render_id: &str, visible: bool) {
        if let Some(entry) = self
            .drawables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(render_id)
        {
            entry.visible = visible;
        }
    }

    fn set_opacity(&self, render_id: &str, opacity: f32) {
        if let Some(entry) = self
            .drawables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(render_id)
        {
            entry.opacity = opacity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use field_engine::ColorScheme;

    fn sample(value: Option<f64>) -> FieldSample {
        FieldSample {
            lat: 50.0,
            lon: 8.0,
            current: value,
            series: vec![value],
            timestamp: None,
            direction: None,
        }
    }

    fn style() -> LayerStyle {
        LayerStyle {
            opacity: 0.5,
            color_scheme: ColorScheme::Thermal,
        }
    }

    #[test]
    fn test_draw_records_stats() {
        let surface = ConsoleSurface::new();
        let samples = [sample(Some(10.0)), sample(None), sample(Some(20.0))];
        surface.draw("temperature-layer", &samples, &style()).unwrap();

        let stats = surface.stats("temperature-layer").unwrap();
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.points, 3);
        assert_eq!(stats.valued, 2);
        assert_eq!(stats.min, Some(10.0));
        assert_eq!(stats.mean, Some(15.0));
        assert_eq!(stats.max, Some(20.0));
        assert!((stats.opacity - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_redraw_replaces_values() {
        let surface = ConsoleSurface::new();
        surface.draw("wind-layer", &[sample(Some(5.0))], &style()).unwrap();
        surface.draw("wind-layer", &[sample(None)], &style()).unwrap();

        let stats = surface.stats("wind-layer").unwrap();
        assert_eq!(stats.draws, 2);
        assert_eq!(stats.mean, None);
    }

    #[test]
    fn test_visibility_clear_and_summary() {
        let surface = ConsoleSurface::new();
        surface.draw("humidity-layer", &[sample(Some(80.0))], &style()).unwrap();
        surface.draw("clouds-layer", &[sample(Some(40.0))], &style()).unwrap();
        surface.set_visible("humidity-layer", false);
        surface.set_opacity("clouds-layer", 0.9);

        let summary = surface.summary();
        assert_eq!(summary.len(), 2);
        assert!(summary[0].starts_with("clouds-layer"));
        assert!(summary[1].ends_with("(hidden)"));
        assert!((surface.stats("clouds-layer").unwrap().opacity - 0.9).abs() < f32::EPSILON);

        surface.clear("humidity-layer");
        assert!(surface.stats("humidity-layer").is_none());
        // Unknown ids are ignored.
        surface.set_visible("missing-layer", true);
    }

    #[test]
    fn test_kind_for_render_id() {
        assert_eq!(kind_for("aqi-layer"), Some(FieldKind::AirQuality));
        assert_eq!(kind_for("aqi"), None);
        assert_eq!(kind_for("radar-layer"), None);
    }
}
