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

//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::fetcher::FieldSample;
use crate::layer::{ColorScheme, Layer, LayerDescriptor, LayerError, LayerStyle, RenderSurface};
use crate::transport::{BoxFuture, FetchError, Transport};

/// Batched response for `n` locations. Value = location index * 10 + slot.
pub fn grid_response(n: usize, variable: &str, times: &[i64]) -> Value {
    let locations: Vec<Value> = (0..n)
        .map(|i| {
            let values: Vec<f64> = (0..times.len()).map(|slot| (i * 10 + slot) as f64).collect();
            let mut hourly = Map::new();
            hourly.insert("time".to_string(), json!(times));
            hourly.insert(variable.to_string(), json!(values));
            json!({ "hourly": hourly })
        })
        .collect();
    Value::Array(locations)
}

#[derive(Debug)]
enum Script {
    /// Answer with one location per requested latitude.
    Synthetic(String),
    Fixed(Value),
    Fail,
}

#[derive(Debug)]
pub struct ScriptedTransport {
    script: Script,
    calls: AtomicUsize,
    last: Mutex<Option<(String, Vec<(String, String)>)>>,
}

impl ScriptedTransport {
    fn with(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn synthetic(variable: &str) -> Self {
        Self::with(Script::Synthetic(variable.to_string()))
    }

    pub fn fixed(body: Value) -> Self {
        Self::with(Script::Fixed(body))
    }

    pub fn failing() -> Self {
        Self::with(Script::Fail)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last.lock().unwrap().as_ref().map(|(url, _)| url.clone())
    }

    pub fn last_query(&self) -> Option<Vec<(String, String)>> {
        self.last.lock().unwrap().as_ref().map(|(_, query)| query.clone())
    }
}

impl Transport for ScriptedTransport {
    fn get_json<'a>(
        &'a self,
        url: &'a str,
        query: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<Value, FetchError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some((url.to_string(), query.to_vec()));

            match &self.script {
                Script::Fail => Err(FetchError::Status { status: 503 }),
                Script::Fixed(body) => Ok(body.clone()),
                Script::Synthetic(variable) => {
                    let n = query
                        .iter()
                        .find(|(k, _)| k == "latitude")
                        .map_or(0, |(_, v)| v.split(',').count());
                    let start = Utc::now().timestamp() - 3600;
                    let times: Vec<i64> = (0..24).map(|h| start + h * 3600).collect();
                    Ok(grid_response(n, variable, &times))
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Draw {
    samples: usize,
    style: LayerStyle,
}

/// Surface that records every call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    draws: Mutex<HashMap<String, Vec<Draw>>>,
    cleared: Mutex<Vec<String>>,
    visibility: Mutex<HashMap<String, bool>>,
    opacity: Mutex<HashMap<String, f32>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_count(&self, render_id: &str) -> usize {
        self.draws.lock().unwrap().get(render_id).map_or(0, Vec::len)
    }

    pub fn last_sample_count(&self, render_id: &str) -> Option<usize> {
        self.draws.lock().unwrap().get(render_id)?.last().map(|d| d.samples)
    }

    pub fn last_style(&self, render_id: &str) -> Option<LayerStyle> {
        self.draws.lock().unwrap().get(render_id)?.last().map(|d| d.style)
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().unwrap().clone()
    }

    pub fn visibility(&self, render_id: &str) -> Option<bool> {
        self.visibility.lock().unwrap().get(render_id).copied()
    }

    pub fn opacity(&self, render_id: &str) -> Option<f32> {
        self.opacity.lock().unwrap().get(render_id).copied()
    }
}

impl RenderSurface for RecordingSurface {
    fn draw(
        &self,
        render_id: &str,
        samples: &[FieldSample],
        style: &LayerStyle,
    ) -> Result<(), LayerError> {
        self.draws
            .lock()
            .unwrap()
            .entry(render_id.to_string())
            .or_default()
            .push(Draw {
                samples: samples.len(),
                style: *style,
            });
        Ok(())
    }

    fn clear(&self, render_id: &str) {
        self.cleared.lock().unwrap().push(render_id.to_string());
    }

    fn set_visible(&self, render_id: &str, visible: bool) {
        self.visibility.lock().unwrap().insert(render_id.to_string(), visible);
    }

    fn set_opacity(&self, render_id: &str, opacity: f32) {
        self.opacity.lock().unwrap().insert(render_id.to_string(), opacity);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Draw,
    Fail,
    Panic,
}

/// Layer that records hook calls and draws nothing but an empty sample set.
#[derive(Debug)]
pub struct RecordingLayer {
    id: String,
    behavior: Behavior,
    style: Mutex<LayerStyle>,
    adds: AtomicUsize,
    removes: AtomicUsize,
    timestamps: Mutex<Vec<Option<DateTime<Utc>>>>,
    delays: Mutex<VecDeque<Duration>>,
}

impl RecordingLayer {
    fn with(id: &str, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            behavior,
            style: Mutex::new(LayerStyle {
                opacity: 0.6,
                color_scheme: ColorScheme::Thermal,
            }),
            adds: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            timestamps: Mutex::new(Vec::new()),
            delays: Mutex::new(VecDeque::new()),
        }
    }

    pub fn new(id: &str) -> Self {
        Self::with(id, Behavior::Draw)
    }

    pub fn failing(id: &str) -> Self {
        Self::with(id, Behavior::Fail)
    }

    pub fn panicking(id: &str) -> Self {
        Self::with(id, Behavior::Panic)
    }

    /// Delay applied to the next timeline update, in call order.
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().unwrap().push_back(delay);
    }

    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.timestamps.lock().unwrap().len()
    }

    pub fn timestamps(&self) -> Vec<Option<DateTime<Utc>>> {
        self.timestamps.lock().unwrap().clone()
    }

    fn render_id(&self) -> String {
        format!("{}-layer", self.id)
    }

    fn draw(&self, surface: &dyn RenderSurface) -> Result<(), LayerError> {
        match self.behavior {
            Behavior::Draw => surface.draw(&self.render_id(), &[], &self.style.lock().unwrap()),
            Behavior::Fail => Err(LayerError::Surface {
                render_id: self.render_id(),
                reason: "upstream down".to_string(),
            }),
            Behavior::Panic => panic!("layer {} exploded", self.id),
        }
    }
}

impl Layer for RecordingLayer {
    fn descriptor(&self) -> LayerDescriptor {
        let style = *self.style.lock().unwrap();
        LayerDescriptor {
            id: self.id.clone(),
            source_id: format!("{}-source", self.id),
            render_id: self.render_id(),
            opacity: style.opacity,
            color_scheme: style.color_scheme,
            is_active: false,
        }
    }

    fn on_add<'a>(
        &'a self,
        surface: &'a dyn RenderSurface,
        _timestamp: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), LayerError>> {
        Box::pin(async move {
            self.adds.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Panic => Ok(()),
                _ => self.draw(surface),
            }
        })
    }

    fn on_remove(&self, surface: &dyn RenderSurface) {
        self.removes.fetch_add(1, Ordering::SeqCst);
        surface.clear(&self.render_id());
    }

    fn on_timeline_update<'a>(
        &'a self,
        surface: &'a dyn RenderSurface,
        timestamp: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, Result<(), LayerError>> {
        self.timestamps.lock().unwrap().push(timestamp);
        let delay = self.delays.lock().unwrap().pop_front();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.draw(surface)
        })
    }

    fn set_opacity(&self, surface: &dyn RenderSurface, opacity: f32) {
        self.style.lock().unwrap().opacity = opacity;
        surface.set_opacity(&self.render_id(), opacity);
    }

    fn set_color_scheme(&self, scheme: ColorScheme) {
        self.style.lock().unwrap().color_scheme = scheme;
    }
}
