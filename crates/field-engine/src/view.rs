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

//! Per-map-view context.
//!
//! A [`MapView`] wires one set of fetchers, caches, layers, the registry
//! and the timeline together for a single map. Nothing is global: two
//! views never share timeline or registry state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::fetcher::{FieldFetcher, FieldKind, FieldSample, SampleCache};
use crate::grid::GridPoint;
use crate::layer::{FieldLayer, RenderSurface};
use crate::registry::{LayerRegistry, RefreshBatch};
use crate::store::DurableStore;
use crate::timeline::{TimelineController, TimelineFrame};
use crate::transport::Transport;

/// Shared, mutable map center read by every field layer.
#[derive(Debug, Clone)]
pub struct MapCenter {
    inner: Arc<RwLock<GridPoint>>,
}

impl MapCenter {
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(GridPoint { lat, lon })),
        }
    }

    #[must_use]
    pub fn get(&self) -> GridPoint {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, lat: f64, lon: f64) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = GridPoint { lat, lon };
    }
}

/// Everything one map needs. Must be created inside a Tokio runtime.
pub struct MapView {
    center: MapCenter,
    fetchers: HashMap<FieldKind, Arc<FieldFetcher>>,
    registry: Arc<LayerRegistry>,
    timeline: TimelineController,
    sweep: CancellationToken,
}

impl fmt::Debug for MapView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapView")
            .field("center", &self.center.get())
            .field("registry", &self.registry)
            .field("timeline", &self.timeline)
            .finish_non_exhaustive()
    }
}

impl MapView {
    /// Build a view with one fetcher, cache and layer per field kind.
    ///
    /// Layers start inactive; attach them with [`add_layer`](Self::add_layer).
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        center: GridPoint,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DurableStore>,
        surface: Arc<dyn RenderSurface>,
        opacity: f32,
    ) -> Self {
        let center = MapCenter::new(center.lat, center.lon);
        let registry = Arc::new(LayerRegistry::new(surface));
        let sweep = CancellationToken::new();

        let mut fetchers = HashMap::new();
        for kind in FieldKind::ALL {
            let cache = Arc::new(SampleCache::new(kind.as_str(), Arc::clone(&store)));
            drop(cache.spawn_sweeper(config.cache.sweep_interval(), sweep.child_token()));

            let fetcher = Arc::new(FieldFetcher::new(kind, Arc::clone(&transport), cache, config));
            registry.register(Arc::new(FieldLayer::new(
                Arc::clone(&fetcher),
                center.clone(),
                opacity,
            )));
            fetchers.insert(kind, fetcher);
        }

        let timeline = TimelineController::new(Arc::clone(&registry), config.timeline.clone());
        info!(
            "Map view ready at ({:.2}, {:.2}) with {} layers",
            center.get().lat,
            center.get().lon,
            fetchers.len()
        );

        Self {
            center,
            fetchers,
            registry,
            timeline,
            sweep,
        }
    }

    #[must_use]
    pub fn center(&self) -> GridPoint {
        self.center.get()
    }

    /// Move the map and refresh active layers at the current frame.
    pub fn set_center(&self, lat: f64, lon: f64) -> RefreshBatch {
        self.center.set(lat, lon);
        let frame = self.timeline.current_frame();
        self.registry
            .update_frame(frame.map(|f| f.timestamp), frame.map(|f| f.index))
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn timeline(&self) -> &TimelineController {
        &self.timeline
    }

    #[must_use]
    pub fn fetcher(&self, kind: FieldKind) -> Option<&Arc<FieldFetcher>> {
        self.fetchers.get(&kind)
    }

    /// Attach a layer, drawing it at the current frame (or now).
    pub async fn add_layer(&self, id: &str) {
        let timestamp = self.timeline.current_frame().map(|f| f.timestamp);
        self.registry.add_layer(id, timestamp).await;
    }

    pub fn remove_layer(&self, id: &str) {
        self.registry.remove_layer(id);
    }

    #[must_use]
    pub fn list_layers(&self) -> Vec<String> {
        self.registry.list_layers()
    }

    pub fn toggle_visibility(&self, id: &str, visible: bool) {
        self.registry.toggle_visibility(id, visible);
    }

    pub fn generate_frames(&self, now: DateTime<Utc>) -> Vec<TimelineFrame> {
        self.timeline.generate_frames(now)
    }

    pub fn step(&self, delta: isize) -> Option<TimelineFrame> {
        self.timeline.step(delta)
    }

    pub fn play(&self) {
        self.timeline.play();
    }

    pub fn pause(&self) {
        self.timeline.pause();
    }

    /// Historical samples around the current center.
    pub async fn archive(&self, kind: FieldKind, start: NaiveDate, end: NaiveDate) -> Vec<FieldSample> {
        let Some(fetcher) = self.fetchers.get(&kind) else {
            warn!("No fetcher for {}", kind);
            return Vec::new();
        };
        let center = self.center.get();
        fetcher.fetch_range(center.lat, center.lon, start, end).await
    }
}

impl Drop for MapView {
    fn drop(&mut self) {
        self.timeline.pause();
        self.sweep.cancel();
    }
}
