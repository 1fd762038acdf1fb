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

//! Grid-sampled weather field engine with time-synchronized map layers.
//!
//! The engine samples a lattice of points around a map center, fetches
//! per-field hourly series for the whole lattice in one request, caches the
//! results by space and time, and drives a timeline scrubber that refreshes
//! every active map layer on each frame change.
//!
//! - **Grid**: deterministic row-major sample points ([`grid`])
//! - **Cache**: TTL cache with a durable write-through mirror ([`cache`], [`store`])
//! - **Fetchers**: one batched fetcher per field kind ([`fetcher`], [`transport`])
//! - **Layers**: pluggable overlays and the rendering surface contract ([`layer`], [`registry`])
//! - **Timeline**: frame generation and playback ([`timeline`])
//!
//! [`MapView`] wires all of it together for one map.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use field_engine::{
//!     EngineConfig, FieldSample, GridPoint, HttpTransport, LayerError, LayerStyle, MapView,
//!     MemoryStore, RenderSurface,
//! };
//!
//! #[derive(Debug)]
//! struct PrintSurface;
//!
//! impl RenderSurface for PrintSurface {
//!     fn draw(&self, id: &str, samples: &[FieldSample], _: &LayerStyle) -> Result<(), LayerError> {
//!         println!("{id}: {} samples", samples.len());
//!         Ok(())
//!     }
//!     fn clear(&self, _: &str) {}
//!     fn set_visible(&self, _: &str, _: bool) {}
//!     fn set_opacity(&self, _: &str, _: f32) {}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EngineConfig::default();
//!     let transport = Arc::new(HttpTransport::new(config.transport.clone()).unwrap());
//!     let view = MapView::new(
//!         &config,
//!         GridPoint { lat: 35.0, lon: -97.0 },
//!         transport,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(PrintSurface),
//!         0.6,
//!     );
//!
//!     view.generate_frames(chrono::Utc::now());
//!     view.add_layer("temperature").await;
//!     view.play();
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     view.pause();
//! }
//! ```

pub mod cache;
pub mod config;
pub mod fetcher;
pub mod grid;
pub mod layer;
pub mod registry;
pub mod store;
pub mod timeline;
pub mod transport;
pub mod view;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, ExpiringCache};
pub use config::{CacheConfig, EngineConfig, Endpoints, TimelineConfig, TransportConfig};
pub use fetcher::{FieldFetcher, FieldKind, FieldSample, SampleCache, TimeBucket};
pub use grid::{GridPoint, GridSpec};
pub use layer::{ColorScheme, FieldLayer, Layer, LayerDescriptor, LayerError, LayerStyle, RenderSurface};
pub use registry::{LayerRegistry, LayerState, RefreshBatch};
pub use store::{DurableStore, FileStore, MemoryStore, StoreError};
pub use timeline::{TimelineController, TimelineFrame, TimelinePhase, TimelinePosition, TimelineState};
pub use transport::{BoxFuture, FetchError, HttpTransport, Transport};
pub use view::{MapCenter, MapView};
