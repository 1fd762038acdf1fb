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

//! Layer registry: lifecycle and timeline fan-out for map layers.
//!
//! Layers move through `Inactive -> Active <-> Hidden -> Removed`. Only
//! active layers are refreshed by [`LayerRegistry::update_all`]. Each
//! refresh runs as its own task, so a slow or failing layer never holds up
//! its siblings and layers may lag the timeline independently.
//!
//! Every fan-out is stamped with a request sequence. A layer's draw from a
//! request older than the one it last applied is discarded (see
//! [`FencedSurface`]), so a late response can never overwrite a newer frame.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::fetcher::FieldSample;
use crate::layer::{ColorScheme, Layer, LayerDescriptor, LayerError, LayerStyle, RenderSurface};

/// Lifecycle state of a registered layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    /// Registered but not attached to the surface.
    Inactive,
    /// Attached, visible, refreshed on every frame.
    Active,
    /// Attached but toggled invisible; skipped by frame refreshes.
    Hidden,
    /// Torn down. Can be added again.
    Removed,
}

impl LayerState {
    fn is_attached(self) -> bool {
        matches!(self, LayerState::Active | LayerState::Hidden)
    }
}

#[derive(Debug, Default)]
struct Applied {
    sequence: u64,
    frame: Option<usize>,
    /// Set while the layer is off the surface; every draw is dropped.
    detached: bool,
}

/// Per-layer record of the newest request that reached the surface.
#[derive(Debug, Default)]
struct FrameFence {
    applied: Mutex<Applied>,
}

impl FrameFence {
    fn lock(&self) -> MutexGuard<'_, Applied> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reopen for a new attachment. Requests older than `sequence` stay fenced out.
    fn attach(&self, sequence: u64) {
        let mut applied = self.lock();
        applied.detached = false;
        applied.sequence = applied.sequence.max(sequence);
    }

    fn detach(&self) {
        self.lock().detached = true;
    }
}

/// Surface wrapper handed to layer hooks for one request.
///
/// Draws from a request older than the last applied one are dropped.
#[derive(Debug)]
pub struct FencedSurface {
    inner: Arc<dyn RenderSurface>,
    fence: Arc<FrameFence>,
    sequence: u64,
    frame: Option<usize>,
}

impl RenderSurface for FencedSurface {
    fn draw(
        &self,
        render_id: &str,
        samples: &[FieldSample],
        style: &LayerStyle,
    ) -> Result<(), LayerError> {
        let mut applied = self.fence.lock();
        if applied.detached {
            debug!("Discarding draw for detached {}", render_id);
            return Ok(());
        }
        if self.sequence < applied.sequence {
            debug!(
                "Discarding stale draw for {} (request {} < applied {})",
                render_id, self.sequence, applied.sequence
            );
            return Ok(());
        }
        self.inner.draw(render_id, samples, style)?;
        applied.sequence = self.sequence;
        if self.frame.is_some() {
            applied.frame = self.frame;
        }
        Ok(())
    }

    fn clear(&self, render_id: &str) {
        self.inner.clear(render_id);
    }

    fn set_visible(&self, render_id: &str, visible: bool) {
        self.inner.set_visible(render_id, visible);
    }

    fn set_opacity(&self, render_id: &str, opacity: f32) {
        self.inner.set_opacity(render_id, opacity);
    }
}

struct LayerSlot {
    id: String,
    layer: Arc<dyn Layer>,
    state: LayerState,
    fence: Arc<FrameFence>,
}

/// Handles for one fan-out. Dropping it leaves the refreshes running.
#[derive(Debug, Default)]
pub struct RefreshBatch {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl RefreshBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids of the layers refreshed by this batch.
    #[must_use]
    pub fn layer_ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Wait for every refresh in the batch to finish.
    pub async fn join(self) {
        for (id, task) in self.tasks {
            if let Err(e) = task.await {
                warn!("Layer {} refresh task aborted: {}", id, e);
            }
        }
    }
}

/// Owns the layers that can be attached to one rendering surface.
pub struct LayerRegistry {
    surface: Arc<dyn RenderSurface>,
    slots: Mutex<Vec<LayerSlot>>,
    sequence: AtomicU64,
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots();
        f.debug_struct("LayerRegistry")
            .field(
                "layers",
                &slots.iter().map(|s| (&s.id, s.state)).collect::<Vec<_>>(),
            )
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LayerRegistry {
    #[must_use]
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            surface,
            slots: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<LayerSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn fenced(&self, fence: Arc<FrameFence>, sequence: u64, frame: Option<usize>) -> FencedSurface {
        FencedSurface {
            inner: Arc::clone(&self.surface),
            fence,
            sequence,
            frame,
        }
    }

    /// Add a layer implementation to the catalog in the `Inactive` state.
    ///
    /// Returns `false` if a layer with the same id is already registered.
    pub fn register(&self, layer: Arc<dyn Layer>) -> bool {
        let id = layer.descriptor().id;
        let mut slots = self.slots();
        if slots.iter().any(|s| s.id == id) {
            warn!("Layer {} is already registered", id);
            return false;
        }
        debug!("Registered layer {}", id);
        slots.push(LayerSlot {
            id,
            layer,
            state: LayerState::Inactive,
            fence: Arc::new(FrameFence::default()),
        });
        true
    }

    /// Attach a layer and draw it for `timestamp`.
    ///
    /// Unknown ids are logged and ignored. Adding an attached layer is a no-op.
    pub async fn add_layer(&self, id: &str, timestamp: Option<DateTime<Utc>>) {
        let attach = {
            let mut slots = self.slots();
            match slots.iter_mut().find(|s| s.id == id) {
                None => {
                    warn!("{}", LayerError::UnknownLayer(id.to_string()));
                    None
                }
                Some(slot) if slot.state.is_attached() => {
                    debug!("Layer {} is already attached", id);
                    None
                }
                Some(slot) => {
                    slot.state = LayerState::Active;
                    let sequence = self.next_sequence();
                    slot.fence.attach(sequence);
                    Some((Arc::clone(&slot.layer), Arc::clone(&slot.fence), sequence))
                }
            }
        };

        let Some((layer, fence, sequence)) = attach else {
            return;
        };

        info!("Adding layer {}", id);
        let surface = self.fenced(fence, sequence, None);
        if let Err(e) = layer.on_add(&surface, timestamp).await {
            warn!("Layer {} attached without data: {}", id, e);
        }
    }

    /// Tear a layer down. Removing a layer that is not attached is a no-op.
    pub fn remove_layer(&self, id: &str) {
        let layer = {
            let mut slots = self.slots();
            match slots.iter_mut().find(|s| s.id == id) {
                Some(slot) if slot.state.is_attached() => {
                    slot.state = LayerState::Removed;
                    slot.fence.detach();
                    Some(Arc::clone(&slot.layer))
                }
                Some(_) => None,
                None => {
                    warn!("{}", LayerError::UnknownLayer(id.to_string()));
                    None
                }
            }
        };

        if let Some(layer) = layer {
            info!("Removing layer {}", id);
            layer.on_remove(self.surface.as_ref());
        }
    }

    /// Refresh every active layer for `timestamp`.
    pub fn update_all(&self, timestamp: Option<DateTime<Utc>>) -> RefreshBatch {
        self.update_frame(timestamp, None)
    }

    /// Refresh every active layer for a timeline frame.
    ///
    /// Each layer refresh is spawned independently; errors and panics are
    /// logged per layer.
    pub fn update_frame(&self, timestamp: Option<DateTime<Utc>>, frame: Option<usize>) -> RefreshBatch {
        let sequence = self.next_sequence();
        let targets: Vec<(String, Arc<dyn Layer>, Arc<FrameFence>)> = self
            .slots()
            .iter()
            .filter(|s| s.state == LayerState::Active)
            .map(|s| (s.id.clone(), Arc::clone(&s.layer), Arc::clone(&s.fence)))
            .collect();

        debug!(
            "Refreshing {} layers for frame {:?} (request {})",
            targets.len(),
            frame,
            sequence
        );

        let tasks = targets
            .into_iter()
            .map(|(id, layer, fence)| {
                let surface = self.fenced(fence, sequence, frame);
                let task_id = id.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = layer.on_timeline_update(&surface, timestamp).await {
                        warn!("Layer {} refresh failed: {}", task_id, e);
                    }
                });
                (id, handle)
            })
            .collect();

        RefreshBatch { tasks }
    }

    /// Show or hide an attached layer without refetching.
    ///
    /// Hidden layers are skipped by frame refreshes until shown again.
    pub fn toggle_visibility(&self, id: &str, visible: bool) {
        let render_id = {
            let mut slots = self.slots();
            let Some(slot) = slots.iter_mut().find(|s| s.id == id) else {
                warn!("{}", LayerError::UnknownLayer(id.to_string()));
                return;
            };
            let next = match (slot.state, visible) {
                (LayerState::Active, false) => LayerState::Hidden,
                (LayerState::Hidden, true) => LayerState::Active,
                (state, _) => {
                    debug!("Layer {} visibility unchanged in state {:?}", id, state);
                    return;
                }
            };
            slot.state = next;
            slot.layer.descriptor().render_id
        };

        info!("Layer {} {}", id, if visible { "shown" } else { "hidden" });
        self.surface.set_visible(&render_id, visible);
    }

    pub fn set_opacity(&self, id: &str, opacity: f32) {
        if let Some(layer) = self.layer(id) {
            layer.set_opacity(self.surface.as_ref(), opacity);
        }
    }

    pub fn set_color_scheme(&self, id: &str, scheme: ColorScheme) {
        if let Some(layer) = self.layer(id) {
            layer.set_color_scheme(scheme);
        }
    }

    fn layer(&self, id: &str) -> Option<Arc<dyn Layer>> {
        let layer = self
            .slots()
            .iter()
            .find(|s| s.id == id)
            .map(|s| Arc::clone(&s.layer));
        if layer.is_none() {
            warn!("{}", LayerError::UnknownLayer(id.to_string()));
        }
        layer
    }

    /// Every registered layer id, in registration order.
    #[must_use]
    pub fn list_layers(&self) -> Vec<String> {
        self.slots().iter().map(|s| s.id.clone()).collect()
    }

    /// Ids of layers currently refreshed by frame changes.
    #[must_use]
    pub fn active_layers(&self) -> Vec<String> {
        self.slots()
            .iter()
            .filter(|s| s.state == LayerState::Active)
            .map(|s| s.id.clone())
            .collect()
    }

    #[must_use]
    pub fn state(&self, id: &str) -> Option<LayerState> {
        self.slots().iter().find(|s| s.id == id).map(|s| s.state)
    }

    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<LayerDescriptor> {
        self.slots().iter().find(|s| s.id == id).map(|s| {
            let mut descriptor = s.layer.descriptor();
            descriptor.is_active = s.state == LayerState::Active;
            descriptor
        })
    }

    /// Frame index of the newest timeline draw applied for `id`.
    #[must_use]
    pub fn last_applied_frame(&self, id: &str) -> Option<usize> {
        self.slots()
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.fence.lock().frame)
    }
}
