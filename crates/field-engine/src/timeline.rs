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

//! Timeline scrubber driving synchronized layer refreshes.
//!
//! The controller owns an ordered, fixed-length frame sequence and a
//! current index. Every step fans out to the [`LayerRegistry`]. Playback is
//! a single ticker task that steps forward at a fixed interval; it is always
//! cancelled before a new one starts.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::TimelineConfig;
use crate::registry::LayerRegistry;

/// One timestamp in the playback sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelineFrame {
    pub timestamp: DateTime<Utc>,
    pub index: usize,
}

/// Frames covering `[now - past_hours, now + future_hours]` every
/// `step_minutes`. The live frame sits at index `past_hours * 60 / step_minutes`.
#[must_use]
pub fn generate_frames(
    now: DateTime<Utc>,
    step_minutes: u32,
    past_hours: u32,
    future_hours: u32,
) -> Vec<TimelineFrame> {
    if step_minutes == 0 {
        return vec![TimelineFrame {
            timestamp: now,
            index: 0,
        }];
    }

    let past_steps = i64::from(past_hours * 60 / step_minutes);
    let future_steps = i64::from(future_hours * 60 / step_minutes);
    let step = ChronoDuration::minutes(i64::from(step_minutes));

    (-past_steps..=future_steps)
        .enumerate()
        .map(|(index, offset)| TimelineFrame {
            timestamp: now + step * i32::try_from(offset).unwrap_or(0),
            index,
        })
        .collect()
}

/// Human-readable offset of `frame` from `now`, e.g. "Live" or "12 Min voraus".
#[must_use]
pub fn offset_label(frame: DateTime<Utc>, now: DateTime<Utc>, step_minutes: u32) -> String {
    let diff_secs = (frame - now).num_seconds();
    let live_window = i64::from(step_minutes.max(1)) * 30;
    if diff_secs.abs() < live_window {
        return "Live".to_string();
    }

    let direction = if diff_secs > 0 { "voraus" } else { "zurück" };
    let total_minutes = (diff_secs.abs() + 30) / 60;
    let (hours, minutes) = (total_minutes / 60, total_minutes % 60);

    match (hours, minutes) {
        (0, m) => format!("{m} Min {direction}"),
        (h, 0) => format!("{h} Std {direction}"),
        (h, m) => format!("{h} Std {m} Min {direction}"),
    }
}

/// Snapshot of the controller state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineState {
    pub frames: Vec<TimelineFrame>,
    pub current_index: usize,
    pub is_playing: bool,
}

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelinePhase {
    Idle,
    Framed,
    Playing,
    Paused,
}

/// What a bound display (slider, label) needs after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelinePosition {
    pub index: usize,
    pub count: usize,
    pub timestamp: Option<DateTime<Utc>>,
    pub label: String,
    pub is_playing: bool,
}

struct Inner {
    registry: Arc<LayerRegistry>,
    config: TimelineConfig,
    state: Mutex<ControllerState>,
    position_tx: watch::Sender<TimelinePosition>,
}

struct ControllerState {
    timeline: TimelineState,
    reference_now: DateTime<Utc>,
    has_played: bool,
    ticker: Option<CancellationToken>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(ticker) = state.ticker.take() {
            ticker.cancel();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One playback tick. No-op if `token`'s playback was stopped meanwhile.
    fn advance_playback(&self, token: &CancellationToken) -> Option<TimelineFrame> {
        self.move_to(Some(token), |current, count| (current + 1) % count)
    }

    fn publish(&self, state: &ControllerState) {
        let timeline = &state.timeline;
        let frame = timeline.frames.get(timeline.current_index);
        let position = TimelinePosition {
            index: timeline.current_index,
            count: timeline.frames.len(),
            timestamp: frame.map(|f| f.timestamp),
            label: frame.map_or_else(String::new, |f| {
                offset_label(f.timestamp, state.reference_now, self.config.step_minutes)
            }),
            is_playing: timeline.is_playing,
        };
        self.position_tx.send_replace(position);
    }

    /// Move to `target(current, count)`. With a `ticker` token, the move is
    /// skipped once that playback has been cancelled.
    fn move_to(
        &self,
        ticker: Option<&CancellationToken>,
        target: impl FnOnce(usize, usize) -> usize,
    ) -> Option<TimelineFrame> {
        let frame = {
            let mut state = self.lock();
            if ticker.is_some_and(CancellationToken::is_cancelled) {
                return None;
            }
            let count = state.timeline.frames.len();
            if count == 0 {
                return None;
            }
            let index = target(state.timeline.current_index, count);
            state.timeline.current_index = index;
            self.publish(&state);
            state.timeline.frames[index]
        };

        debug!("Timeline at frame {} ({})", frame.index, frame.timestamp);
        // Fire and forget; layers apply their results as they arrive
        drop(self.registry.update_frame(Some(frame.timestamp), Some(frame.index)));
        Some(frame)
    }
}

/// Playback controller for one map view.
#[derive(Clone)]
pub struct TimelineController {
    inner: Arc<Inner>,
}

impl fmt::Debug for TimelineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TimelineController")
            .field("frames", &state.timeline.frames.len())
            .field("current_index", &state.timeline.current_index)
            .field("is_playing", &state.timeline.is_playing)
            .finish_non_exhaustive()
    }
}

impl TimelineController {
    #[must_use]
    pub fn new(registry: Arc<LayerRegistry>, config: TimelineConfig) -> Self {
        let (position_tx, _) = watch::channel(TimelinePosition::default());
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                state: Mutex::new(ControllerState {
                    timeline: TimelineState::default(),
                    reference_now: Utc::now(),
                    has_played: false,
                    ticker: None,
                }),
                position_tx,
            }),
        }
    }

    /// Build and install the frame sequence around `now` using the
    /// configured cadence.
    pub fn generate_frames(&self, now: DateTime<Utc>) -> Vec<TimelineFrame> {
        let config = &self.inner.config;
        let frames = generate_frames(now, config.step_minutes, config.past_hours, config.future_hours);
        self.install(frames.clone(), now);
        frames
    }

    /// Replace the sequence with `timestamps`. Resets to index 0 and stops
    /// playback.
    pub fn set_frames(&self, timestamps: &[DateTime<Utc>]) {
        let frames = timestamps
            .iter()
            .enumerate()
            .map(|(index, &timestamp)| TimelineFrame { timestamp, index })
            .collect();
        self.install(frames, Utc::now());
    }

    fn install(&self, frames: Vec<TimelineFrame>, reference_now: DateTime<Utc>) {
        let mut state = self.inner.lock();
        if let Some(ticker) = state.ticker.take() {
            ticker.cancel();
        }
        info!("Timeline installed {} frames", frames.len());
        state.timeline = TimelineState {
            frames,
            current_index: 0,
            is_playing: false,
        };
        state.reference_now = reference_now;
        state.has_played = false;
        self.inner.publish(&state);
    }

    /// Move by `delta` frames, wrapping in both directions, and refresh the
    /// active layers. No-op without frames.
    pub fn step(&self, delta: isize) -> Option<TimelineFrame> {
        self.inner.move_to(None, |current, count| {
            #[allow(
                clippy::cast_possible_wrap,
                clippy::cast_sign_loss,
                reason = "frame counts are far below isize::MAX and rem_euclid is non-negative"
            )]
            let index = (current as isize + delta).rem_euclid(count as isize) as usize;
            index
        })
    }

    /// Jump to `index` and refresh. Out-of-range indices are ignored.
    pub fn seek(&self, index: usize) -> Option<TimelineFrame> {
        if index >= self.frame_count() {
            return None;
        }
        self.inner.move_to(None, |_, _| index)
    }

    /// Start stepping forward every playback interval. Idempotent.
    pub fn play(&self) {
        let mut state = self.inner.lock();
        if state.timeline.is_playing || state.timeline.frames.is_empty() {
            return;
        }
        if let Some(old) = state.ticker.take() {
            old.cancel();
        }

        let token = CancellationToken::new();
        state.ticker = Some(token.clone());
        state.timeline.is_playing = true;
        state.has_played = true;
        self.inner.publish(&state);
        drop(state);

        let period = self.inner.config.playback_interval();
        info!("Timeline playing every {:?}", period);
        spawn_ticker(Arc::downgrade(&self.inner), period, token);
    }

    /// Stop playback. Idempotent.
    pub fn pause(&self) {
        let mut state = self.inner.lock();
        if !state.timeline.is_playing {
            return;
        }
        if let Some(ticker) = state.ticker.take() {
            ticker.cancel();
        }
        state.timeline.is_playing = false;
        self.inner.publish(&state);
        info!("Timeline paused at frame {}", state.timeline.current_index);
    }

    #[must_use]
    pub fn state(&self) -> TimelineState {
        self.inner.lock().timeline.clone()
    }

    #[must_use]
    pub fn phase(&self) -> TimelinePhase {
        let state = self.inner.lock();
        match (
            state.timeline.frames.is_empty(),
            state.timeline.is_playing,
            state.has_played,
        ) {
            (true, _, _) => TimelinePhase::Idle,
            (false, true, _) => TimelinePhase::Playing,
            (false, false, true) => TimelinePhase::Paused,
            (false, false, false) => TimelinePhase::Framed,
        }
    }

    #[must_use]
    pub fn current_frame(&self) -> Option<TimelineFrame> {
        let state = self.inner.lock();
        state.timeline.frames.get(state.timeline.current_index).copied()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.inner.lock().timeline.frames.len()
    }

    /// Index of the frame closest to the reference "now".
    #[must_use]
    pub fn live_index(&self) -> Option<usize> {
        let state = self.inner.lock();
        let now = state.reference_now;
        state
            .timeline
            .frames
            .iter()
            .min_by_key(|f| (f.timestamp - now).num_seconds().abs())
            .map(|f| f.index)
    }

    /// Receiver for display updates after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TimelinePosition> {
        self.inner.position_tx.subscribe()
    }
}

fn spawn_ticker(inner: Weak<Inner>, period: std::time::Duration, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = token.cancelled() => return,
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.advance_playback(&token);
        }
    });
}
