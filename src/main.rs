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

//! Headless driver for the weather field engine.
//!
//! Builds one map view around a center, attaches the configured layers and
//! walks the timeline, logging every frame the surface paints.

mod config;
mod surface;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use config::AppConfig;
use field_engine::{
    DurableStore, FieldKind, FileStore, GridPoint, HttpTransport, MapView, MemoryStore, RenderSurface,
};
use log::{info, warn, LevelFilter};
use surface::ConsoleSurface;

#[derive(Parser, Debug)]
#[command(name = "wxgrid")]
#[command(about = "Sample weather fields on a grid and scrub them along a timeline")]
struct Args {
    /// Map center latitude (defaults to the configured center)
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Map center longitude (defaults to the configured center)
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Comma-separated layer ids, e.g. temperature,wind,aqi
    #[arg(long, value_delimiter = ',')]
    layers: Option<Vec<FieldKind>>,

    /// Number of timeline frames to advance
    #[arg(long, default_value_t = 8)]
    ticks: u32,

    /// Advance with timed playback instead of manual steps
    #[arg(long)]
    play: bool,

    /// Fetch hourly history between two dates instead of running the timeline
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    archive: Option<Vec<NaiveDate>>,

    /// Field used with --archive
    #[arg(long, default_value = "temperature")]
    archive_field: FieldKind,

    /// Overrides RUST_LOG
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Print the config location and effective settings, then exit
    #[arg(long)]
    print_config: bool,

    /// Keep cached fields in memory only
    #[arg(long)]
    no_cache: bool,
}

fn open_store(config: &AppConfig, no_cache: bool) -> Arc<dyn DurableStore> {
    if no_cache || !config.persist_cache {
        return Arc::new(MemoryStore::new());
    }
    match FileStore::open(config.cache_dir()) {
        Ok(store) => {
            info!("Caching fields in {}", store.dir().display());
            Arc::new(store)
        }
        Err(e) => {
            warn!("Falling back to in-memory cache: {}", e);
            Arc::new(MemoryStore::new())
        }
    }
}

async fn run_archive(view: &MapView, kind: FieldKind, start: NaiveDate, end: NaiveDate) {
    let samples = view.archive(kind, start, end).await;
    if samples.is_empty() {
        warn!("No {} history for {} to {}", kind, start, end);
        return;
    }
    println!("{} history {} to {} ({} points)", kind.display_name(), start, end, samples.len());
    for sample in &samples {
        let hours: Vec<String> = sample
            .series
            .iter()
            .map(|v| v.map_or_else(|| "-".to_string(), |v| format!("{v:.1}")))
            .collect();
        println!("  {:>8.3} {:>9.3}  {} {}", sample.lat, sample.lon, hours.join(" "), kind.unit());
    }
}

async fn run_timeline(view: &MapView, layers: &[FieldKind], ticks: u32, play: bool, interval: Duration) {
    let timeline = view.timeline();
    view.generate_frames(Utc::now());
    if let Some(live) = timeline.live_index() {
        timeline.seek(live);
    }

    let mut positions = timeline.subscribe();
    let watcher = tokio::spawn(async move {
        while positions.changed().await.is_ok() {
            let position = positions.borrow_and_update().clone();
            info!(
                "Frame {}/{}: {}{}",
                position.index + 1,
                position.count,
                position.label,
                if position.is_playing { " (playing)" } else { "" }
            );
        }
    });

    for kind in layers {
        view.add_layer(kind.as_str()).await;
    }

    if play {
        view.play();
        tokio::time::sleep(interval * ticks).await;
        view.pause();
    } else {
        for _ in 0..ticks {
            view.step(1);
            tokio::time::sleep(interval).await;
        }
    }

    // Settle the last frame so the summary matches what is on screen.
    let timestamp = timeline.current_frame().map(|f| f.timestamp);
    view.registry().update_all(timestamp).join().await;
    watcher.abort();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = args.log_level {
        logger.filter_level(level);
    }
    logger.init();

    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    if args.print_config {
        match AppConfig::get_config_path() {
            Ok(path) => println!("Config file: {}", path.display()),
            Err(e) => println!("Config file: unavailable ({e})"),
        }
        println!("{config:#?}");
        return Ok(());
    }

    let center = GridPoint {
        lat: args.lat.unwrap_or(config.center_latitude),
        lon: args.lon.unwrap_or(config.center_longitude),
    };
    let layers = args.layers.clone().unwrap_or_else(|| config.layer_kinds());

    let store = open_store(&config, args.no_cache);
    let transport = Arc::new(HttpTransport::new(config.engine.transport.clone())?);
    let surface = Arc::new(ConsoleSurface::new());
    let view = MapView::new(
        &config.engine,
        center,
        transport,
        store,
        Arc::clone(&surface) as Arc<dyn RenderSurface>,
        config.layer_opacity,
    );

    if let Some(range) = args.archive.as_deref() {
        let [start, end] = range else {
            return Err("--archive takes START and END dates".into());
        };
        if start > end {
            return Err(format!("archive start {start} is after end {end}").into());
        }
        run_archive(&view, args.archive_field, *start, *end).await;
        return Ok(());
    }

    if layers.is_empty() {
        warn!("No layers selected");
    }
    run_timeline(
        &view,
        &layers,
        args.ticks,
        args.play,
        config.engine.timeline.playback_interval(),
    )
    .await;

    for id in view.list_layers() {
        if let Some(descriptor) = view.registry().descriptor(&id) {
            println!(
                "{:<12} {:<8} opacity {:.2} scheme {:?}",
                descriptor.id,
                if descriptor.is_active { "active" } else { "inactive" },
                descriptor.opacity,
                descriptor.color_scheme
            );
        }
    }
    for line in surface.summary() {
        println!("{line}");
    }

    Ok(())
}
