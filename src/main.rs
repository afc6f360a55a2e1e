//! Headless runner.
//!
//! Loads a scene (and optionally a config file and a GeoJSON import), ticks
//! the simulation at roughly 60 Hz, makes every hive report periodically and
//! prints the protocol statistics at the end.

use anyhow::{Context, Result, bail};
use env_logger::Builder;
use log::{LevelFilter, debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use hive_radio_simulator::common::config::SimulationConfig;
use hive_radio_simulator::common::geojson::{GeoImport, GeoImportOptions};
use hive_radio_simulator::common::scene::{LoadMode, load_scene_file};
use hive_radio_simulator::simulation::ingest::{IngestMessage, IngestQueue, IngestStatus, drain_ingest_queue};
use hive_radio_simulator::simulation::{SimulationEvent, SimulationState, WaveKind};

const TICK_INTERVAL: Duration = Duration::from_millis(16);

const USAGE: &str = "Usage: hive-radio-simulator <scene.json> [--config <config.toml>] \
[--geojson <file> --origin <lat>,<lon>] [--seconds <n>] [--emit-every <secs>]";

struct RunOptions {
    scene_path: String,
    config_path: Option<PathBuf>,
    geojson_path: Option<PathBuf>,
    origin: Option<(f64, f64)>,
    seconds: f64,
    emit_every_secs: f64,
}

fn parse_args() -> Result<RunOptions> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut options = RunOptions {
        scene_path: String::new(),
        config_path: None,
        geojson_path: None,
        origin: None,
        seconds: 30.0,
        emit_every_secs: 10.0,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = || iter.next().with_context(|| format!("Missing value for {}\n{}", arg, USAGE));
        match arg.as_str() {
            "--config" => options.config_path = Some(PathBuf::from(value()?)),
            "--geojson" => options.geojson_path = Some(PathBuf::from(value()?)),
            "--origin" => options.origin = Some(parse_origin(value()?)?),
            "--seconds" => options.seconds = value()?.parse().context("--seconds expects a number")?,
            "--emit-every" => options.emit_every_secs = value()?.parse().context("--emit-every expects a number")?,
            other if other.starts_with("--") => bail!("Unknown option {}\n{}", other, USAGE),
            other => options.scene_path = other.to_string(),
        }
    }

    if options.scene_path.is_empty() {
        bail!("{}", USAGE);
    }
    if options.geojson_path.is_some() && options.origin.is_none() {
        bail!("--geojson requires --origin <lat>,<lon>");
    }
    Ok(options)
}

fn parse_origin(text: &str) -> Result<(f64, f64)> {
    let (lat, lon) = text.split_once(',').context("--origin expects <lat>,<lon>")?;
    let lat: f64 = lat.trim().parse().context("Invalid origin latitude")?;
    let lon: f64 = lon.trim().parse().context("Invalid origin longitude")?;
    Ok((lat, lon))
}

/// Config from `--config`, else `config.toml` next to the scene, else defaults.
fn load_config(options: &RunOptions) -> Result<SimulationConfig> {
    if let Some(path) = &options.config_path {
        return SimulationConfig::load(path).map_err(anyhow::Error::msg);
    }
    let path = SimulationConfig::config_path_from_scene(&options.scene_path);
    if path.exists() {
        info!("Using config {}", path.display());
        return SimulationConfig::load(&path).map_err(anyhow::Error::msg);
    }
    Ok(SimulationConfig::default())
}

/// Parse a GeoJSON file on a background thread and stream the result into `queue`.
fn spawn_geo_import(path: &Path, options: GeoImportOptions, queue: &'static IngestQueue) -> Result<thread::JoinHandle<()>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    thread::Builder::new()
        .name("geo-import".to_string())
        .spawn(move || match GeoImport::parse(&text, options) {
            Ok(import) => {
                info!("Importing {} GeoJSON feature(s)", import.feature_count());
                // Blocks while the queue is full, pacing the import to the tick loop
                import.run(|message| embassy_futures::block_on(queue.send(message)));
            }
            Err(e) => embassy_futures::block_on(queue.send(IngestMessage::Failed(e.to_string()))),
        })
        .context("failed to spawn geo import thread")
}

fn log_event(event: &SimulationEvent) {
    match event {
        SimulationEvent::DeliveredToServer { key, hops } => info!("Server got {} ({} hop(s))", key, hops),
        SimulationEvent::OriginAcknowledged { node, key, hops, latency_ms } => match latency_ms {
            Some(latency) => info!("{} acknowledged {} after {:.0} ms, {} hop(s)", node, key, latency, hops),
            None => info!("{} acknowledged {}, {} hop(s)", node, key, hops),
        },
        SimulationEvent::ShadowDrop { node, emitter, kind } => debug!("{} missed {} from {}", node, kind, emitter),
        SimulationEvent::TtlDrop { node, key } => debug!("{} dropped {} (TTL)", node, key),
        _ => {}
    }
}

fn main() -> Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("hive_radio_simulator"), LevelFilter::Debug)
        .init();

    let options = parse_args()?;
    info!("Starting up");

    let config = load_config(&options)?;
    let scene = load_scene_file(&options.scene_path).with_context(|| format!("Could not load scene {}", options.scene_path))?;
    let mut state = SimulationState::new(config);
    let summary = state.load_scene(&scene, LoadMode::Replace);
    info!(
        "Loaded {} hive(s) and {} obstacle(s), skipped {} malformed entr(ies)",
        summary.hives, summary.obstacles, summary.skipped
    );

    // INTENTIONAL LEAK: Box::leak gives the queue the 'static lifetime the producer thread needs.
    // It lives for the whole run.
    let ingest_queue: &'static IngestQueue = Box::leak(Box::new(IngestQueue::new()));
    let mut importing = false;
    if let (Some(path), Some((lat, lon))) = (&options.geojson_path, options.origin) {
        let geo_options = GeoImportOptions::new(lat, lon, state.config().meters_per_pixel());
        spawn_geo_import(path, geo_options, ingest_queue)?;
        importing = true;
    }

    let duration_ms = options.seconds.max(0.0) * 1000.0;
    let emit_every_ms = options.emit_every_secs.max(0.1) * 1000.0;
    let mut next_emit_ms = 0.0;
    let start = Instant::now();

    loop {
        let now_ms = start.elapsed().as_secs_f64() * 1000.0;
        if now_ms >= duration_ms {
            break;
        }

        if importing {
            match drain_ingest_queue(&mut state, ingest_queue) {
                Some(IngestStatus::Finished { .. }) => {
                    info!("Scene now has {} hive(s) and {} obstacle(s)", state.hives().len(), state.obstacles().count());
                    importing = false;
                }
                Some(IngestStatus::Failed(reason)) => {
                    warn!("GeoJSON import aborted: {}", reason);
                    importing = false;
                }
                _ => {}
            }
        }

        state.tick(now_ms);

        if now_ms >= next_emit_ms {
            let ids: Vec<String> = state.hives().iter().map(|h| h.id.clone()).collect();
            for id in &ids {
                state.emit(id, WaveKind::Data, None, None);
            }
            next_emit_ms += emit_every_ms;
        }

        for event in state.drain_events() {
            log_event(&event);
        }

        thread::sleep(TICK_INTERVAL);
    }

    println!("{}", state.statistics());
    Ok(())
}
