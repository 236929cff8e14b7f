//! Aberred Avatar headless demo.
//!
//! Drives an [`AvatarStage`] with a simulated host clock and renders into the
//! software canvas, optionally writing PNG snapshots. Target changes come
//! from a `--script` of `seconds:state` pairs and/or random picks, so the
//! graceful transition rules can be watched in the log.
//!
//! # Main Loop
//!
//! 1. Load `avatar.ini` (defaults when missing) and apply CLI overrides
//! 2. Build the stage, register logging observers, attach one mount point
//! 3. Tick at `--host-fps` with optional jitter until `--duration` elapses
//! 4. Detach and let the surface grace period run out
//!
//! # Running
//!
//! ```sh
//! cargo run --release -- --synthetic --script 1:writing,4:talking,8:idle
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, warn};

use aberredavatar::components::playback::MainState;
use aberredavatar::events::loader::CacheEvent;
use aberredavatar::resources::engineconfig::EngineConfig;
use aberredavatar::resources::surface::MountId;
use aberredavatar::stage::AvatarStage;
use aberredavatar::systems::atlasloader::{AtlasSource, FileAtlasSource, SyntheticAtlasSource};
use aberredavatar::systems::canvas::CanvasBackend;

const DEMO_MOUNT: MountId = MountId(1);

#[derive(Parser)]
#[command(version, about = "Headless playback demo for the Aberred Avatar engine")]
struct Cli {
    /// INI configuration file.
    #[arg(long, value_name = "PATH", default_value = "./avatar.ini")]
    config: PathBuf,

    /// JSON atlas manifest (overrides the config file).
    #[arg(long, value_name = "PATH")]
    manifest: Option<PathBuf>,

    /// Directory atlas locators are resolved against.
    #[arg(long, value_name = "DIR")]
    assets: Option<PathBuf>,

    /// Target changes as `seconds:state` pairs, e.g. `1.5:writing,6:idle`.
    #[arg(long, value_delimiter = ',')]
    script: Vec<String>,

    /// Simulated seconds to run.
    #[arg(long, default_value_t = 10.0)]
    duration: f32,

    /// Simulated host callback rate.
    #[arg(long, default_value_t = 60.0)]
    host_fps: f32,

    /// Random variation of each host delta, as a fraction (0.3 = +/-30%).
    #[arg(long, default_value_t = 0.0)]
    jitter: f32,

    /// Pick a random target every N seconds (0 disables).
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    random_targets: f32,

    /// Write presented frames as PNG files into this directory.
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Keep every Nth presented frame when snapshotting.
    #[arg(long, default_value_t = 30)]
    snapshot_every: u64,

    /// Use pixel-less atlases instead of reading image files.
    #[arg(long)]
    synthetic: bool,
}

/// Parse `seconds:state` entries, sorted by time.
fn parse_script(entries: &[String]) -> Result<Vec<(f32, MainState)>, String> {
    let mut script = Vec::with_capacity(entries.len());
    for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let (time, state) = entry
            .split_once(':')
            .ok_or_else(|| format!("script entry '{}' is not seconds:state", entry))?;
        let time: f32 = time
            .trim()
            .parse()
            .map_err(|e| format!("bad time in '{}': {}", entry, e))?;
        let state = MainState::parse(state.trim())
            .ok_or_else(|| format!("unknown state in '{}'", entry))?;
        script.push((time, state));
    }
    script.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(script)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = EngineConfig::with_path(&cli.config);
    config.load_from_file().ok(); // ignore errors, use defaults
    if let Some(manifest) = cli.manifest.clone() {
        config.manifest = Some(manifest);
    }
    if let Some(assets) = cli.assets.clone() {
        config.assets_root = assets;
    }

    let script = match parse_script(&cli.script) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let source: Arc<dyn AtlasSource> = if cli.synthetic {
        Arc::new(SyntheticAtlasSource)
    } else {
        Arc::new(FileAtlasSource::new(&config.assets_root))
    };
    let backend = match &cli.snapshot_dir {
        Some(dir) => CanvasBackend::with_snapshots(dir, cli.snapshot_every),
        None => CanvasBackend::new(),
    };

    let mut stage = match AvatarStage::with_parts(&config, source, Box::new(backend)) {
        Ok(stage) => stage,
        Err(e) => {
            eprintln!("Error building stage: {e}");
            std::process::exit(1);
        }
    };

    stage.on_state_change(|ev| info!("state {} -> {}", ev.previous, ev.current));
    stage.on_clip_complete(|ev| debug!("clip complete: {}", ev.state));
    stage.on_error(|ev| warn!("playback error in {}: {}", ev.state, ev.error));
    stage.on_cache_event(|ev| match ev {
        CacheEvent::Loaded { key, locator } => info!("loaded {} from {}", key, locator),
        other => debug!("cache: {:?}", other),
    });

    info!("Hello, world! This is the Aberred Avatar demo!");
    if let Err(e) = stage.attach(DEMO_MOUNT) {
        eprintln!("Error starting playback: {e}");
        std::process::exit(1);
    }

    let base_delta = 1.0 / cli.host_fps.max(1.0);
    let jitter = cli.jitter.clamp(0.0, 0.95);
    let mut elapsed = 0.0_f32;
    let mut next_script = 0;
    let mut next_random = cli.random_targets;

    while elapsed < cli.duration {
        while next_script < script.len() && script[next_script].0 <= elapsed {
            let target = script[next_script].1;
            info!("[{:.2}s] script target {}", elapsed, target);
            stage.set_target_state(target);
            next_script += 1;
        }
        if cli.random_targets > 0.0 && elapsed >= next_random {
            let target = MainState::ALL[fastrand::usize(..MainState::ALL.len())];
            info!("[{:.2}s] random target {}", elapsed, target);
            stage.set_target_state(target);
            next_random += cli.random_targets;
        }

        let dt = base_delta * (1.0 + jitter * (fastrand::f32() * 2.0 - 1.0));
        if let Err(e) = stage.tick(dt) {
            error!("tick failed: {}", e);
            break;
        }
        elapsed += dt;
    }

    let presented = stage
        .surfaces()
        .surface()
        .map(|s| s.presented())
        .unwrap_or_default();

    // Let the surface teardown grace period run out.
    stage.detach(DEMO_MOUNT);
    let grace = config.surface_config().teardown_grace;
    let mut waited = 0.0;
    while stage.surfaces().teardown_pending() && waited <= grace + base_delta {
        let _ = stage.tick(base_delta);
        waited += base_delta;
    }

    info!(
        "Finished after {:.2}s ({} ticks) in {}; cache {:?}; surfaces created {}, torn down {}, frames presented {}",
        stage.time().elapsed,
        stage.time().frame_count,
        stage.current_state(),
        stage.stats(),
        stage.surfaces().surfaces_created(),
        stage.surfaces().teardowns(),
        presented
    );
}
