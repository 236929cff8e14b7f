//! Stage configuration.
//!
//! Settings loaded from an INI configuration file. Provides defaults for
//! safe startup and methods to load/save configuration.
//!
//! # Configuration File Format
//!
//! ```ini
//! [surface]
//! width = 1000
//! height = 1000
//! teardown_grace_ms = 100
//!
//! [playback]
//! initial_target = idle
//! preload = false
//! time_scale = 1.0
//!
//! [device]
//! mobile = false
//! max_texture_size = 4096
//! pixel_ratio = 1.0
//! user_agent = Mozilla/5.0 (Linux x86_64)
//!
//! [assets]
//! root = ./assets
//! manifest = ./assets/atlases.json
//! threaded_loader = true
//! ```

use configparser::ini::Ini;
use log::{info, warn};
use std::path::PathBuf;

use crate::components::playback::MainState;
use crate::resources::device::{PlatformInfo, StaticDeviceProbe};
use crate::resources::surface::SurfaceConfig;

/// Default safe values for startup
const DEFAULT_SURFACE_WIDTH: u32 = 1000;
const DEFAULT_SURFACE_HEIGHT: u32 = 1000;
const DEFAULT_TEARDOWN_GRACE_MS: u32 = 100;
const DEFAULT_TIME_SCALE: f32 = 1.0;
const DEFAULT_PIXEL_RATIO: f32 = 1.0;
const DEFAULT_ASSETS_ROOT: &str = "./assets";
const DEFAULT_CONFIG_PATH: &str = "./avatar.ini";

/// Stage configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Initial surface width in logical pixels.
    pub surface_width: u32,
    /// Initial surface height in logical pixels.
    pub surface_height: u32,
    /// Delay between the last detach and surface teardown.
    pub teardown_grace_ms: u32,
    /// Target main state at startup.
    pub initial_target: MainState,
    /// Request every clip at startup.
    pub preload: bool,
    pub time_scale: f32,
    /// Force the mobile/desktop classification instead of using the user agent.
    pub mobile: Option<bool>,
    /// Reported GPU texture limit; `None` makes the query fail.
    pub max_texture_size: Option<u32>,
    pub pixel_ratio: f32,
    pub user_agent: String,
    /// Directory atlas locators are resolved against.
    pub assets_root: PathBuf,
    /// JSON atlas manifest; the built-in catalog is used when unset.
    pub manifest: Option<PathBuf>,
    /// Decode atlases on a background thread.
    pub threaded_loader: bool,
    /// Path to the configuration file.
    pub config_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create a new configuration with safe default values.
    pub fn new() -> Self {
        Self {
            surface_width: DEFAULT_SURFACE_WIDTH,
            surface_height: DEFAULT_SURFACE_HEIGHT,
            teardown_grace_ms: DEFAULT_TEARDOWN_GRACE_MS,
            initial_target: MainState::Idle,
            preload: false,
            time_scale: DEFAULT_TIME_SCALE,
            mobile: None,
            max_texture_size: None,
            pixel_ratio: DEFAULT_PIXEL_RATIO,
            user_agent: PlatformInfo::desktop().user_agent,
            assets_root: PathBuf::from(DEFAULT_ASSETS_ROOT),
            manifest: None,
            threaded_loader: false,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Create a new configuration with a custom config file path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            ..Self::new()
        }
    }

    /// Load configuration from the INI file.
    ///
    /// Missing values retain their current (default) values.
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(&mut self) -> Result<(), String> {
        let mut config = Ini::new();
        config
            .load(&self.config_path)
            .map_err(|e| format!("Failed to load config file: {}", e))?;
        self.apply(&config);

        info!(
            "Loaded config: {}x{} surface, target={}, preload={}, assets={:?}, threaded={}",
            self.surface_width,
            self.surface_height,
            self.initial_target,
            self.preload,
            self.assets_root,
            self.threaded_loader
        );

        Ok(())
    }

    /// Same as [`load_from_file`](Self::load_from_file) but from INI text.
    pub fn load_from_str(&mut self, text: &str) -> Result<(), String> {
        let mut config = Ini::new();
        config
            .read(text.to_string())
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        self.apply(&config);
        Ok(())
    }

    fn apply(&mut self, config: &Ini) {
        // [surface] section
        if let Some(width) = config.getuint("surface", "width").ok().flatten() {
            self.surface_width = width as u32;
        }
        if let Some(height) = config.getuint("surface", "height").ok().flatten() {
            self.surface_height = height as u32;
        }
        if let Some(ms) = config.getuint("surface", "teardown_grace_ms").ok().flatten() {
            self.teardown_grace_ms = ms as u32;
        }

        // [playback] section
        if let Some(name) = config.get("playback", "initial_target") {
            match MainState::parse(&name) {
                Some(state) => self.initial_target = state,
                None => warn!("Unknown initial_target '{}', keeping {}", name, self.initial_target),
            }
        }
        if let Some(preload) = config.getbool("playback", "preload").ok().flatten() {
            self.preload = preload;
        }
        if let Some(scale) = config.getfloat("playback", "time_scale").ok().flatten() {
            self.time_scale = scale as f32;
        }

        // [device] section
        if let Some(mobile) = config.getbool("device", "mobile").ok().flatten() {
            self.mobile = Some(mobile);
        }
        if let Some(max) = config.getuint("device", "max_texture_size").ok().flatten() {
            self.max_texture_size = Some(max as u32);
        }
        if let Some(ratio) = config.getfloat("device", "pixel_ratio").ok().flatten() {
            self.pixel_ratio = ratio as f32;
        }
        if let Some(ua) = config.get("device", "user_agent") {
            self.user_agent = ua;
        }

        // [assets] section
        if let Some(root) = config.get("assets", "root") {
            self.assets_root = PathBuf::from(root);
        }
        if let Some(manifest) = config.get("assets", "manifest") {
            self.manifest = Some(PathBuf::from(manifest));
        }
        if let Some(threaded) = config.getbool("assets", "threaded_loader").ok().flatten() {
            self.threaded_loader = threaded;
        }
    }

    /// Save configuration to the INI file.
    ///
    /// Creates the file if it doesn't exist.
    pub fn save_to_file(&self) -> Result<(), String> {
        let mut config = Ini::new();

        // [surface] section
        config.set("surface", "width", Some(self.surface_width.to_string()));
        config.set("surface", "height", Some(self.surface_height.to_string()));
        config.set(
            "surface",
            "teardown_grace_ms",
            Some(self.teardown_grace_ms.to_string()),
        );

        // [playback] section
        config.set(
            "playback",
            "initial_target",
            Some(self.initial_target.as_str().to_string()),
        );
        config.set("playback", "preload", Some(self.preload.to_string()));
        config.set("playback", "time_scale", Some(self.time_scale.to_string()));

        // [device] section
        if let Some(mobile) = self.mobile {
            config.set("device", "mobile", Some(mobile.to_string()));
        }
        if let Some(max) = self.max_texture_size {
            config.set("device", "max_texture_size", Some(max.to_string()));
        }
        config.set("device", "pixel_ratio", Some(self.pixel_ratio.to_string()));
        config.set("device", "user_agent", Some(self.user_agent.clone()));

        // [assets] section
        config.set(
            "assets",
            "root",
            Some(self.assets_root.display().to_string()),
        );
        if let Some(manifest) = &self.manifest {
            config.set("assets", "manifest", Some(manifest.display().to_string()));
        }
        config.set(
            "assets",
            "threaded_loader",
            Some(self.threaded_loader.to_string()),
        );

        config
            .write(&self.config_path)
            .map_err(|e| format!("Failed to save config file: {}", e))?;

        info!("Saved config to {:?}", self.config_path);

        Ok(())
    }

    /// Surface parameters derived from this configuration.
    pub fn surface_config(&self) -> SurfaceConfig {
        SurfaceConfig {
            width: self.surface_width,
            height: self.surface_height,
            pixel_ratio: self.pixel_ratio,
            teardown_grace: self.teardown_grace_ms as f32 / 1000.0,
        }
    }

    /// Device probe answering from the `[device]` section.
    pub fn device_probe(&self) -> StaticDeviceProbe {
        let platform = match self.mobile {
            Some(true) => PlatformInfo::android(),
            Some(false) => PlatformInfo::desktop(),
            None => PlatformInfo {
                user_agent: self.user_agent.clone(),
                ..PlatformInfo::desktop()
            },
        };
        StaticDeviceProbe {
            platform,
            max_texture_dimension: self.max_texture_size,
            pixel_ratio: self.pixel_ratio,
        }
    }
}
