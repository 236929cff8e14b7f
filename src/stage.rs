//! Avatar stage: the host-facing facade.
//!
//! [`AvatarStage`] owns the three services and wires them together:
//!
//! - [`ResourceCache`] – clip loading, device-aware variant choice
//! - [`SequenceController`] – state machine and frame driver
//! - [`RenderSurfaceManager`] – the single shared surface
//!
//! The host calls [`AvatarStage::tick`] once per frame with the elapsed
//! seconds. A tick:
//!
//! 1. advances [`WorldTime`],
//! 2. pumps finished loads into the cache,
//! 3. samples frame time for the low-performance monitor,
//! 4. updates the controller,
//! 5. completes a pending surface initialization once the first clip is
//!    ready (or has failed),
//! 6. runs the surface teardown timer and presents the current visual.
//!
//! Once the last mount is gone (the surface torn down, or every mount left
//! before it was created) playback stops; loads landing after that are
//! dropped. The next [`AvatarStage::attach`] resumes from the held state.
//!
//! # Example
//!
//! ```ignore
//! let mut stage = AvatarStage::from_config(&EngineConfig::new())?;
//! stage.attach(MountId(1))?;
//! stage.set_target_state(MainState::Talking);
//! loop {
//!     stage.tick(1.0 / 60.0)?;
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::components::playback::{MainState, PlaybackState};
use crate::error::AvatarResult;
use crate::events::loader::CacheEvent;
use crate::events::observers::ObserverId;
use crate::events::playback::{ClipCompleteEvent, PlaybackErrorEvent, StateChangeEvent};
use crate::resources::atlascatalog::AtlasCatalog;
use crate::resources::device::DeviceCapabilities;
use crate::resources::engineconfig::EngineConfig;
use crate::resources::loader::{InlineExecutor, LoadExecutor, ThreadedExecutor};
use crate::resources::resourcecache::{AtlasHandle, CacheStats, ResourceCache};
use crate::resources::surface::{AttachHandle, MountId, RenderSurfaceManager, SurfaceBackend};
use crate::resources::worldtime::WorldTime;
use crate::systems::atlasloader::{AtlasSource, FileAtlasSource};
use crate::systems::canvas::CanvasBackend;
use crate::systems::sequence::{SequenceController, Visual};

/// Host-facing avatar playback engine.
pub struct AvatarStage {
    cache: ResourceCache,
    controller: SequenceController,
    surfaces: RenderSurfaceManager,
    time: WorldTime,
}

impl AvatarStage {
    pub fn new(cache: ResourceCache, surfaces: RenderSurfaceManager) -> Self {
        Self {
            cache,
            controller: SequenceController::new(),
            surfaces,
            time: WorldTime::default(),
        }
    }

    /// Build a stage from configuration: files under `assets_root`, the
    /// manifest (or the built-in catalog) and a headless canvas.
    pub fn from_config(config: &EngineConfig) -> Result<Self, String> {
        let source = Arc::new(FileAtlasSource::new(&config.assets_root));
        Self::with_parts(config, source, Box::new(CanvasBackend::new()))
    }

    /// Build a stage from configuration with a custom atlas source and
    /// surface backend.
    pub fn with_parts(
        config: &EngineConfig,
        source: Arc<dyn AtlasSource>,
        backend: Box<dyn SurfaceBackend>,
    ) -> Result<Self, String> {
        let catalog = match &config.manifest {
            Some(path) => AtlasCatalog::load_json(path)?,
            None => AtlasCatalog::builtin(),
        };
        if let Err(e) = catalog.validate_states() {
            warn!("atlas catalog is incomplete: {}", e);
        }

        let executor: Box<dyn LoadExecutor> = if config.threaded_loader {
            Box::new(ThreadedExecutor::spawn(source)?)
        } else {
            Box::new(InlineExecutor::new(source))
        };
        let device = DeviceCapabilities::new(config.device_probe());
        let cache = ResourceCache::new(catalog, device, executor);
        let surfaces = RenderSurfaceManager::new(backend, config.surface_config());

        let mut stage = Self::new(cache, surfaces);
        stage.time = WorldTime::with_time_scale(config.time_scale);
        stage.set_target_state(config.initial_target);
        if config.preload {
            stage.preload_all().map_err(|e| e.to_string())?;
        }
        Ok(stage)
    }

    pub fn set_target_state(&mut self, target: MainState) {
        self.controller.set_target_state(target);
    }

    pub fn current_state(&self) -> PlaybackState {
        self.controller.current_state()
    }

    pub fn target_state(&self) -> MainState {
        self.controller.target_state()
    }

    pub fn on_state_change(&mut self, cb: impl FnMut(&StateChangeEvent) + 'static) -> ObserverId {
        self.controller.on_state_change(cb)
    }

    pub fn on_clip_complete(
        &mut self,
        cb: impl FnMut(&ClipCompleteEvent) + 'static,
    ) -> ObserverId {
        self.controller.on_clip_complete(cb)
    }

    pub fn on_error(&mut self, cb: impl FnMut(&PlaybackErrorEvent) + 'static) -> ObserverId {
        self.controller.on_error(cb)
    }

    pub fn on_cache_event(&mut self, cb: impl FnMut(&CacheEvent) + 'static) -> ObserverId {
        self.cache.subscribe(cb)
    }

    /// Remove any observer registered through this stage. Idempotent.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.controller.remove_observer(id) | self.cache.unsubscribe(id)
    }

    /// Begin playback without a mount point (headless hosts).
    pub fn start(&mut self) -> AvatarResult<()> {
        self.controller.start(&mut self.cache)
    }

    /// Attach a mount point. The first attach starts playback; the surface
    /// is created once the first clip is ready.
    ///
    /// Playback is started before the mount is registered, so a state with
    /// no descriptor leaves the surface manager untouched.
    pub fn attach(&mut self, mount: MountId) -> AvatarResult<AttachHandle> {
        self.controller.start(&mut self.cache)?;
        Ok(self.surfaces.attach(mount))
    }

    pub fn detach(&mut self, mount: MountId) {
        self.surfaces.detach(mount);
    }

    pub fn resize(&mut self, mount: MountId, width: u32, height: u32) {
        self.surfaces.resize(mount, width, height);
    }

    /// Display density changed: reset low-performance tracking and resize
    /// the surface backing store.
    pub fn on_pixel_ratio_changed(&mut self, pixel_ratio: f32) {
        self.cache.device_mut().on_pixel_ratio_changed(pixel_ratio);
        self.controller.set_low_performance(false);
        self.surfaces.set_pixel_ratio(pixel_ratio);
    }

    /// Advance everything by `dt` host seconds.
    ///
    /// Errors come from the controller (a state without descriptors). The
    /// surface is still updated and presented before the error is returned.
    pub fn tick(&mut self, dt: f32) -> AvatarResult<()> {
        let delta = self.time.advance(dt);
        self.cache.pump();

        let device = self.cache.device_mut();
        device.record_frame_time(self.time.raw_delta);
        let low_performance = device.is_low_performance();
        self.controller.set_low_performance(low_performance);

        let result = self.controller.update(delta, &mut self.cache);

        if self.surfaces.is_initializing()
            && (self.surfaces.mounts().is_empty()
                || self.controller.is_clip_ready()
                || self.controller.is_failed())
        {
            let abandoned = self.surfaces.mounts().is_empty();
            // Failure is delivered through the attach handles.
            let _ = self.surfaces.complete_initialization();
            if abandoned {
                self.controller.stop();
            }
        }
        if self.surfaces.update(self.time.raw_delta) {
            // Nothing shows the avatar any more; the next attach resumes.
            self.controller.stop();
        }
        self.surfaces
            .present(&self.controller.visual(), self.controller.native_size());

        result
    }

    /// Request every clip so later transitions never wait on a load.
    pub fn preload_all(&mut self) -> AvatarResult<Vec<AtlasHandle>> {
        let handles = self.cache.preload_all()?;
        info!("preloading {} clip(s)", handles.len());
        Ok(handles)
    }

    pub fn visual(&self) -> Visual {
        self.controller.visual()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn snapshot(&self, path: &Path) -> Result<(), String> {
        self.surfaces.snapshot(path)
    }

    pub fn time(&self) -> &WorldTime {
        &self.time
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResourceCache {
        &mut self.cache
    }

    pub fn controller(&self) -> &SequenceController {
        &self.controller
    }

    pub fn surfaces(&self) -> &RenderSurfaceManager {
        &self.surfaces
    }
}

impl std::fmt::Debug for AvatarStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarStage")
            .field("controller", &self.controller)
            .field("cache", &self.cache)
            .field("surfaces", &self.surfaces)
            .field("time", &self.time)
            .finish()
    }
}
