//! Shared render surface with ref-counted mount points.
//!
//! Several UI mount points may want to show the avatar, but only one render
//! surface is ever created. [`RenderSurfaceManager`] keeps the set of
//! attached mounts and moves the surface's output to the most recently
//! attached one. When the last mount detaches the surface is torn down after
//! a short grace period, so a detach/attach pair during a UI re-layout keeps
//! the same surface.
//!
//! Initialization is two-step: [`RenderSurfaceManager::attach`] hands out a
//! pending [`AttachHandle`], and [`RenderSurfaceManager::complete_initialization`]
//! creates the surface once the first clip is ready (the stage calls it from
//! `tick`). Every attach that arrives meanwhile shares the same pending slot.
//!
//! # Related
//!
//! - [`crate::systems::canvas`] – software surface backend
//! - [`crate::stage::AvatarStage`] – owns the manager and drives it

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use log::{debug, error, info};
use smallvec::SmallVec;

use crate::error::{AvatarError, AvatarResult};
use crate::systems::sequence::Visual;

/// Default delay between the last detach and surface teardown.
pub const DEFAULT_TEARDOWN_GRACE: f32 = 0.1;

/// Opaque identifier of a host mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(pub u64);

impl std::fmt::Display for MountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mount#{}", self.0)
    }
}

/// Surface creation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
    /// Seconds to wait after the last detach before tearing down.
    pub teardown_grace: f32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 1000,
            pixel_ratio: 1.0,
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
        }
    }
}

/// Placement of the sprite inside the surface: centered, uniformly scaled to
/// fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteTransform {
    pub center_x: f32,
    pub center_y: f32,
    pub scale: f32,
}

impl SpriteTransform {
    /// Fit a `native` sized frame into a `width` x `height` surface.
    pub fn fit(width: u32, height: u32, native: (f32, f32)) -> Self {
        let (w, h) = (width as f32, height as f32);
        let scale = if native.0 > 0.0 && native.1 > 0.0 {
            (w / native.0).min(h / native.1)
        } else {
            1.0
        };
        Self {
            center_x: w / 2.0,
            center_y: h / 2.0,
            scale,
        }
    }
}

/// A live drawing surface.
pub trait RenderSurface {
    /// Route output to `mount`.
    fn attach_to(&mut self, mount: MountId);
    fn resize(&mut self, width: u32, height: u32);
    fn set_pixel_ratio(&mut self, pixel_ratio: f32);
    fn present(&mut self, visual: &Visual, transform: SpriteTransform);

    fn size(&self) -> (u32, u32);
    fn mount(&self) -> Option<MountId>;
    fn pixel_ratio(&self) -> f32;
    /// Frames presented since creation.
    fn presented(&self) -> u64;

    fn snapshot(&self, path: &Path) -> Result<(), String> {
        Err(format!("snapshots are not supported ({})", path.display()))
    }
}

/// Creates render surfaces.
pub trait SurfaceBackend {
    fn create(&mut self, config: &SurfaceConfig) -> Result<Box<dyn RenderSurface>, String>;
}

/// State of an [`AttachHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttachStatus {
    Pending,
    Attached,
    Failed(AvatarError),
    /// Every mount detached before the surface was created.
    Cancelled,
}

type AttachSlot = Rc<RefCell<AttachStatus>>;

/// Pollable result of [`RenderSurfaceManager::attach`].
#[derive(Debug, Clone)]
pub struct AttachHandle {
    mount: MountId,
    slot: AttachSlot,
}

impl AttachHandle {
    fn settled(mount: MountId, status: AttachStatus) -> Self {
        Self {
            mount,
            slot: Rc::new(RefCell::new(status)),
        }
    }

    pub fn mount(&self) -> MountId {
        self.mount
    }

    pub fn poll(&self) -> AttachStatus {
        self.slot.borrow().clone()
    }

    pub fn is_attached(&self) -> bool {
        matches!(*self.slot.borrow(), AttachStatus::Attached)
    }

    pub fn shares_slot_with(&self, other: &AttachHandle) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

enum Phase {
    Detached,
    Initializing(AttachSlot),
    Live(Box<dyn RenderSurface>),
}

/// Owner of the single render surface.
pub struct RenderSurfaceManager {
    backend: Box<dyn SurfaceBackend>,
    config: SurfaceConfig,
    phase: Phase,
    /// Attached mounts in attach order; the last one is active.
    mounts: SmallVec<[MountId; 4]>,
    teardown_in: Option<f32>,
    created: usize,
    torn_down: usize,
}

impl RenderSurfaceManager {
    pub fn new(backend: Box<dyn SurfaceBackend>, config: SurfaceConfig) -> Self {
        Self {
            backend,
            config,
            phase: Phase::Detached,
            mounts: SmallVec::new(),
            teardown_in: None,
            created: 0,
            torn_down: 0,
        }
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// Attach `mount`. Attaching an already attached mount is a no-op.
    pub fn attach(&mut self, mount: MountId) -> AttachHandle {
        if self.teardown_in.take().is_some() {
            debug!("{} attached during teardown grace; keeping surface", mount);
        }

        let already = self.mounts.contains(&mount);
        if !already {
            self.mounts.push(mount);
        }

        match &mut self.phase {
            Phase::Live(surface) => {
                if !already {
                    info!("moving surface to {}", mount);
                    surface.attach_to(mount);
                }
                AttachHandle::settled(mount, AttachStatus::Attached)
            }
            Phase::Initializing(slot) => AttachHandle {
                mount,
                slot: Rc::clone(slot),
            },
            Phase::Detached => {
                info!("initializing render surface for {}", mount);
                let slot: AttachSlot = Rc::new(RefCell::new(AttachStatus::Pending));
                self.phase = Phase::Initializing(Rc::clone(&slot));
                AttachHandle { mount, slot }
            }
        }
    }

    /// Detach `mount`. Output moves to the most recent remaining mount; with
    /// none left, teardown is scheduled.
    pub fn detach(&mut self, mount: MountId) {
        let Some(pos) = self.mounts.iter().position(|m| *m == mount) else {
            return;
        };
        let was_active = pos + 1 == self.mounts.len();
        self.mounts.remove(pos);

        match (&mut self.phase, self.mounts.last().copied()) {
            (Phase::Live(surface), Some(next)) if was_active => {
                info!("{} detached; output moves to {}", mount, next);
                surface.attach_to(next);
            }
            (Phase::Live(_), None) => {
                debug!(
                    "last mount detached; teardown in {:.0} ms",
                    self.config.teardown_grace * 1000.0
                );
                self.teardown_in = Some(self.config.teardown_grace.max(0.0));
            }
            _ => {}
        }
    }

    /// Resize the surface. Only the active mount may resize it; zero sizes
    /// are ignored.
    pub fn resize(&mut self, mount: MountId, width: u32, height: u32) {
        if width == 0 || height == 0 || self.active_mount() != Some(mount) {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        if let Phase::Live(surface) = &mut self.phase {
            surface.resize(width, height);
        }
    }

    pub fn set_pixel_ratio(&mut self, pixel_ratio: f32) {
        if !(pixel_ratio.is_finite() && pixel_ratio > 0.0) {
            return;
        }
        self.config.pixel_ratio = pixel_ratio;
        if let Phase::Live(surface) = &mut self.phase {
            surface.set_pixel_ratio(pixel_ratio);
        }
    }

    /// Create the surface for a pending attach.
    ///
    /// Does nothing unless initialization is pending. If every mount left in
    /// the meantime the result is discarded. A backend failure fails every
    /// waiting handle and resets the manager so a later attach retries.
    pub fn complete_initialization(&mut self) -> AvatarResult<()> {
        let slot = match std::mem::replace(&mut self.phase, Phase::Detached) {
            Phase::Initializing(slot) => slot,
            other => {
                self.phase = other;
                return Ok(());
            }
        };

        let Some(active) = self.mounts.last().copied() else {
            info!("all mounts detached before the surface was ready; discarding");
            *slot.borrow_mut() = AttachStatus::Cancelled;
            return Ok(());
        };

        match self.backend.create(&self.config) {
            Ok(mut surface) => {
                self.created += 1;
                surface.attach_to(active);
                info!(
                    "render surface ready ({}x{} @{}x) on {}",
                    self.config.width, self.config.height, self.config.pixel_ratio, active
                );
                self.phase = Phase::Live(surface);
                *slot.borrow_mut() = AttachStatus::Attached;
                Ok(())
            }
            Err(msg) => {
                let err = AvatarError::surface_init(msg);
                error!("{}", err);
                self.mounts.clear();
                *slot.borrow_mut() = AttachStatus::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// Run the teardown timer. Returns `true` on the tick the surface is
    /// torn down.
    pub fn update(&mut self, delta: f32) -> bool {
        let Some(remaining) = self.teardown_in.as_mut() else {
            return false;
        };
        *remaining -= delta.max(0.0);
        if *remaining > 0.0 {
            return false;
        }
        self.teardown_in = None;
        if self.mounts.is_empty() && matches!(self.phase, Phase::Live(_)) {
            info!("tearing down render surface");
            self.phase = Phase::Detached;
            self.torn_down += 1;
            return true;
        }
        false
    }

    /// Draw `visual` on the live surface, fitted to the clip's native size.
    pub fn present(&mut self, visual: &Visual, native: Option<(f32, f32)>) {
        if self.mounts.is_empty() {
            return;
        }
        let (width, height) = (self.config.width, self.config.height);
        if let Phase::Live(surface) = &mut self.phase {
            let native = native.unwrap_or((width as f32, height as f32));
            surface.present(visual, SpriteTransform::fit(width, height, native));
        }
    }

    pub fn snapshot(&self, path: &Path) -> Result<(), String> {
        match &self.phase {
            Phase::Live(surface) => surface.snapshot(path),
            _ => Err("no live render surface".into()),
        }
    }

    pub fn active_mount(&self) -> Option<MountId> {
        self.mounts.last().copied()
    }

    pub fn mounts(&self) -> &[MountId] {
        &self.mounts
    }

    pub fn is_attached(&self, mount: MountId) -> bool {
        self.mounts.contains(&mount)
    }

    pub fn is_initializing(&self) -> bool {
        matches!(self.phase, Phase::Initializing(_))
    }

    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live(_))
    }

    pub fn teardown_pending(&self) -> bool {
        self.teardown_in.is_some()
    }

    pub fn surface(&self) -> Option<&dyn RenderSurface> {
        match &self.phase {
            Phase::Live(surface) => Some(surface.as_ref()),
            _ => None,
        }
    }

    /// Surfaces created over the manager's lifetime.
    pub fn surfaces_created(&self) -> usize {
        self.created
    }

    pub fn teardowns(&self) -> usize {
        self.torn_down
    }
}

impl std::fmt::Debug for RenderSurfaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            Phase::Detached => "detached",
            Phase::Initializing(_) => "initializing",
            Phase::Live(_) => "live",
        };
        f.debug_struct("RenderSurfaceManager")
            .field("phase", &phase)
            .field("mounts", &self.mounts)
            .field("config", &self.config)
            .field("teardown_in", &self.teardown_in)
            .finish()
    }
}
