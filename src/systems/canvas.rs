//! Headless software canvas.
//!
//! [`CanvasBackend`] creates [`CanvasSurface`]s: RGBA buffers sized
//! `width * pixel_ratio` by `height * pixel_ratio`. Frames are blitted with
//! nearest-neighbour sampling, centered and scaled by the
//! [`SpriteTransform`]. Atlases without pixel data (synthetic sources) are
//! drawn as a flat tile tinted by the frame position, and the fallback visual
//! is a grey placeholder square.
//!
//! Snapshots are written as PNG with the `image` crate.

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use log::{debug, info, warn};

use crate::components::atlas::{FrameRegion, FrameSet};
use crate::resources::surface::{
    MountId, RenderSurface, SpriteTransform, SurfaceBackend, SurfaceConfig,
};
use crate::systems::sequence::Visual;

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
const FALLBACK_FILL: Rgba<u8> = Rgba([96, 96, 96, 255]);

/// Creates [`CanvasSurface`]s.
#[derive(Debug, Clone, Default)]
pub struct CanvasBackend {
    /// When set, every presented frame is also written here as
    /// `frame-NNNNNN.png`.
    pub snapshot_dir: Option<PathBuf>,
    /// Keep every Nth presented frame when `snapshot_dir` is set.
    pub snapshot_every: u64,
}

impl CanvasBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(dir: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            snapshot_dir: Some(dir.into()),
            snapshot_every: every.max(1),
        }
    }
}

impl SurfaceBackend for CanvasBackend {
    fn create(&mut self, config: &SurfaceConfig) -> Result<Box<dyn RenderSurface>, String> {
        if config.width == 0 || config.height == 0 {
            return Err(format!(
                "invalid canvas size {}x{}",
                config.width, config.height
            ));
        }
        if let Some(dir) = &self.snapshot_dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create snapshot dir {:?}: {}", dir, e))?;
        }
        let mut surface = CanvasSurface::new(config.width, config.height, config.pixel_ratio);
        surface.snapshot_dir = self.snapshot_dir.clone();
        surface.snapshot_every = self.snapshot_every.max(1);
        Ok(Box::new(surface))
    }
}

/// RGBA software surface.
#[derive(Debug, Clone)]
pub struct CanvasSurface {
    width: u32,
    height: u32,
    pixel_ratio: f32,
    mount: Option<MountId>,
    canvas: RgbaImage,
    presented: u64,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u64,
}

impl CanvasSurface {
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Self {
        let mut surface = Self {
            width,
            height,
            pixel_ratio,
            mount: None,
            canvas: RgbaImage::new(1, 1),
            presented: 0,
            snapshot_dir: None,
            snapshot_every: 1,
        };
        surface.reallocate();
        surface
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    fn physical_size(&self) -> (u32, u32) {
        let scale = |v: u32| ((v as f32 * self.pixel_ratio).round() as u32).max(1);
        (scale(self.width), scale(self.height))
    }

    fn reallocate(&mut self) {
        let (w, h) = self.physical_size();
        self.canvas = RgbaImage::from_pixel(w, h, CLEAR);
    }

    /// Destination rectangle (x0, y0, x1, y1) in physical pixels, clipped.
    fn dest_rect(&self, frame_w: f32, frame_h: f32, t: SpriteTransform) -> (i64, i64, i64, i64) {
        let r = self.pixel_ratio;
        let w = frame_w * t.scale * r;
        let h = frame_h * t.scale * r;
        let x0 = (t.center_x * r - w / 2.0).round() as i64;
        let y0 = (t.center_y * r - h / 2.0).round() as i64;
        let x1 = x0 + w.round() as i64;
        let y1 = y0 + h.round() as i64;
        let (cw, ch) = (self.canvas.width() as i64, self.canvas.height() as i64);
        (x0.max(0), y0.max(0), x1.min(cw), y1.min(ch))
    }

    fn fill(&mut self, rect: (i64, i64, i64, i64), color: Rgba<u8>) {
        let (x0, y0, x1, y1) = rect;
        for y in y0..y1 {
            for x in x0..x1 {
                self.canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    }

    fn blit(&mut self, frames: &FrameSet, region: FrameRegion, t: SpriteTransform) {
        let (native_w, native_h) = frames.native_size();
        let rect = self.dest_rect(native_w, native_h, t);
        let Some(pixels) = frames.source.pixels.as_ref() else {
            self.fill(rect, placeholder_tint(&region));
            return;
        };

        let r = self.pixel_ratio;
        let full_w = native_w * t.scale * r;
        let full_h = native_h * t.scale * r;
        if full_w <= 0.0 || full_h <= 0.0 {
            return;
        }
        let origin_x = t.center_x * r - full_w / 2.0;
        let origin_y = t.center_y * r - full_h / 2.0;
        let (x0, y0, x1, y1) = rect;
        for y in y0..y1 {
            // Map the destination pixel back to the cell, then into the inset region.
            let v = ((y as f32 + 0.5 - origin_y) / full_h * region.height as f32) as u32;
            let sy = region.y + v.min(region.height.saturating_sub(1));
            for x in x0..x1 {
                let u = ((x as f32 + 0.5 - origin_x) / full_w * region.width as f32) as u32;
                let sx = region.x + u.min(region.width.saturating_sub(1));
                if sx < pixels.width() && sy < pixels.height() {
                    self.canvas
                        .put_pixel(x as u32, y as u32, *pixels.get_pixel(sx, sy));
                }
            }
        }
    }

    fn auto_snapshot(&self) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        if self.presented % self.snapshot_every != 0 {
            return;
        }
        let path = dir.join(format!("frame-{:06}.png", self.presented));
        if let Err(e) = self.snapshot(&path) {
            warn!("{}", e);
        }
    }
}

/// Flat colour standing in for a pixel-less frame, derived from its position.
fn placeholder_tint(region: &FrameRegion) -> Rgba<u8> {
    let r = (region.x / 4 % 200) as u8 + 40;
    let g = (region.y / 4 % 200) as u8 + 40;
    Rgba([r, g, 160, 255])
}

impl RenderSurface for CanvasSurface {
    fn attach_to(&mut self, mount: MountId) {
        debug!("canvas attached to {}", mount);
        self.mount = Some(mount);
    }

    fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.reallocate();
    }

    fn set_pixel_ratio(&mut self, pixel_ratio: f32) {
        if (pixel_ratio - self.pixel_ratio).abs() < f32::EPSILON {
            return;
        }
        self.pixel_ratio = pixel_ratio;
        self.reallocate();
    }

    fn present(&mut self, visual: &Visual, transform: SpriteTransform) {
        for px in self.canvas.pixels_mut() {
            *px = CLEAR;
        }
        match visual {
            Visual::Empty => {}
            Visual::Fallback => {
                let side = self.width.min(self.height) as f32 / 2.0;
                let rect = self.dest_rect(side, side, SpriteTransform { scale: 1.0, ..transform });
                self.fill(rect, FALLBACK_FILL);
            }
            Visual::Frame { frames, region } => self.blit(frames, *region, transform),
        }
        self.presented += 1;
        self.auto_snapshot();
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn mount(&self) -> Option<MountId> {
        self.mount
    }

    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn presented(&self) -> u64 {
        self.presented
    }

    fn snapshot(&self, path: &Path) -> Result<(), String> {
        self.canvas
            .save(path)
            .map_err(|e| format!("Failed to write snapshot {:?}: {}", path, e))?;
        info!("wrote snapshot {:?}", path);
        Ok(())
    }
}
