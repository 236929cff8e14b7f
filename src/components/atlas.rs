//! Atlas data: descriptors, decoded images, frame regions and frame sets.
//!
//! An [`AtlasDescriptor`] describes one packed sprite sheet at one resolution.
//! Several descriptors for the same clip form a [`VariantSet`]; the
//! [`ResourceCache`](crate::resources::resourcecache::ResourceCache) picks one
//! of them per device and turns it into a [`FrameSet`].
//!
//! # Related
//!
//! - [`crate::systems::atlasloader`] – fetches images and slices them into frames
//! - [`crate::resources::atlascatalog::AtlasCatalog`] – variant sets keyed by clip

use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Inset applied to each edge of a grid cell so sampling never bleeds into
/// the neighbouring frame.
pub const FRAME_INSET: u32 = 1;

/// Immutable description of one sprite sheet and how to slice it.
///
/// Serialized in the external camelCase format (`sheetWidth`, `frameRate`,
/// `imageLocator`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasDescriptor {
    pub sheet_width: u32,
    pub sheet_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_count: usize,
    /// Playback speed in frames per second.
    pub frame_rate: f32,
    /// Opaque locator resolved by an [`AtlasSource`](crate::systems::atlasloader::AtlasSource).
    pub image_locator: String,
}

impl AtlasDescriptor {
    /// Largest side of the sheet, used to rank variants and check texture limits.
    pub fn sheet_dimension(&self) -> u32 {
        self.sheet_width.max(self.sheet_height)
    }

    /// Seconds each frame stays on screen.
    pub fn frame_interval(&self) -> f32 {
        if self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            f32::INFINITY
        }
    }

    /// Grid columns for an image `image_width` pixels wide (never zero).
    pub fn columns_for(&self, image_width: u32) -> u32 {
        if self.frame_width == 0 {
            return 1;
        }
        (image_width / self.frame_width).max(1)
    }
}

/// Resolution variants describing the same clip.
pub type VariantSet = SmallVec<[AtlasDescriptor; 4]>;

/// Decoded atlas image.
///
/// `pixels` is optional so synthetic or headless sources can describe an
/// atlas without allocating a full sheet.
#[derive(Debug, Clone)]
pub struct AtlasImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Option<RgbaImage>,
}

impl AtlasImage {
    pub fn decoded(pixels: RgbaImage) -> Self {
        Self {
            width: pixels.width(),
            height: pixels.height(),
            pixels: Some(pixels),
        }
    }

    pub fn dimensions_only(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: None,
        }
    }
}

/// Rectangle into an atlas image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FrameRegion {
    /// True when the whole region lies inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

/// A loaded, sliced clip.
///
/// Invariant: `frames.len() == descriptor.frame_count` and every frame lies
/// within `source`. Built only by [`crate::systems::atlasloader::slice_frames`].
#[derive(Debug, Clone)]
pub struct FrameSet {
    pub descriptor: AtlasDescriptor,
    pub source: Arc<AtlasImage>,
    pub frames: Vec<FrameRegion>,
}

impl FrameSet {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&FrameRegion> {
        self.frames.get(index)
    }

    /// Native frame size before scaling (the grid cell size).
    pub fn native_size(&self) -> (f32, f32) {
        (
            self.descriptor.frame_width as f32,
            self.descriptor.frame_height as f32,
        )
    }
}
