//! Frame atlas loading.
//!
//! An [`AtlasSource`] turns a descriptor's locator into an [`AtlasImage`];
//! [`slice_frames`] cuts the image into grid cells. [`load_frame_set`] does
//! both and is what load executors run for each job.
//!
//! Frame `i` lives at `col = i % cols`, `row = i / cols` where
//! `cols = max(1, image_width / frame_width)`. Each cell is inset by
//! [`FRAME_INSET`] on every edge.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error};

use crate::components::atlas::{AtlasDescriptor, AtlasImage, FRAME_INSET, FrameRegion, FrameSet};
use crate::error::LoadError;

/// Resolves locators to decoded atlas images.
///
/// Sources are shared with loader threads, hence `Send + Sync`.
pub trait AtlasSource: Send + Sync {
    fn fetch(&self, descriptor: &AtlasDescriptor) -> Result<AtlasImage, LoadError>;
}

/// Reads atlases from disk relative to `root` and decodes them with `image`.
#[derive(Debug, Clone)]
pub struct FileAtlasSource {
    root: PathBuf,
}

impl FileAtlasSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl AtlasSource for FileAtlasSource {
    fn fetch(&self, descriptor: &AtlasDescriptor) -> Result<AtlasImage, LoadError> {
        let path = self.resolve(&descriptor.image_locator);
        let bytes = std::fs::read(&path)
            .map_err(|e| LoadError::Io(format!("{}: {}", path.display(), e)))?;
        let decoded = image::load_from_memory(&bytes)?.to_rgba8();
        debug!(
            "decoded atlas '{}' ({}x{})",
            path.display(),
            decoded.width(),
            decoded.height()
        );
        Ok(AtlasImage::decoded(decoded))
    }
}

/// Produces pixel-less atlases sized exactly as described.
///
/// Used by the headless demo and by hosts that render frames procedurally.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticAtlasSource;

impl AtlasSource for SyntheticAtlasSource {
    fn fetch(&self, descriptor: &AtlasDescriptor) -> Result<AtlasImage, LoadError> {
        Ok(AtlasImage::dimensions_only(
            descriptor.sheet_width,
            descriptor.sheet_height,
        ))
    }
}

/// Slice `image` into `descriptor.frame_count` inset grid cells.
///
/// The column count comes from the real image width, which may differ from
/// the descriptor's nominal sheet width.
pub fn slice_frames(
    descriptor: &AtlasDescriptor,
    image: &AtlasImage,
) -> Result<Vec<FrameRegion>, LoadError> {
    let (fw, fh) = (descriptor.frame_width, descriptor.frame_height);
    if fw <= FRAME_INSET * 2 || fh <= FRAME_INSET * 2 {
        return Err(LoadError::InvalidDescriptor(format!(
            "frame size {}x{} is too small for a {}px inset",
            fw, fh, FRAME_INSET
        )));
    }
    if descriptor.frame_count == 0 {
        return Err(LoadError::InvalidDescriptor(
            "frame_count must be at least 1".into(),
        ));
    }

    let cols = descriptor.columns_for(image.width) as usize;
    let mut frames = Vec::with_capacity(descriptor.frame_count);
    for i in 0..descriptor.frame_count {
        let col = (i % cols) as u32;
        let row = (i / cols) as u32;
        let region = FrameRegion {
            x: col * fw + FRAME_INSET,
            y: row * fh + FRAME_INSET,
            width: fw - FRAME_INSET * 2,
            height: fh - FRAME_INSET * 2,
        };
        if !region.fits_within(image.width, image.height) {
            return Err(LoadError::InvalidDescriptor(format!(
                "frame {} of '{}' at ({}, {}) exceeds the {}x{} image",
                i, descriptor.image_locator, region.x, region.y, image.width, image.height
            )));
        }
        frames.push(region);
    }
    Ok(frames)
}

/// Fetch and slice one variant.
pub fn load_frame_set(
    source: &dyn AtlasSource,
    descriptor: &AtlasDescriptor,
) -> Result<FrameSet, LoadError> {
    let image = source.fetch(descriptor)?;
    let frames = slice_frames(descriptor, &image)?;
    Ok(FrameSet {
        descriptor: descriptor.clone(),
        source: Arc::new(image),
        frames,
    })
}

/// [`load_frame_set`] for executors: a panicking source is reported as
/// [`LoadError::Unavailable`] so the job still produces an outcome.
pub fn load_frame_set_isolated(
    source: &dyn AtlasSource,
    descriptor: &AtlasDescriptor,
) -> Result<FrameSet, LoadError> {
    match catch_unwind(AssertUnwindSafe(|| load_frame_set(source, descriptor))) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                "atlas source panicked on '{}': {}",
                descriptor.image_locator, reason
            );
            Err(LoadError::Unavailable(format!(
                "atlas source panicked: {}",
                reason
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(sheet: u32, cell: u32, count: usize) -> AtlasDescriptor {
        AtlasDescriptor {
            sheet_width: sheet,
            sheet_height: sheet,
            frame_width: cell,
            frame_height: cell,
            frame_count: count,
            frame_rate: 24.0,
            image_locator: "sheet.png".into(),
        }
    }

    #[test]
    fn slices_row_major_with_inset() {
        let d = descriptor(1000, 100, 13);
        let frames = slice_frames(&d, &AtlasImage::dimensions_only(1000, 1000)).unwrap();
        assert_eq!(frames.len(), 13);
        assert_eq!(
            frames[0],
            FrameRegion {
                x: 1,
                y: 1,
                width: 98,
                height: 98
            }
        );
        assert_eq!(frames[9].x, 901);
        assert_eq!(frames[9].y, 1);
        // 11th frame wraps to the second row
        assert_eq!(frames[10].x, 1);
        assert_eq!(frames[10].y, 101);
    }

    #[test]
    fn columns_follow_the_real_image_width() {
        // Nominal sheet is 1000 wide but the decoded image is only 400
        let d = descriptor(1000, 100, 8);
        let frames = slice_frames(&d, &AtlasImage::dimensions_only(400, 1000)).unwrap();
        assert_eq!(frames[4].x, 1);
        assert_eq!(frames[4].y, 101);
    }

    #[test]
    fn rejects_frames_outside_the_image() {
        let d = descriptor(1000, 100, 101);
        let err = slice_frames(&d, &AtlasImage::dimensions_only(1000, 1000)).unwrap_err();
        assert!(matches!(err, LoadError::InvalidDescriptor(_)));
    }

    #[test]
    fn rejects_degenerate_cells() {
        let d = descriptor(1000, 2, 1);
        assert!(slice_frames(&d, &AtlasImage::dimensions_only(1000, 1000)).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let source = FileAtlasSource::new("/definitely/not/here");
        let err = load_frame_set(&source, &descriptor(100, 10, 1)).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn synthetic_source_matches_descriptor() {
        let set = load_frame_set(&SyntheticAtlasSource, &descriptor(400, 100, 16)).unwrap();
        assert_eq!(set.frame_count(), 16);
        assert!(set.source.pixels.is_none());
        assert!(
            set.frames
                .iter()
                .all(|f| f.fits_within(set.source.width, set.source.height))
        );
    }

    struct PanickingSource;

    impl AtlasSource for PanickingSource {
        fn fetch(&self, _: &AtlasDescriptor) -> Result<AtlasImage, LoadError> {
            panic!("decoder crashed");
        }
    }

    #[test]
    fn panicking_source_becomes_a_load_error() {
        let result = load_frame_set_isolated(&PanickingSource, &descriptor(100, 10, 4));
        match result {
            Err(LoadError::Unavailable(reason)) => assert!(reason.contains("decoder crashed")),
            other => panic!("unexpected result {:?}", other.map(|f| f.frame_count())),
        }
    }

    #[test]
    fn isolated_load_passes_results_through() {
        let frames = load_frame_set_isolated(&SyntheticAtlasSource, &descriptor(100, 10, 4)).unwrap();
        assert_eq!(frames.frame_count(), 4);
    }
}
