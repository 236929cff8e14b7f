//! Atlas catalog.
//!
//! Maps each clip's [`CacheKey`] to its resolution [`VariantSet`]. The
//! catalog is static configuration: it is built once at startup from a JSON
//! manifest or from [`AtlasCatalog::builtin`], and the cache reads it when a
//! clip is first requested.
//!
//! Manifest format:
//!
//! ```json
//! { "clips": { "writing_start": [ { "sheetWidth": 1000, ... } ] } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::components::atlas::{AtlasDescriptor, VariantSet};
use crate::components::playback::{CacheKey, all_playback_states};
use crate::error::{AvatarError, AvatarResult};

/// Central registry of clip variant sets keyed by cache key.
#[derive(Debug, Clone, Default)]
pub struct AtlasCatalog {
    clips: FxHashMap<CacheKey, VariantSet>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    clips: BTreeMap<String, Vec<AtlasDescriptor>>,
}

impl AtlasCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the variants of one clip.
    pub fn insert(&mut self, key: CacheKey, variants: impl IntoIterator<Item = AtlasDescriptor>) {
        self.clips.insert(key, variants.into_iter().collect());
    }

    pub fn with_clip(
        mut self,
        key: impl Into<String>,
        variants: impl IntoIterator<Item = AtlasDescriptor>,
    ) -> Self {
        self.insert(CacheKey::new(key), variants);
        self
    }

    /// Variants for `key`; an unknown or empty clip is a configuration bug.
    pub fn variants(&self, key: &CacheKey) -> AvatarResult<&[AtlasDescriptor]> {
        match self.clips.get(key) {
            Some(v) if !v.is_empty() => Ok(v.as_slice()),
            _ => Err(AvatarError::missing_descriptor(key.as_str())),
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.clips.get(key).is_some_and(|v| !v.is_empty())
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.clips.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Check that every reachable playback state has a clip.
    pub fn validate_states(&self) -> AvatarResult<()> {
        for state in all_playback_states() {
            let key = state.cache_key();
            if !self.contains(&key) {
                return Err(AvatarError::missing_descriptor(key.as_str()));
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let manifest: Manifest =
            serde_json::from_str(json).map_err(|e| format!("Invalid atlas manifest: {}", e))?;
        let mut catalog = Self::new();
        for (key, variants) in manifest.clips {
            catalog.insert(CacheKey::new(key), variants);
        }
        Ok(catalog)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read atlas manifest {:?}: {}", path, e))?;
        let catalog = Self::from_json_str(&json)?;
        info!("Loaded {} clip(s) from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    pub fn to_json_string(&self) -> Result<String, String> {
        let clips = self
            .clips
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_vec()))
            .collect();
        serde_json::to_string_pretty(&Manifest { clips })
            .map_err(|e| format!("Failed to serialize atlas manifest: {}", e))
    }

    /// The stock avatar clips, three resolutions each (10000, 4000 and 1000
    /// pixel sheets). Locators are file names relative to the asset root.
    pub fn builtin() -> Self {
        // (key, file stem, frame count, fps, mid-resolution sheet height, mid extension)
        const CLIPS: [(&str, &str, usize, f32, u32, &str); 7] = [
            ("idle", "standing-repeat", 55, 48.0, 2400, "webp"),
            ("writing_start", "writing-start", 13, 24.0, 4000, "png"),
            ("writing_repeat", "writing-repeat", 49, 24.0, 4000, "png"),
            ("writing_end", "writing-end", 15, 24.0, 4000, "png"),
            ("talking_start", "talking-start", 11, 24.0, 4000, "png"),
            ("talking_repeat", "talking-repeat", 27, 24.0, 4000, "png"),
            ("talking_end", "talking-end", 14, 24.0, 4000, "png"),
        ];

        let mut catalog = Self::new();
        for (key, stem, count, fps, mid_height, mid_ext) in CLIPS {
            let variant = |sheet_w: u32, sheet_h: u32, cell: u32, ext: &str| AtlasDescriptor {
                sheet_width: sheet_w,
                sheet_height: sheet_h,
                frame_width: cell,
                frame_height: cell,
                frame_count: count,
                frame_rate: fps,
                image_locator: format!(
                    "{}-{}-{}x{}-{}x{}.{}",
                    stem, count, sheet_w, sheet_h, cell, cell, ext
                ),
            };
            catalog.insert(
                CacheKey::new(key),
                [
                    variant(10000, 10000, 1000, "webp"),
                    variant(4000, mid_height, 400, mid_ext),
                    variant(1000, 1000, 100, "png"),
                ],
            );
        }
        catalog
    }
}
