//! Messages exchanged with atlas load executors, and cache notifications.

use crate::components::atlas::{AtlasDescriptor, FrameSet};
use crate::components::playback::CacheKey;
use crate::error::LoadError;

/// One variant load request.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadJob {
    pub key: CacheKey,
    pub descriptor: AtlasDescriptor,
}

/// Commands sent *to* the loader thread.
#[derive(Debug)]
pub enum LoadCmd {
    Fetch(LoadJob),
    Shutdown,
}

/// Result sent *back* from an executor.
#[derive(Debug)]
pub struct LoadOutcome {
    pub job: LoadJob,
    pub result: Result<FrameSet, LoadError>,
}

/// Notifications published by the resource cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A clip finished loading with the given variant.
    Loaded { key: CacheKey, locator: String },
    /// A variant failed and the next one in the chain is being tried.
    VariantFallback {
        key: CacheKey,
        failed: String,
        next: String,
        reason: LoadError,
    },
    /// Every variant for the clip failed.
    Exhausted { key: CacheKey, attempts: usize },
    /// Cached frame sets were dropped.
    Cleared,
}
