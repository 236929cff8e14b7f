//! Frame set cache with in-flight load deduplication and variant fallback.
//!
//! [`ResourceCache::get`] returns an [`AtlasHandle`] immediately. The handle
//! resolves when the host calls [`ResourceCache::pump`] (once per tick, done
//! by [`AvatarStage::tick`](crate::stage::AvatarStage::tick)). Every handle
//! for a key observes the same slot, so N concurrent requests start exactly
//! one load and end up with the same `Arc<FrameSet>`.
//!
//! # Variant choice
//!
//! [`select_variant`] picks one descriptor per device class. If that load
//! fails the cache walks a fallback chain: the remaining variants that fit
//! the device texture limit, largest first. Each step emits one
//! [`CacheEvent::VariantFallback`] and a `warn!`. When the chain runs out the
//! handle fails with [`AvatarError::ResourceLoadExhausted`] and the key is
//! forgotten, so a later `get` starts over.
//!
//! # Related
//!
//! - [`crate::resources::loader`] – executors that run the loads
//! - [`crate::resources::device::DeviceCapabilities`] – device profile input
//! - [`crate::resources::atlascatalog::AtlasCatalog`] – variant sets

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, error, info, warn};
use rustc_hash::FxHashMap;

use crate::components::atlas::{AtlasDescriptor, FrameSet};
use crate::components::playback::CacheKey;
use crate::error::{AvatarError, AvatarResult, LoadError};
use crate::events::loader::{CacheEvent, LoadJob, LoadOutcome};
use crate::events::observers::{ObserverId, ObserverList};
use crate::resources::atlascatalog::AtlasCatalog;
use crate::resources::device::{DeviceCapabilities, DeviceProfile};
use crate::resources::loader::{InlineExecutor, LoadExecutor};
use crate::systems::atlasloader::AtlasSource;

/// Sheets at or above this dimension are desktop-class.
pub const DESKTOP_CLASS_DIMENSION: u32 = 10000;

/// State of a cache request.
#[derive(Debug, Clone)]
pub enum LoadStatus {
    Pending,
    Ready(Arc<FrameSet>),
    Failed(AvatarError),
}

type Slot = Rc<RefCell<LoadStatus>>;

/// Pollable result of [`ResourceCache::get`].
///
/// Cloning a handle shares the slot.
#[derive(Debug, Clone)]
pub struct AtlasHandle {
    key: CacheKey,
    slot: Slot,
}

impl AtlasHandle {
    fn resolved(key: CacheKey, frames: Arc<FrameSet>) -> Self {
        Self {
            key,
            slot: Rc::new(RefCell::new(LoadStatus::Ready(frames))),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn poll(&self) -> LoadStatus {
        self.slot.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.slot.borrow(), LoadStatus::Pending)
    }

    pub fn ready(&self) -> Option<Arc<FrameSet>> {
        match &*self.slot.borrow() {
            LoadStatus::Ready(frames) => Some(Arc::clone(frames)),
            _ => None,
        }
    }

    /// True when both handles observe the same request.
    pub fn shares_slot_with(&self, other: &AtlasHandle) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Counters reported by [`ResourceCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Keys with a cached frame set.
    pub loaded: usize,
    /// Keys in the catalog.
    pub total: usize,
    /// Keys with a load running.
    pub in_flight: usize,
    /// Variant loads submitted, fallbacks included.
    pub loads_started: usize,
    /// Variant failures that moved on to another variant.
    pub fallbacks: usize,
}

struct InFlight {
    slot: Slot,
    current: AtlasDescriptor,
    remaining: VecDeque<AtlasDescriptor>,
    attempts: usize,
}

fn largest<'a>(
    variants: impl Iterator<Item = &'a AtlasDescriptor>,
) -> Option<&'a AtlasDescriptor> {
    variants.max_by_key(|d| d.sheet_dimension())
}

/// Pick the variant to load first for `profile`. `None` only for an empty set.
pub fn select_variant(
    variants: &[AtlasDescriptor],
    profile: DeviceProfile,
) -> Option<&AtlasDescriptor> {
    if variants.is_empty() {
        return None;
    }
    if !profile.is_mobile {
        return largest(
            variants
                .iter()
                .filter(|d| d.sheet_dimension() >= DESKTOP_CLASS_DIMENSION),
        )
        .or_else(|| largest(variants.iter()));
    }

    let mobile_eligible = || {
        variants
            .iter()
            .filter(|d| d.sheet_dimension() < DESKTOP_CLASS_DIMENSION)
    };
    if let Some(fit) = largest(
        mobile_eligible().filter(|d| d.sheet_dimension() <= profile.max_texture_dimension),
    ) {
        return Some(fit);
    }
    if let Some(smallest) = mobile_eligible().min_by_key(|d| d.sheet_dimension()) {
        return Some(smallest);
    }
    // Nothing below the desktop class: take the lower median.
    let mut sorted: Vec<&AtlasDescriptor> = variants.iter().collect();
    sorted.sort_by_key(|d| d.sheet_dimension());
    Some(sorted[(sorted.len() - 1) / 2])
}

/// Selected variant first, then every other variant that fits the device's
/// texture limit in descending resolution.
pub fn fallback_chain(
    variants: &[AtlasDescriptor],
    selected: &AtlasDescriptor,
    profile: DeviceProfile,
) -> VecDeque<AtlasDescriptor> {
    let mut rest: Vec<&AtlasDescriptor> = variants
        .iter()
        .filter(|d| *d != selected && d.sheet_dimension() <= profile.max_texture_dimension)
        .collect();
    rest.sort_by_key(|d| std::cmp::Reverse(d.sheet_dimension()));

    let mut chain = VecDeque::with_capacity(rest.len() + 1);
    chain.push_back(selected.clone());
    chain.extend(rest.into_iter().cloned());
    chain
}

/// Owns every loaded frame set, keyed by clip.
pub struct ResourceCache {
    catalog: AtlasCatalog,
    device: DeviceCapabilities,
    executor: Box<dyn LoadExecutor>,
    frames: FxHashMap<CacheKey, Arc<FrameSet>>,
    in_flight: FxHashMap<CacheKey, InFlight>,
    observers: ObserverList<CacheEvent>,
    loads_started: usize,
    fallbacks: usize,
}

impl ResourceCache {
    pub fn new(
        catalog: AtlasCatalog,
        device: DeviceCapabilities,
        executor: Box<dyn LoadExecutor>,
    ) -> Self {
        Self {
            catalog,
            device,
            executor,
            frames: FxHashMap::default(),
            in_flight: FxHashMap::default(),
            observers: ObserverList::new("cache"),
            loads_started: 0,
            fallbacks: 0,
        }
    }

    /// Cache whose loads run synchronously during [`pump`](Self::pump).
    pub fn inline(
        catalog: AtlasCatalog,
        device: DeviceCapabilities,
        source: Arc<dyn AtlasSource>,
    ) -> Self {
        Self::new(catalog, device, Box::new(InlineExecutor::new(source)))
    }

    pub fn catalog(&self) -> &AtlasCatalog {
        &self.catalog
    }

    pub fn device(&self) -> &DeviceCapabilities {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DeviceCapabilities {
        &mut self.device
    }

    /// Request the frame set for `key`.
    ///
    /// Fails synchronously only when the catalog has nothing for `key`.
    pub fn get(&mut self, key: &CacheKey) -> AvatarResult<AtlasHandle> {
        if let Some(frames) = self.frames.get(key) {
            return Ok(AtlasHandle::resolved(key.clone(), Arc::clone(frames)));
        }
        if let Some(entry) = self.in_flight.get(key) {
            debug!("joining in-flight load for {}", key);
            return Ok(AtlasHandle {
                key: key.clone(),
                slot: Rc::clone(&entry.slot),
            });
        }

        let variants = self.catalog.variants(key)?;
        let profile = self.device.profile();
        let Some(selected) = select_variant(variants, profile) else {
            return Err(AvatarError::missing_descriptor(key.as_str()));
        };
        let mut chain = fallback_chain(variants, selected, profile);
        let Some(first) = chain.pop_front() else {
            return Err(AvatarError::missing_descriptor(key.as_str()));
        };
        info!(
            "loading {} from '{}' ({} fallback(s) available)",
            key,
            first.image_locator,
            chain.len()
        );

        let slot: Slot = Rc::new(RefCell::new(LoadStatus::Pending));
        self.submit(key.clone(), first.clone());
        self.in_flight.insert(
            key.clone(),
            InFlight {
                slot: Rc::clone(&slot),
                current: first,
                remaining: chain,
                attempts: 1,
            },
        );
        Ok(AtlasHandle {
            key: key.clone(),
            slot,
        })
    }

    /// Request every clip in the catalog.
    pub fn preload_all(&mut self) -> AvatarResult<Vec<AtlasHandle>> {
        self.catalog
            .keys()
            .iter()
            .map(|key| self.get(key))
            .collect()
    }

    /// Collect finished loads and resolve their handles.
    ///
    /// Returns how many load outcomes were processed. With an inline executor
    /// a whole fallback chain resolves within one call.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let outcomes = self.executor.drain();
            if outcomes.is_empty() {
                break;
            }
            processed += outcomes.len();
            for outcome in outcomes {
                self.apply_outcome(outcome);
            }
        }
        processed
    }

    pub fn is_loading(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn is_ready(&self, key: &CacheKey) -> bool {
        self.frames.contains_key(key)
    }

    pub fn cached(&self, key: &CacheKey) -> Option<Arc<FrameSet>> {
        self.frames.get(key).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            loaded: self.frames.len(),
            total: self.catalog.len(),
            in_flight: self.in_flight.len(),
            loads_started: self.loads_started,
            fallbacks: self.fallbacks,
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&CacheEvent) + 'static) -> ObserverId {
        self.observers.add(listener)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Drop every cached frame set. Loads already running still complete.
    pub fn clear(&mut self) {
        info!("clearing {} cached frame set(s)", self.frames.len());
        self.frames.clear();
        self.observers.notify(&CacheEvent::Cleared);
    }

    fn submit(&mut self, key: CacheKey, descriptor: AtlasDescriptor) {
        self.loads_started += 1;
        self.executor.submit(LoadJob { key, descriptor });
    }

    fn apply_outcome(&mut self, outcome: LoadOutcome) {
        let LoadOutcome { job, result } = outcome;
        let is_current = self
            .in_flight
            .get(&job.key)
            .is_some_and(|entry| entry.current == job.descriptor);
        if !is_current {
            debug!(
                "discarding stale load of '{}' for {}",
                job.descriptor.image_locator, job.key
            );
            return;
        }

        match result {
            Ok(frame_set) => self.finish_loaded(job.key, frame_set),
            Err(reason) => self.advance_fallback(job, reason),
        }
    }

    fn finish_loaded(&mut self, key: CacheKey, frame_set: FrameSet) {
        let Some(entry) = self.in_flight.remove(&key) else {
            return;
        };
        let locator = frame_set.descriptor.image_locator.clone();
        let frames = Arc::new(frame_set);
        info!(
            "loaded {} from '{}' ({} frames)",
            key,
            locator,
            frames.frame_count()
        );
        self.frames.insert(key.clone(), Arc::clone(&frames));
        *entry.slot.borrow_mut() = LoadStatus::Ready(frames);
        self.observers.notify(&CacheEvent::Loaded { key, locator });
    }

    fn advance_fallback(&mut self, job: LoadJob, reason: LoadError) {
        let failure = AvatarError::VariantLoadFailed {
            locator: job.descriptor.image_locator.clone(),
            reason: reason.clone(),
        };

        let next = match self.in_flight.get_mut(&job.key) {
            Some(entry) => match entry.remaining.pop_front() {
                Some(next) => {
                    entry.current = next.clone();
                    entry.attempts += 1;
                    Some(next)
                }
                None => None,
            },
            None => return,
        };

        match next {
            Some(next) => {
                warn!("{}; falling back to '{}'", failure, next.image_locator);
                self.fallbacks += 1;
                self.observers.notify(&CacheEvent::VariantFallback {
                    key: job.key.clone(),
                    failed: job.descriptor.image_locator,
                    next: next.image_locator.clone(),
                    reason,
                });
                self.submit(job.key, next);
            }
            None => {
                let Some(entry) = self.in_flight.remove(&job.key) else {
                    return;
                };
                error!(
                    "all {} variant(s) of {} failed; last: {}",
                    entry.attempts, job.key, failure
                );
                *entry.slot.borrow_mut() = LoadStatus::Failed(AvatarError::ResourceLoadExhausted {
                    key: job.key.as_str().to_string(),
                    attempts: entry.attempts,
                    last_error: failure.to_string(),
                });
                self.observers.notify(&CacheEvent::Exhausted {
                    key: job.key,
                    attempts: entry.attempts,
                });
            }
        }
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("stats", &self.stats())
            .field("device", &self.device)
            .finish()
    }
}
