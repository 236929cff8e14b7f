//! Playback sequencing.
//!
//! [`SequenceController`] owns the current [`PlaybackState`], the caller's
//! target [`MainState`] and the [`FrameDriver`] playing the current clip.
//! Each host tick it:
//!
//! 1. applies a clip load that finished since the last tick,
//! 2. advances the driver,
//! 3. on a clip boundary asks [`next_playback_state`] where to go next and
//!    requests that clip from the [`ResourceCache`].
//!
//! Target changes never cut a clip short. They are picked up at the next
//! boundary, and a non-idle clip is always left through its `End` phase.
//! While the next clip is loading the previous frame stays on screen.
//!
//! # Related
//!
//! - [`crate::events::playback`] – notifications emitted here
//! - [`crate::systems::framedriver::FrameDriver`] – frame stepping
//! - [`crate::resources::resourcecache::ResourceCache`] – clip loading

use std::sync::Arc;

use log::{debug, error, info};

use crate::components::atlas::{FrameRegion, FrameSet};
use crate::components::playback::{MainState, PlaybackState, SubPhase};
use crate::error::AvatarResult;
use crate::events::observers::{ObserverId, ObserverList};
use crate::events::playback::{ClipCompleteEvent, PlaybackErrorEvent, StateChangeEvent};
use crate::resources::resourcecache::{AtlasHandle, LoadStatus, ResourceCache};
use crate::systems::framedriver::FrameDriver;

/// Where playback goes after `current` completes, given the caller's
/// `target`. `None` means keep playing `current`.
///
/// Idle has no exit clip, so leaving it jumps straight to the target's
/// `Start`. Any other main state is left through its `End` phase.
pub fn next_playback_state(current: PlaybackState, target: MainState) -> Option<PlaybackState> {
    let Some(sub) = current.sub() else {
        return (!target.is_idle()).then(|| PlaybackState::entry(target));
    };
    if target != current.main() {
        return Some(match sub {
            SubPhase::End => PlaybackState::entry(target),
            SubPhase::Start | SubPhase::Repeat => PlaybackState::clip(current.main(), SubPhase::End),
        });
    }
    match sub {
        SubPhase::Start => Some(PlaybackState::clip(current.main(), SubPhase::Repeat)),
        SubPhase::Repeat => None,
        SubPhase::End => Some(PlaybackState::entry(target)),
    }
}

/// What the render surface should show.
#[derive(Debug, Clone)]
pub enum Visual {
    /// Nothing loaded yet.
    Empty,
    /// A frame of the current (or previous, while loading) clip.
    Frame {
        frames: Arc<FrameSet>,
        region: FrameRegion,
    },
    /// The clip could not be loaded; show the static placeholder.
    Fallback,
}

/// State machine driving clip selection and playback.
pub struct SequenceController {
    state: PlaybackState,
    target: MainState,
    driving: bool,
    driver: FrameDriver,
    /// Load for `state` that has not resolved yet.
    pending: Option<AtlasHandle>,
    /// The driver holds the clip of `state`.
    clip_ready: bool,
    /// The clip of `state` failed to load.
    failed: bool,
    /// A target change arrived while playback was held at a boundary.
    reevaluate: bool,
    time_in_state: f32,
    state_change: ObserverList<StateChangeEvent>,
    clip_complete: ObserverList<ClipCompleteEvent>,
    errors: ObserverList<PlaybackErrorEvent>,
}

impl Default for SequenceController {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceController {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::idle(),
            target: MainState::Idle,
            driving: false,
            driver: FrameDriver::new(),
            pending: None,
            clip_ready: false,
            failed: false,
            reevaluate: false,
            time_in_state: 0.0,
            state_change: ObserverList::new("state_change"),
            clip_complete: ObserverList::new("clip_complete"),
            errors: ObserverList::new("playback_error"),
        }
    }

    pub fn current_state(&self) -> PlaybackState {
        self.state
    }

    pub fn target_state(&self) -> MainState {
        self.target
    }

    pub fn is_driving(&self) -> bool {
        self.driving
    }

    /// The clip of the current state is loaded and playing.
    pub fn is_clip_ready(&self) -> bool {
        self.clip_ready
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Seconds since the current state was entered.
    pub fn time_in_state(&self) -> f32 {
        self.time_in_state
    }

    pub fn driver(&self) -> &FrameDriver {
        &self.driver
    }

    pub fn set_low_performance(&mut self, enabled: bool) {
        self.driver.set_low_performance(enabled);
    }

    /// Native frame size of the clip on screen.
    pub fn native_size(&self) -> Option<(f32, f32)> {
        self.driver.frames().map(|f| f.native_size())
    }

    pub fn visual(&self) -> Visual {
        if self.failed {
            return Visual::Fallback;
        }
        match (self.driver.frames(), self.driver.current_region()) {
            (Some(frames), Some(region)) => Visual::Frame {
                frames: Arc::clone(frames),
                region: *region,
            },
            _ => Visual::Empty,
        }
    }

    pub fn on_state_change(&mut self, cb: impl FnMut(&StateChangeEvent) + 'static) -> ObserverId {
        self.state_change.add(cb)
    }

    pub fn on_clip_complete(
        &mut self,
        cb: impl FnMut(&ClipCompleteEvent) + 'static,
    ) -> ObserverId {
        self.clip_complete.add(cb)
    }

    pub fn on_error(&mut self, cb: impl FnMut(&PlaybackErrorEvent) + 'static) -> ObserverId {
        self.errors.add(cb)
    }

    /// Unregister an observer from whichever list holds it. Idempotent.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.state_change.remove(id) | self.clip_complete.remove(id) | self.errors.remove(id)
    }

    pub fn clear_observers(&mut self) {
        self.state_change.clear();
        self.clip_complete.clear();
        self.errors.clear();
    }

    /// Record the desired main state. Takes effect at the next clip boundary.
    pub fn set_target_state(&mut self, target: MainState) {
        if target == self.target {
            return;
        }
        info!("target state {} -> {}", self.target, target);
        self.target = target;
        if self.driving && self.held_at_boundary() {
            self.reevaluate = true;
        }
    }

    /// The clip of the current state has finished or failed to load. While
    /// the next clip is still loading the driver holds the previous one, so
    /// a finished driver alone does not count.
    fn held_at_boundary(&self) -> bool {
        self.failed || (self.clip_ready && self.driver.is_finished())
    }

    /// Begin driving playback. Nothing is on screen yet, so a non-idle
    /// target is entered right away instead of waiting for an idle cycle.
    pub fn start(&mut self, cache: &mut ResourceCache) -> AvatarResult<()> {
        if self.driving {
            return Ok(());
        }
        self.driving = true;
        self.driver.play();
        if self.clip_ready || self.pending.is_some() {
            return Ok(());
        }
        if self.driver.frames().is_none() && self.state.sub().is_none() {
            if let Some(next) = next_playback_state(self.state, self.target) {
                return self.enter(next, cache);
            }
        }
        self.request_clip(cache)
    }

    /// Stop driving. A load still in flight is ignored when it lands.
    pub fn stop(&mut self) {
        if !self.driving {
            return;
        }
        self.driving = false;
        self.pending = None;
        self.reevaluate = false;
        self.driver.pause();
        debug!("sequence stopped in {}", self.state);
    }

    /// Replay the current state from its first frame, re-requesting the clip
    /// if it failed.
    pub fn restart(&mut self, cache: &mut ResourceCache) -> AvatarResult<()> {
        if !self.driving {
            return self.start(cache);
        }
        if self.clip_ready {
            self.driver.reset();
            self.time_in_state = 0.0;
            return Ok(());
        }
        if self.pending.is_none() {
            return self.request_clip(cache);
        }
        Ok(())
    }

    /// Advance playback by `delta` seconds.
    ///
    /// Errors only for configuration problems (a state with no descriptor);
    /// load failures go to the `on_error` observers instead.
    pub fn update(&mut self, delta: f32, cache: &mut ResourceCache) -> AvatarResult<()> {
        if !self.driving {
            return Ok(());
        }
        self.poll_pending();

        if self.reevaluate {
            self.reevaluate = false;
            if self.held_at_boundary() {
                match next_playback_state(self.state, self.target) {
                    Some(next) => return self.enter(next, cache),
                    None if self.failed => return self.request_clip(cache),
                    None => {}
                }
            }
        }

        if !self.clip_ready {
            return Ok(());
        }
        self.time_in_state += delta.max(0.0);
        let outcome = self.driver.tick(delta);
        if !outcome.completed {
            return Ok(());
        }

        self.clip_complete.notify(&ClipCompleteEvent { state: self.state });
        match next_playback_state(self.state, self.target) {
            Some(next) => self.enter(next, cache),
            None => Ok(()),
        }
    }

    fn enter(&mut self, next: PlaybackState, cache: &mut ResourceCache) -> AvatarResult<()> {
        let previous = std::mem::replace(&mut self.state, next);
        info!("playback {} -> {}", previous, next);
        self.clip_ready = false;
        self.failed = false;
        self.time_in_state = 0.0;
        self.state_change.notify(&StateChangeEvent {
            previous,
            current: next,
        });
        self.request_clip(cache)
    }

    fn request_clip(&mut self, cache: &mut ResourceCache) -> AvatarResult<()> {
        let key = self.state.cache_key();
        let handle = match cache.get(&key) {
            Ok(handle) => handle,
            Err(err) => {
                error!("no clip for {}: {}", self.state, err);
                self.pending = None;
                self.failed = true;
                return Err(err);
            }
        };
        self.failed = false;
        self.pending = Some(handle);
        // Cached clips apply in the same tick, keeping transitions seamless.
        self.poll_pending();
        Ok(())
    }

    fn poll_pending(&mut self) {
        let Some(handle) = self.pending.as_ref() else {
            return;
        };
        let status = handle.poll();
        if matches!(status, LoadStatus::Pending) {
            return;
        }
        let Some(handle) = self.pending.take() else {
            return;
        };
        if !self.driving || *handle.key() != self.state.cache_key() {
            debug!("dropping stale clip {}", handle.key());
            return;
        }

        match status {
            LoadStatus::Pending => {}
            LoadStatus::Ready(frames) => {
                debug!(
                    "playing {} ({} frames, looped={})",
                    self.state,
                    frames.frame_count(),
                    self.state.is_looping()
                );
                self.driver.load(frames, self.state.is_looping());
                self.driver.play();
                self.clip_ready = true;
                self.failed = false;
            }
            LoadStatus::Failed(error) => {
                error!("clip for {} failed: {}", self.state, error);
                self.driver.unload();
                self.clip_ready = false;
                self.failed = true;
                self.errors.notify(&PlaybackErrorEvent {
                    state: self.state,
                    error,
                });
            }
        }
    }
}

impl std::fmt::Debug for SequenceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceController")
            .field("state", &self.state)
            .field("target", &self.target)
            .field("driving", &self.driving)
            .field("clip_ready", &self.clip_ready)
            .field("failed", &self.failed)
            .field("frame", &self.driver.current_frame())
            .finish()
    }
}
