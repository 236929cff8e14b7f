//! Fixed-rate frame stepping.
//!
//! [`FrameDriver`] turns variable host deltas into discrete frame advances at
//! the clip's frame rate. It owns no timer: the host feeds it seconds through
//! [`FrameDriver::tick`].
//!
//! A clip completes after its final frame has been on screen for one full
//! interval. A looping clip then wraps to frame 0 and reports a completed
//! cycle; a one-shot clip holds the final frame and reports completion once.
//! A single tick never crosses a completion boundary, so the caller can
//! switch clips exactly there; leftover time stays in the accumulator.
//!
//! # Related
//!
//! - [`crate::systems::sequence::SequenceController`] – reacts to completions

use std::sync::Arc;

use crate::components::atlas::{FrameRegion, FrameSet};

/// What a [`FrameDriver::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// The logical frame index changed.
    pub advanced: bool,
    /// A play cycle ended during this tick.
    pub completed: bool,
}

/// Frame stepper for one clip at a time.
///
/// Invariant: with a clip loaded, `current_frame() < frame_count()`.
#[derive(Debug, Clone)]
pub struct FrameDriver {
    frames: Option<Arc<FrameSet>>,
    looped: bool,
    playing: bool,
    index: usize,
    accumulator: f32,
    finished: bool,
    low_performance: bool,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            frames: None,
            looped: false,
            playing: true,
            index: 0,
            accumulator: 0.0,
            finished: false,
            low_performance: false,
        }
    }

    /// Swap in a new clip. Index, accumulated time and completion state of
    /// the previous clip are discarded first.
    pub fn load(&mut self, frames: Arc<FrameSet>, looped: bool) {
        self.index = 0;
        self.accumulator = 0.0;
        self.finished = false;
        self.looped = looped;
        self.frames = Some(frames);
    }

    /// Drop the current clip.
    pub fn unload(&mut self) {
        self.frames = None;
        self.index = 0;
        self.accumulator = 0.0;
        self.finished = false;
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    /// Stop advancing; the current frame stays on screen.
    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Back to frame 0 without reporting a completion.
    pub fn reset(&mut self) {
        self.index = 0;
        self.accumulator = 0.0;
        self.finished = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    /// One-shot clip that has reported its completion.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn set_low_performance(&mut self, enabled: bool) {
        self.low_performance = enabled;
    }

    pub fn is_low_performance(&self) -> bool {
        self.low_performance
    }

    pub fn frames(&self) -> Option<&Arc<FrameSet>> {
        self.frames.as_ref()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.as_ref().map_or(0, |f| f.frame_count())
    }

    /// Logical frame index.
    pub fn current_frame(&self) -> usize {
        self.index
    }

    /// Index actually shown. Low-performance mode shows even frames only.
    pub fn display_frame(&self) -> usize {
        if self.low_performance {
            self.index & !1
        } else {
            self.index
        }
    }

    pub fn current_region(&self) -> Option<&FrameRegion> {
        self.frames.as_ref()?.frame(self.display_frame())
    }

    /// Advance by `delta` seconds.
    pub fn tick(&mut self, delta: f32) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let Some(frames) = self.frames.as_ref() else {
            return outcome;
        };
        if !self.playing || self.finished || !delta.is_finite() || delta <= 0.0 {
            return outcome;
        }
        let count = frames.frame_count();
        let interval = frames.descriptor.frame_interval();
        if count == 0 || !interval.is_finite() {
            return outcome;
        }

        self.accumulator += delta;
        while self.accumulator >= interval {
            self.accumulator -= interval;
            if self.index + 1 < count {
                self.index += 1;
                outcome.advanced = true;
                continue;
            }

            outcome.completed = true;
            if self.looped {
                if self.index != 0 {
                    self.index = 0;
                    outcome.advanced = true;
                }
            } else {
                self.finished = true;
                self.accumulator = 0.0;
            }
            break;
        }
        outcome
    }
}
