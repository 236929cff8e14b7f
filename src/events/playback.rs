//! Playback notifications.
//!
//! These are delivered through the controller's observer lists:
//!
//! ```ignore
//! controller.on_state_change(|ev: &StateChangeEvent| {
//!     log::info!("{} -> {}", ev.previous, ev.current);
//! });
//! ```
//!
//! # Related
//!
//! - [`crate::systems::sequence::SequenceController`] – emits these events
//! - [`crate::events::observers::ObserverList`] – delivery and panic isolation

use crate::components::playback::PlaybackState;
use crate::error::AvatarError;

/// Emitted when the controller commits a new playback state.
///
/// Fired at a clip boundary, before the new clip's frames are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub previous: PlaybackState,
    pub current: PlaybackState,
}

/// Emitted when the active clip finishes a play cycle.
///
/// For looping clips (Idle, Repeat) this fires at every wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipCompleteEvent {
    pub state: PlaybackState,
}

/// Emitted when the clip for `state` cannot be played.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackErrorEvent {
    pub state: PlaybackState,
    pub error: AvatarError,
}
