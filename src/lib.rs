//! Aberred Avatar library.
//!
//! Sprite-atlas avatar playback: atlas loading and caching, the
//! (main state, sub-phase) sequencing machine, fixed-rate frame stepping and
//! a shared render surface. Exposed for integration tests and embedding
//! hosts; [`stage::AvatarStage`] is the entry point.

pub mod components;
pub mod error;
pub mod events;
pub mod resources;
pub mod stage;
pub mod systems;
