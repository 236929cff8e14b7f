//! Event types and observers.
//!
//! Events decouple the cache and the sequencing machine from the host: the
//! host registers callbacks and receives notifications without polling.
//!
//! Submodules:
//! - [`loader`] – commands and results for load executors, cache notifications
//! - [`observers`] – callback lists with idempotent removal
//! - [`playback`] – state change, clip completion and playback errors

pub mod loader;
pub mod observers;
pub mod playback;
