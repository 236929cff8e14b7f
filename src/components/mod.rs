//! Plain data types shared by the resources and systems.
//!
//! Submodules overview:
//! - [`atlas`] – atlas descriptors, decoded images and sliced frame regions
//! - [`playback`] – main states, sub-phases and the cache keys derived from them

pub mod atlas;
pub mod playback;
