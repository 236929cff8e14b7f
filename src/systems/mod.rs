//! Stage systems.
//!
//! Submodules overview
//! - [`atlasloader`] – fetch atlas images and slice them into frames
//! - [`canvas`] – headless software render surface
//! - [`framedriver`] – fixed-rate frame stepping
//! - [`loaderthread`] – background atlas decoding loop
//! - [`sequence`] – playback state machine

pub mod atlasloader;
pub mod canvas;
pub mod framedriver;
pub mod loaderthread;
pub mod sequence;
