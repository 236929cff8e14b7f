//! Long-lived services owned by the stage.
//!
//! Overview
//! - `atlascatalog` – variant sets per clip, from JSON or built in
//! - `device` – platform class, texture limit and frame-time monitor
//! - `engineconfig` – INI configuration with safe defaults
//! - `loader` – inline and background-thread load executors
//! - `resourcecache` – deduplicated, device-aware clip loading with fallback
//! - `surface` – single shared render surface across mount points
//! - `worldtime` – stage clock

pub mod atlascatalog;
pub mod device;
pub mod engineconfig;
pub mod loader;
pub mod resourcecache;
pub mod surface;
pub mod worldtime;
