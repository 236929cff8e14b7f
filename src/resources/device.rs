//! Device capability detection.
//!
//! [`DeviceCapabilities`] wraps a host [`DeviceProbe`] and caches the
//! resulting [`DeviceProfile`] for the process lifetime. The maximum texture
//! dimension is only queried on mobile-class devices; desktops get
//! [`DESKTOP_MAX_TEXTURE_DIMENSION`]. A failed query falls back to
//! [`MOBILE_FALLBACK_TEXTURE_DIMENSION`].
//!
//! Frame timing is tracked by a [`PerformanceMonitor`]. A pixel-ratio change
//! resets the monitor and its low-performance flag but never the cached
//! texture profile.

use std::collections::VecDeque;

use log::{info, warn};

pub const DESKTOP_MAX_TEXTURE_DIMENSION: u32 = 16384;
pub const MOBILE_FALLBACK_TEXTURE_DIMENSION: u32 = 2048;

/// Frame-time samples kept by the performance monitor.
pub const PERFORMANCE_WINDOW: usize = 60;
/// Average frame time (seconds) above which performance is considered poor.
pub const POOR_FRAME_TIME: f32 = 0.020;

/// Platform identification reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformInfo {
    pub user_agent: String,
    /// e.g. `MacIntel`, `Win32`, `Linux x86_64`.
    pub platform: String,
    pub max_touch_points: u32,
}

impl PlatformInfo {
    pub fn desktop() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64)".into(),
            platform: "Linux x86_64".into(),
            max_touch_points: 0,
        }
    }

    pub fn android() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8)".into(),
            platform: "Linux armv81".into(),
            max_touch_points: 5,
        }
    }
}

/// iPhone/iPod/iPad, or iPadOS 13+ which reports itself as `MacIntel` with
/// a touch screen.
pub fn is_ios(info: &PlatformInfo) -> bool {
    let ua = info.user_agent.to_ascii_lowercase();
    if ua.contains("iphone") || ua.contains("ipod") || ua.contains("ipad") {
        return true;
    }
    info.platform == "MacIntel" && info.max_touch_points > 1
}

/// Mobile-class means iOS or Android.
pub fn classify_mobile(info: &PlatformInfo) -> bool {
    is_ios(info) || info.user_agent.to_ascii_lowercase().contains("android")
}

/// Host hooks for capability queries. Stub this in tests.
pub trait DeviceProbe {
    fn platform(&self) -> PlatformInfo;

    /// Largest texture side the GPU accepts. Only called on mobile devices.
    fn query_max_texture_dimension(&self) -> Result<u32, String>;

    fn pixel_ratio(&self) -> f32 {
        1.0
    }
}

/// Fixed answers, configured up front.
#[derive(Debug, Clone)]
pub struct StaticDeviceProbe {
    pub platform: PlatformInfo,
    /// `None` makes the texture query fail.
    pub max_texture_dimension: Option<u32>,
    pub pixel_ratio: f32,
}

impl StaticDeviceProbe {
    pub fn desktop() -> Self {
        Self {
            platform: PlatformInfo::desktop(),
            max_texture_dimension: Some(DESKTOP_MAX_TEXTURE_DIMENSION),
            pixel_ratio: 1.0,
        }
    }

    pub fn mobile(max_texture_dimension: Option<u32>) -> Self {
        Self {
            platform: PlatformInfo::android(),
            max_texture_dimension,
            pixel_ratio: 2.0,
        }
    }
}

impl DeviceProbe for StaticDeviceProbe {
    fn platform(&self) -> PlatformInfo {
        self.platform.clone()
    }

    fn query_max_texture_dimension(&self) -> Result<u32, String> {
        self.max_texture_dimension
            .ok_or_else(|| "texture size query unavailable".to_string())
    }

    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }
}

/// Result of capability detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub is_mobile: bool,
    pub max_texture_dimension: u32,
}

/// Rolling frame-time average over the last [`PERFORMANCE_WINDOW`] ticks.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMonitor {
    samples: VecDeque<f32>,
}

impl PerformanceMonitor {
    pub fn record(&mut self, frame_time: f32) {
        if !frame_time.is_finite() || frame_time < 0.0 {
            return;
        }
        self.samples.push_back(frame_time);
        while self.samples.len() > PERFORMANCE_WINDOW {
            self.samples.pop_front();
        }
    }

    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn is_poor(&self) -> bool {
        self.average() > POOR_FRAME_TIME
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Cached device capabilities backed by a probe.
pub struct DeviceCapabilities {
    probe: Box<dyn DeviceProbe>,
    profile: Option<DeviceProfile>,
    pixel_ratio: f32,
    monitor: PerformanceMonitor,
    low_performance: bool,
}

impl DeviceCapabilities {
    pub fn new(probe: impl DeviceProbe + 'static) -> Self {
        let pixel_ratio = probe.pixel_ratio();
        Self {
            probe: Box::new(probe),
            profile: None,
            pixel_ratio,
            monitor: PerformanceMonitor::default(),
            low_performance: false,
        }
    }

    /// Detect once, then serve the cached profile.
    pub fn profile(&mut self) -> DeviceProfile {
        if let Some(profile) = self.profile {
            return profile;
        }
        let profile = self.detect();
        self.profile = Some(profile);
        profile
    }

    pub fn cached_profile(&self) -> Option<DeviceProfile> {
        self.profile
    }

    /// Forget the cached profile; the next [`profile`](Self::profile) call re-detects.
    pub fn invalidate(&mut self) {
        self.profile = None;
    }

    fn detect(&self) -> DeviceProfile {
        let is_mobile = classify_mobile(&self.probe.platform());
        if !is_mobile {
            info!(
                "desktop device, max texture dimension {}",
                DESKTOP_MAX_TEXTURE_DIMENSION
            );
            return DeviceProfile {
                is_mobile,
                max_texture_dimension: DESKTOP_MAX_TEXTURE_DIMENSION,
            };
        }
        let max_texture_dimension = match self.probe.query_max_texture_dimension() {
            Ok(dim) if dim > 0 => {
                info!("mobile device, max texture dimension {}", dim);
                dim
            }
            Ok(_) | Err(_) => {
                warn!(
                    "failed to detect texture size, using fallback {}",
                    MOBILE_FALLBACK_TEXTURE_DIMENSION
                );
                MOBILE_FALLBACK_TEXTURE_DIMENSION
            }
        };
        DeviceProfile {
            is_mobile,
            max_texture_dimension,
        }
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Display density changed: drop frame-time history and the
    /// low-performance flag, keep the texture profile.
    pub fn on_pixel_ratio_changed(&mut self, pixel_ratio: f32) {
        if (pixel_ratio - self.pixel_ratio).abs() < f32::EPSILON {
            return;
        }
        info!(
            "pixel ratio changed {} -> {}",
            self.pixel_ratio, pixel_ratio
        );
        self.pixel_ratio = pixel_ratio;
        self.monitor.reset();
        self.low_performance = false;
    }

    /// Record one host tick and update the low-performance flag once the
    /// window is full.
    pub fn record_frame_time(&mut self, frame_time: f32) {
        self.monitor.record(frame_time);
        if self.monitor.sample_count() < PERFORMANCE_WINDOW {
            return;
        }
        let poor = self.monitor.is_poor();
        if poor != self.low_performance {
            info!(
                "low-performance mode {} (avg frame {:.1} ms)",
                if poor { "on" } else { "off" },
                self.monitor.average() * 1000.0
            );
            self.low_performance = poor;
        }
    }

    pub fn is_low_performance(&self) -> bool {
        self.low_performance
    }
}

impl std::fmt::Debug for DeviceCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCapabilities")
            .field("profile", &self.profile)
            .field("pixel_ratio", &self.pixel_ratio)
            .field("low_performance", &self.low_performance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingProbe {
        mobile: bool,
        queries: Rc<Cell<u32>>,
    }

    impl DeviceProbe for CountingProbe {
        fn platform(&self) -> PlatformInfo {
            if self.mobile {
                PlatformInfo::android()
            } else {
                PlatformInfo::desktop()
            }
        }

        fn query_max_texture_dimension(&self) -> Result<u32, String> {
            self.queries.set(self.queries.get() + 1);
            Ok(4096)
        }
    }

    #[test]
    fn classifies_ios_android_and_ipados() {
        let iphone = PlatformInfo {
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)".into(),
            platform: "iPhone".into(),
            max_touch_points: 5,
        };
        let ipados = PlatformInfo {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".into(),
            platform: "MacIntel".into(),
            max_touch_points: 5,
        };
        let mac = PlatformInfo {
            max_touch_points: 0,
            ..ipados.clone()
        };
        assert!(classify_mobile(&iphone));
        assert!(classify_mobile(&ipados));
        assert!(classify_mobile(&PlatformInfo::android()));
        assert!(!classify_mobile(&mac));
        assert!(!classify_mobile(&PlatformInfo::desktop()));
    }

    #[test]
    fn desktop_never_queries_texture_size() {
        let queries = Rc::new(Cell::new(0));
        let mut caps = DeviceCapabilities::new(CountingProbe {
            mobile: false,
            queries: queries.clone(),
        });
        let profile = caps.profile();
        assert!(!profile.is_mobile);
        assert_eq!(profile.max_texture_dimension, DESKTOP_MAX_TEXTURE_DIMENSION);
        assert_eq!(queries.get(), 0);
    }

    #[test]
    fn mobile_query_runs_once_until_invalidated() {
        let queries = Rc::new(Cell::new(0));
        let mut caps = DeviceCapabilities::new(CountingProbe {
            mobile: true,
            queries: queries.clone(),
        });
        assert_eq!(caps.profile().max_texture_dimension, 4096);
        caps.profile();
        assert_eq!(queries.get(), 1);

        caps.invalidate();
        caps.profile();
        assert_eq!(queries.get(), 2);
    }

    #[test]
    fn failed_query_uses_conservative_fallback() {
        let mut caps = DeviceCapabilities::new(StaticDeviceProbe::mobile(None));
        assert_eq!(
            caps.profile().max_texture_dimension,
            MOBILE_FALLBACK_TEXTURE_DIMENSION
        );
    }

    #[test]
    fn pixel_ratio_change_resets_low_performance_only() {
        let mut caps = DeviceCapabilities::new(StaticDeviceProbe::mobile(Some(4096)));
        let before = caps.profile();
        for _ in 0..PERFORMANCE_WINDOW {
            caps.record_frame_time(0.040);
        }
        assert!(caps.is_low_performance());

        caps.on_pixel_ratio_changed(3.0);
        assert!(!caps.is_low_performance());
        assert_eq!(caps.cached_profile(), Some(before));
        assert_eq!(caps.pixel_ratio(), 3.0);
    }

    #[test]
    fn monitor_keeps_a_bounded_window() {
        let mut monitor = PerformanceMonitor::default();
        for _ in 0..(PERFORMANCE_WINDOW * 2) {
            monitor.record(0.010);
        }
        assert_eq!(monitor.sample_count(), PERFORMANCE_WINDOW);
        assert!(!monitor.is_poor());
    }
}
