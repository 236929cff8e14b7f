//! Stage clock.
//!
//! Updated once per [`AvatarStage::tick`](crate::stage::AvatarStage::tick).
//! `delta` is the scaled host delta fed to playback; `raw_delta` is what the
//! host reported and what the performance monitor samples.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldTime {
    pub elapsed: f32,
    pub delta: f32,
    pub raw_delta: f32,
    pub time_scale: f32,
    pub frame_count: u64,
}

impl Default for WorldTime {
    fn default() -> Self {
        WorldTime {
            elapsed: 0.0,
            delta: 0.0,
            raw_delta: 0.0,
            time_scale: 1.0,
            frame_count: 0,
        }
    }
}

impl WorldTime {
    pub fn with_time_scale(time_scale: f32) -> Self {
        WorldTime {
            time_scale,
            ..Default::default()
        }
    }

    /// Apply `time_scale` to `dt` and advance the clock. Negative and
    /// non-finite deltas count as zero.
    pub fn advance(&mut self, dt: f32) -> f32 {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let scaled_dt = dt * self.time_scale;
        self.raw_delta = dt;
        self.delta = scaled_dt;
        self.elapsed += scaled_dt;
        self.frame_count += 1;
        scaled_dt
    }
}
