use std::time::{Duration, Instant};

use hotreload::FrameUniforms;

/// Snapshot of the time state supplied to the shader uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock time since the preview started.
    pub elapsed: Duration,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(elapsed: Duration, frame_index: u64) -> Self {
        Self {
            elapsed,
            frame_index,
        }
    }

    /// Builds the per-frame uniform values for a surface of `size` pixels.
    pub fn uniforms(&self, size: (u32, u32), frequency: f32) -> FrameUniforms {
        FrameUniforms {
            time: self.elapsed.as_secs_f32(),
            resolution: [size.0 as f32, size.1 as f32],
            phase: oscillator_phase(self.elapsed, frequency),
            frequency,
        }
    }
}

/// Clock backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    origin: Instant,
    frame: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces a time sample for the next frame.
    pub fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.origin.elapsed(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            frame: 0,
        }
    }
}

/// Fractional oscillator cycles completed after `elapsed`, in `[0, 1)`.
///
/// Computed in f64 so the phase stays smooth over long sessions.
pub fn oscillator_phase(elapsed: Duration, frequency: f32) -> f32 {
    let cycles = elapsed.as_secs_f64() * f64::from(frequency);
    cycles.rem_euclid(1.0) as f32
}
