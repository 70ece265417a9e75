//! Snapshot interpolation for scalar values
//!
//! Remote entities only change state when a snapshot arrives, a handful of
//! times per second. Rendering them at those raw values looks like a slide
//! show, so each replicated scalar is smoothed: every incoming snapshot
//! shifts the current target into "previous" and the display value slides
//! from one to the other over a snapshot interval.

/// Interpolates a discrete stream of snapshot values into a continuous
/// signal.
///
/// `set` records a new target, `get` samples the signal at some elapsed
/// time since that snapshot. The output deliberately is not clamped: if a
/// snapshot arrives late the value overshoots slightly past the target,
/// which reads as continued motion rather than a freeze.
#[derive(Debug, Clone, Copy)]
pub struct FloatLerp {
    previous: f32,
    target: f32,
    rate_hz: f32,
}

impl FloatLerp {
    /// Creates an interpolator that completes one blend per `1 / rate_hz`
    /// seconds. `rate_hz` should be the snapshot emission rate.
    pub fn new(rate_hz: f32) -> Self {
        Self::with_initial(0.0, rate_hz)
    }

    /// Creates an interpolator pre-loaded with a starting value, so the
    /// first `get` does not blend up from zero.
    pub fn with_initial(value: f32, rate_hz: f32) -> Self {
        Self {
            previous: value,
            target: value,
            rate_hz,
        }
    }

    /// Records a freshly received snapshot value as the new target.
    pub fn set(&mut self, value: f32) {
        self.previous = self.target;
        self.target = value;
    }

    /// Snaps both endpoints to `value`, e.g. after a teleport where
    /// blending would sweep through the intervening space.
    pub fn reset(&mut self, value: f32) {
        self.previous = value;
        self.target = value;
    }

    /// The most recently set target value.
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Samples the signal `elapsed` seconds after the last snapshot.
    pub fn get(&self, elapsed: f32) -> f32 {
        let alpha = elapsed * self.rate_hz;
        self.previous + (self.target - self.previous) * alpha
    }

    /// Samples an angular value in degrees, interpolating along the
    /// shortest path, so 359 -> 1 passes through 0 rather than sweeping
    /// backward through 180. The result is normalized into `[0, 360)`.
    pub fn get_angle(&self, elapsed: f32) -> f32 {
        let alpha = elapsed * self.rate_hz;
        let delta = (self.target - self.previous + 180.0).rem_euclid(360.0) - 180.0;
        (self.previous + delta * alpha).rem_euclid(360.0)
    }
}
