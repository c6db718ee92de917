use std::time::Duration;

use rand::Rng;

/// Exponential backoff with downward jitter, applied after a failed poll cycle.
///
/// The base delay for attempt `n` (1-based) is `initial * multiplier^(n-1)`,
/// capped at `max`. Jitter shaves up to `jitter` of that delay off so workers
/// sharing a broken dependency do not retry in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Clamped to `[0, 1]`; a non-finite value disables jitter.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = sanitize_jitter(jitter);
        self
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// `sample` is in `[0, 1)`; 0 yields the full base delay.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let sample = if sample.is_finite() { sample.clamp(0.0, 1.0) } else { 0.0 };
        let factor = 1.0 - sanitize_jitter(self.jitter) * sample;
        self.base_delay(attempt).mul_f64(factor)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample: f64 = rand::thread_rng().gen();
        self.delay_with_sample(attempt, sample)
    }
}

fn sanitize_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
