/// Two-point rate-of-change estimator in °C/s. No smoothing.
#[derive(Debug, Clone, Default)]
pub struct SlopeTracker {
    last: Option<(f32, u64)>,
}

impl SlopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, temperature_c: f32, now_ms: u64) {
        self.last = Some((temperature_c, now_ms));
    }

    pub fn sample(&mut self, temperature_c: f32, now_ms: u64) -> f32 {
        let previous = self.last.replace((temperature_c, now_ms));
        let Some((previous_c, previous_ms)) = previous else {
            return 0.0;
        };

        let elapsed_s = now_ms.saturating_sub(previous_ms).max(1) as f32 / 1000.0;
        let slope = (temperature_c - previous_c) / elapsed_s;
        if slope.is_finite() {
            slope
        } else {
            0.0
        }
    }
}
