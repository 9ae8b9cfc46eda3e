use crate::{
    config::RegulatorConfig,
    error::{ensure_finite, EngineResult},
    profile::{Phase, PhaseType, SafetyConfig},
};

/// Heating: within this distance of the plan the output is capped.
const NEAR_PLAN_C: f32 = 0.5;
/// Heating: within this distance of the phase cap the output is cut.
const PHASE_CAP_MARGIN_C: f32 = 0.5;
/// Reflow: within this distance of the band top the output is cut.
const BAND_TOP_MARGIN_C: f32 = 0.3;
/// Reflow: default band width when the phase has no cap.
const DEFAULT_BAND_WIDTH_C: f32 = 25.0;

/// Per-tick inputs to [`IntensityRegulator::compute`].
///
/// `dt_ms` and `previous_intensity` describe the cycle for callers; the
/// control law reads neither and keeps its own dwell state.
#[derive(Debug, Clone, Copy)]
pub struct RegulatorInput {
    pub now_ms: u64,
    pub dt_ms: u64,
    pub measured_c: f32,
    pub slope_c_per_s: f32,
    /// `None` when the phase has no temperature target.
    pub planned_c: Option<f32>,
    pub previous_intensity: f32,
}

/// Maps measured/planned temperature to a bounded heater duty cycle.
///
/// The dwell state (`last_out`, `last_change_ms`) lives here and is only ever
/// advanced by `compute`, so tests can drive time explicitly.
#[derive(Debug, Clone)]
pub struct IntensityRegulator {
    config: RegulatorConfig,
    safety: SafetyConfig,
    bias: f32,
    max_slope: Option<f32>,
    last_change_ms: Option<u64>,
    last_out: f32,
    above_threshold: bool,
}

impl IntensityRegulator {
    pub fn new(config: RegulatorConfig) -> Self {
        Self {
            config,
            safety: SafetyConfig::default(),
            bias: 0.5,
            max_slope: None,
            last_change_ms: None,
            last_out: 0.5,
            above_threshold: false,
        }
    }

    pub fn reset(&mut self, initial_intensity: f32, max_slope: Option<f32>, safety: SafetyConfig) {
        self.bias = sanitize_duty(initial_intensity);
        self.max_slope = max_slope.filter(|slope| slope.is_finite());
        self.safety = safety;
        self.last_change_ms = None;
        self.last_out = self.bias;
        self.above_threshold = false;
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn last_output(&self) -> f32 {
        self.last_out
    }

    /// Reflow "above threshold" latch, with hysteresis on both edges.
    pub fn above_threshold(&self) -> bool {
        self.above_threshold
    }

    pub fn compute(&mut self, input: RegulatorInput, phase: &Phase) -> EngineResult<f32> {
        if input.measured_c >= self.safety.absolute_max_temperature {
            return Ok(0.0);
        }

        let measured = ensure_finite(input.measured_c, "measured temperature")?;
        let slope = ensure_finite(input.slope_c_per_s, "slope")?;
        let planned = match input.planned_c {
            Some(planned) => Some(ensure_finite(planned, "planned temperature")?),
            None => None,
        };

        let mut u = match (phase.phase_type, planned) {
            (PhaseType::Cooling, _) | (_, None) => 0.0,
            (PhaseType::Heating, Some(planned)) => {
                self.bias + self.config.kp_heat * (planned - measured)
            }
            (PhaseType::Reflow, Some(planned)) => {
                self.bias + self.config.kp_reflow * (planned - measured)
            }
        };

        if let Some(limit) = self.max_slope {
            if slope > limit {
                u *= self.config.slope_dampen;
            }
        }

        match (phase.phase_type, planned) {
            (PhaseType::Heating, Some(planned)) => {
                if measured >= planned - NEAR_PLAN_C {
                    u = u.min(self.config.near_plan_ceiling);
                }
                if let Some(cap) = phase.max_temperature {
                    if measured >= cap - PHASE_CAP_MARGIN_C {
                        u = 0.0;
                    }
                }
            }
            (PhaseType::Reflow, Some(planned)) => {
                self.track_threshold(measured, phase);

                let band_min = phase
                    .min_temperature
                    .unwrap_or(planned)
                    .max(phase.target_temperature);
                let band_max = phase
                    .max_temperature
                    .unwrap_or(band_min + DEFAULT_BAND_WIDTH_C);

                if measured >= band_max - BAND_TOP_MARGIN_C {
                    u = 0.0;
                } else if measured < band_min {
                    u = u.max(self.bias + self.config.kp_reflow * (band_min - measured));
                } else {
                    let mid = (band_min + band_max) / 2.0;
                    u += self.config.k_band * (mid - measured);
                }
            }
            _ => u = 0.0,
        }

        let u = sanitize_duty(u);

        if let Some(last) = self.last_change_ms {
            if input.now_ms.saturating_sub(last) < self.config.dwell_ms {
                return Ok(self.last_out);
            }
        }

        if (u - self.last_out).abs() > self.config.change_epsilon {
            self.last_change_ms = Some(input.now_ms);
            self.last_out = u;
        }

        Ok(self.last_out)
    }

    fn track_threshold(&mut self, measured: f32, phase: &Phase) {
        let threshold = phase.min_temperature.unwrap_or(phase.target_temperature);
        if !self.above_threshold && measured >= threshold + self.config.threshold_hysteresis_up {
            self.above_threshold = true;
        } else if self.above_threshold
            && measured <= threshold - self.config.threshold_hysteresis_down
        {
            self.above_threshold = false;
        }
    }
}

fn sanitize_duty(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
