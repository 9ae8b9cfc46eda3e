use serde::Serialize;

use crate::profile::{Phase, PhaseType, ProfileContext};

/// Margin for "target reached" on ramp phases, in °C.
const RAMP_REACHED_MARGIN_C: f32 = 0.5;
/// Default reflow band width above the band minimum, in °C.
const DEFAULT_BAND_WIDTH_C: f32 = 25.0;
/// Planned temperature is kept this far inside the reflow band edges.
const BAND_EDGE_MARGIN_C: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlannerAux {
    #[serde(rename = "talMs")]
    pub tal_ms: u64,
    #[serde(rename = "hitMinTemp")]
    pub hit_min_temp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanResult {
    /// `None` when the phase has no temperature target (cooling).
    pub planned: Option<f32>,
    pub completed: bool,
    pub aux: PlannerAux,
}

/// Linear ramp toward the phase target, used by heating and cooling phases.
#[derive(Debug, Clone, Default)]
pub struct RampPlanner {
    start_ms: u64,
    start_c: f32,
    target_c: f32,
    horizon_ms: u64,
    min_dwell_ms: u64,
    slope_plan: f32,
    cooling: bool,
}

impl RampPlanner {
    pub fn reset(&mut self, start_ms: u64, start_c: f32, phase: &Phase) {
        self.start_ms = start_ms;
        self.start_c = start_c;
        self.target_c = phase.target_temperature;
        self.horizon_ms = phase.time_ms();
        self.min_dwell_ms = if phase.hold_for > 0 {
            phase.hold_for_ms()
        } else {
            phase.time_ms()
        };
        self.cooling = phase.phase_type == PhaseType::Cooling;

        // time == 0 means "as fast as allowed" toward the target.
        let needed = if self.horizon_ms > 0 {
            (self.target_c - start_c) / phase.time as f32
        } else if self.target_c >= start_c {
            f32::INFINITY
        } else {
            f32::NEG_INFINITY
        };

        self.slope_plan = match phase.max_slope {
            Some(limit) if limit.is_finite() => {
                let limit = limit.abs();
                needed.clamp(-limit, limit)
            }
            _ => needed,
        };
    }

    pub fn slope_plan(&self) -> f32 {
        self.slope_plan
    }

    fn rising(&self) -> bool {
        self.slope_plan >= 0.0
    }

    fn planned_at(&self, now_ms: u64) -> f32 {
        let elapsed_ms = now_ms.saturating_sub(self.start_ms);
        if self.horizon_ms > 0 && elapsed_ms >= self.horizon_ms {
            return self.target_c;
        }
        if !self.slope_plan.is_finite() {
            return self.target_c;
        }

        let ramp = self.start_c + self.slope_plan * (elapsed_ms as f32 / 1000.0);
        if self.rising() {
            ramp.min(self.target_c)
        } else {
            ramp.max(self.target_c)
        }
    }

    pub fn update(&mut self, now_ms: u64, measured_c: f32) -> PlanResult {
        let elapsed_ms = now_ms.saturating_sub(self.start_ms);
        let planned = self.planned_at(now_ms);

        let dwell_done = elapsed_ms >= self.min_dwell_ms;
        let reached = if self.rising() {
            measured_c >= self.target_c - RAMP_REACHED_MARGIN_C
        } else {
            measured_c <= self.target_c + RAMP_REACHED_MARGIN_C
        };
        let timed_out = self.horizon_ms > 0 && elapsed_ms >= self.horizon_ms;

        PlanResult {
            planned: (!self.cooling).then_some(planned),
            completed: (dwell_done && reached) || timed_out,
            aux: PlannerAux::default(),
        }
    }
}

/// Band hold above the reflow threshold, tracking cumulative time above it.
#[derive(Debug, Clone, Default)]
pub struct HoldPlanner {
    last_ms: u64,
    threshold_c: f32,
    band_min_c: f32,
    band_max_c: f32,
    hold_for_ms: u64,
    tal_ms: u64,
    hit_min_temp: bool,
}

impl HoldPlanner {
    pub fn reset(&mut self, start_ms: u64, phase: &Phase) {
        self.last_ms = start_ms;
        self.threshold_c = phase.target_temperature;
        self.band_min_c = phase
            .min_temperature
            .unwrap_or(self.threshold_c)
            .max(self.threshold_c);
        self.band_max_c = phase
            .max_temperature
            .unwrap_or(self.band_min_c + DEFAULT_BAND_WIDTH_C);
        self.hold_for_ms = phase.hold_for_ms();
        self.tal_ms = 0;
        self.hit_min_temp = false;
    }

    pub fn band(&self) -> (f32, f32) {
        (self.band_min_c, self.band_max_c)
    }

    fn planned(&self) -> f32 {
        let mid = (self.band_min_c + self.band_max_c) / 2.0;
        // A band narrower than both margins resolves to band_min + margin.
        mid.min(self.band_max_c - BAND_EDGE_MARGIN_C)
            .max(self.band_min_c + BAND_EDGE_MARGIN_C)
    }

    pub fn update(&mut self, now_ms: u64, measured_c: f32) -> PlanResult {
        let dt_ms = now_ms.saturating_sub(self.last_ms);
        self.last_ms = now_ms;

        let above = measured_c >= self.threshold_c;
        if above {
            self.tal_ms += dt_ms;
        }
        if measured_c >= self.band_min_c {
            self.hit_min_temp = true;
        }

        let hold_ok = if self.hold_for_ms > 0 {
            self.tal_ms >= self.hold_for_ms
        } else {
            above
        };

        PlanResult {
            planned: Some(self.planned()),
            completed: hold_ok && self.hit_min_temp,
            aux: PlannerAux {
                tal_ms: self.tal_ms,
                hit_min_temp: self.hit_min_temp,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum PhasePlanner {
    Ramp(RampPlanner),
    Hold(HoldPlanner),
}

impl PhasePlanner {
    pub fn for_phase(phase: &Phase) -> Self {
        match phase.phase_type {
            PhaseType::Heating | PhaseType::Cooling => Self::Ramp(RampPlanner::default()),
            PhaseType::Reflow => Self::Hold(HoldPlanner::default()),
        }
    }

    /// Context is accepted for parity with the regulator; neither planner
    /// currently reads it.
    pub fn reset(
        &mut self,
        start_ms: u64,
        start_c: f32,
        phase: &Phase,
        _context: &ProfileContext,
    ) {
        match self {
            Self::Ramp(planner) => planner.reset(start_ms, start_c, phase),
            Self::Hold(planner) => planner.reset(start_ms, phase),
        }
    }

    pub fn update(&mut self, now_ms: u64, measured_c: f32) -> PlanResult {
        match self {
            Self::Ramp(planner) => planner.update(now_ms, measured_c),
            Self::Hold(planner) => planner.update(now_ms, measured_c),
        }
    }
}
