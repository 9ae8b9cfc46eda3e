use crate::{
    config::RegulatorConfig,
    error::{ensure_finite, EngineError, EngineResult},
    planner::{PhasePlanner, PlannerAux},
    profile::{Phase, PhaseType, ProfileContext},
    regulator::{IntensityRegulator, RegulatorInput},
    slope::SlopeTracker,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecOutput {
    pub intensity: f32,
    /// Temperature surfaced to observers; `None` while cooling.
    pub display_target: Option<f32>,
    pub phase_completed: bool,
    pub aux: PlannerAux,
    pub slope_c_per_s: f32,
    /// Regulator fault for this cycle. `intensity` then repeats the previous
    /// output while the planner verdict still stands.
    pub fault: Option<EngineError>,
}

#[derive(Debug, Clone)]
struct ActivePhase {
    phase: Phase,
    planner: PhasePlanner,
    started_ms: u64,
    last_update_ms: u64,
}

/// Runs one profile phase at a time: slope, planner, then regulator.
#[derive(Debug, Clone)]
pub struct ProfileExecutor {
    regulator: IntensityRegulator,
    slope: SlopeTracker,
    active: Option<ActivePhase>,
    base_intensity: f32,
    default_intensity: f32,
    last_out: f32,
    last_slope: Option<f32>,
    last_aux: PlannerAux,
}

impl ProfileExecutor {
    pub fn new(regulator_config: RegulatorConfig, default_intensity: f32) -> Self {
        Self {
            regulator: IntensityRegulator::new(regulator_config),
            slope: SlopeTracker::new(),
            active: None,
            base_intensity: default_intensity,
            default_intensity,
            last_out: 0.0,
            last_slope: None,
            last_aux: PlannerAux::default(),
        }
    }

    pub fn start_phase(
        &mut self,
        now_ms: u64,
        start_c: f32,
        phase: &Phase,
        context: &ProfileContext,
        last_known_out: f32,
    ) {
        let fallback = if last_known_out > 0.0 {
            last_known_out
        } else {
            self.default_intensity
        };
        let base = phase.initial_intensity.unwrap_or(fallback);
        self.base_intensity = if base.is_finite() {
            base.clamp(0.0, 1.0)
        } else {
            self.default_intensity
        };
        self.last_out = self.base_intensity;
        self.last_slope = None;
        self.last_aux = PlannerAux::default();
        self.slope.reset(start_c, now_ms);

        let mut planner = PhasePlanner::for_phase(phase);
        planner.reset(now_ms, start_c, phase, context);
        self.regulator
            .reset(self.base_intensity, phase.max_slope, context.safety);

        self.active = Some(ActivePhase {
            phase: phase.clone(),
            planner,
            started_ms: now_ms,
            last_update_ms: now_ms,
        });
    }

    pub fn update(&mut self, now_ms: u64, measured_c: f32) -> EngineResult<ExecOutput> {
        let active = self.active.as_mut().ok_or(EngineError::NoActivePhase)?;

        let dt_ms = now_ms.saturating_sub(active.last_update_ms);
        active.last_update_ms = now_ms;

        let slope = ensure_finite(self.slope.sample(measured_c, now_ms), "slope")?;
        self.last_slope = Some(slope);

        let plan = active.planner.update(now_ms, measured_c);
        self.last_aux = plan.aux;

        let computed = self.regulator.compute(
            RegulatorInput {
                now_ms,
                dt_ms,
                measured_c,
                slope_c_per_s: slope,
                planned_c: plan.planned,
                previous_intensity: self.last_out,
            },
            &active.phase,
        );
        let (intensity, fault) = match computed {
            Ok(intensity) => (intensity, None),
            Err(err) => (self.last_out, Some(err)),
        };
        self.last_out = intensity;

        let elapsed_ms = now_ms.saturating_sub(active.started_ms);
        let min_time_ms = active.phase.min_time_ms();
        let phase_completed = plan.completed && !(min_time_ms > 0 && elapsed_ms < min_time_ms);

        let display_target = match active.phase.phase_type {
            PhaseType::Cooling => None,
            PhaseType::Heating | PhaseType::Reflow => plan.planned,
        };

        Ok(ExecOutput {
            intensity,
            display_target,
            phase_completed,
            aux: plan.aux,
            slope_c_per_s: slope,
            fault,
        })
    }

    pub fn phase(&self) -> Option<&Phase> {
        self.active.as_ref().map(|active| &active.phase)
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        self.active
            .as_ref()
            .map(|active| now_ms.saturating_sub(active.started_ms))
            .unwrap_or(0)
    }

    pub fn base_intensity(&self) -> f32 {
        self.base_intensity
    }

    pub fn slope(&self) -> Option<f32> {
        self.last_slope
    }

    pub fn last_aux(&self) -> PlannerAux {
        self.last_aux
    }

    pub fn above_threshold(&self) -> bool {
        self.regulator.above_threshold()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualOutput {
    pub intensity: f32,
    pub display_target: Option<f32>,
}

/// Three-band proportional rule toward an operator setpoint.
#[derive(Debug, Clone)]
pub struct ManualExecutor {
    brake: f32,
    slope: SlopeTracker,
    last_out: f32,
    last_slope: Option<f32>,
}

impl ManualExecutor {
    pub fn new(brake: f32) -> Self {
        Self {
            brake,
            slope: SlopeTracker::new(),
            last_out: 0.0,
            last_slope: None,
        }
    }

    pub fn start(&mut self, now_ms: u64, start_c: f32, last_known_out: f32) {
        self.last_out = last_known_out;
        self.slope.reset(start_c, now_ms);
        self.last_slope = None;
    }

    /// `target_c == None` means heater off, whatever the ceiling.
    pub fn update(
        &mut self,
        now_ms: u64,
        measured_c: f32,
        target_c: Option<f32>,
        ceiling: f32,
    ) -> ManualOutput {
        self.last_slope = Some(self.slope.sample(measured_c, now_ms));

        let intensity = match target_c {
            None => 0.0,
            Some(target) if measured_c < target - 10.0 * self.brake => ceiling,
            Some(target) if measured_c < target - 3.0 * self.brake => ceiling * 0.5,
            Some(target) if measured_c < target => ceiling * 0.3,
            Some(_) => 0.0,
        };
        let intensity = if intensity.is_finite() {
            intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.last_out = intensity;
        ManualOutput {
            intensity,
            display_target: target_c,
        }
    }

    pub fn last_output(&self) -> f32 {
        self.last_out
    }

    pub fn slope(&self) -> Option<f32> {
        self.last_slope
    }
}
