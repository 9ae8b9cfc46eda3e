use serde::Serialize;

use crate::{
    config::{ControllerConfig, ManualSetpoint, RegulatorConfig},
    error::EngineError,
    executor::{ManualExecutor, ProfileExecutor},
    profile::{PhaseType, Profile, ProfileContext},
    types::{ControllerMode, ControllerStatus, StateSample},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineAction {
    SetPulse(f32),
}

/// Phase lifecycle notifications, published as tagged records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    PhaseStarted {
        index: usize,
        name: String,
        #[serde(rename = "phaseType")]
        phase_type: PhaseType,
        #[serde(rename = "targetTemperature")]
        target_temperature: f32,
        #[serde(rename = "timeS")]
        time_s: u32,
        #[serde(rename = "holdForS")]
        hold_for_s: u32,
        #[serde(rename = "maxTemperature")]
        max_temperature: Option<f32>,
        #[serde(rename = "baseIntensity")]
        base_intensity: f32,
        #[serde(rename = "startTemperature")]
        start_temperature: f32,
    },
    PhaseEnded {
        index: usize,
        name: String,
    },
    ProfileFinished {
        name: String,
    },
    TickFault {
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub actions: Vec<EngineAction>,
    pub events: Vec<EngineEvent>,
}

impl TickOutput {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Active(usize),
    Finished,
}

/// Last command actually sent to the actuator, with its timestamp.
#[derive(Debug, Clone, Copy, Default)]
struct OutputGate {
    last: Option<(f32, u64)>,
}

impl OutputGate {
    fn value(&self) -> f32 {
        self.last.map(|(value, _)| value).unwrap_or(0.0)
    }

    /// Forced commands skip the dwell check; they are used for zeroing.
    fn command(&mut self, now_ms: u64, value: f32, forced: bool, dwell_ms: u64) -> Option<f32> {
        let value = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let send = match self.last {
            None => true,
            Some((last, at_ms)) => {
                let changed = (last - value).abs() > f32::EPSILON;
                changed && (forced || now_ms.saturating_sub(at_ms) >= dwell_ms)
            }
        };

        if send {
            self.last = Some((value, now_ms));
            Some(value)
        } else {
            None
        }
    }

    fn force_zero(&mut self, now_ms: u64) -> Option<f32> {
        self.command(now_ms, 0.0, true, 0)
    }
}

#[derive(Debug, Clone)]
struct ProfileRun {
    profile: Profile,
    state: RunState,
    context: ProfileContext,
    executor: ProfileExecutor,
    time_above_liquidus_ms: u64,
}

#[derive(Debug, Clone)]
struct ManualRun {
    executor: ManualExecutor,
    started: bool,
}

#[derive(Debug, Clone)]
enum RunMode {
    Manual(ManualRun),
    Profile(Box<ProfileRun>),
}

#[derive(Debug, Clone)]
struct Run {
    mode: RunMode,
    measured_c: Option<f32>,
    display_target: Option<f32>,
    slope: Option<f32>,
    last_tick_ms: Option<u64>,
}

/// Phase state machine and actuator output stage.
///
/// The controller is a pure state machine: it is fed `(now, measured)` on
/// every tick and returns actions for the host to apply plus events for
/// observers. Everything belonging to one run lives in `Run`, which is
/// replaced wholesale whenever the profile changes.
#[derive(Debug, Clone)]
pub struct ReflowController {
    pub config: ControllerConfig,
    regulator_config: RegulatorConfig,
    manual: ManualSetpoint,
    run: Run,
    gate: OutputGate,
    started_ms: Option<u64>,
    stopped_ms: Option<u64>,
    last_command_ms: Option<u64>,
}

impl ReflowController {
    pub fn new(config: ControllerConfig, regulator_config: RegulatorConfig) -> Self {
        let run = Self::fresh_run(&config, &regulator_config, None);
        Self {
            config,
            regulator_config,
            manual: ManualSetpoint::default(),
            run,
            gate: OutputGate::default(),
            started_ms: None,
            stopped_ms: None,
            last_command_ms: None,
        }
    }

    fn fresh_run(
        config: &ControllerConfig,
        regulator_config: &RegulatorConfig,
        profile: Option<Profile>,
    ) -> Run {
        let mode = match profile {
            Some(profile) => RunMode::Profile(Box::new(ProfileRun {
                context: ProfileContext::build(&profile, config),
                profile,
                state: RunState::NotStarted,
                executor: ProfileExecutor::new(
                    regulator_config.clone(),
                    config.default_initial_intensity,
                ),
                time_above_liquidus_ms: 0,
            })),
            None => RunMode::Manual(ManualRun {
                executor: ManualExecutor::new(config.manual_brake),
                started: false,
            }),
        };

        Run {
            mode,
            measured_c: None,
            display_target: None,
            slope: None,
            last_tick_ms: None,
        }
    }

    /// Replaces the current run. `None` switches to manual control.
    pub fn set_profile(&mut self, profile: Option<Profile>) {
        let measured_c = self.run.measured_c;
        self.run = Self::fresh_run(&self.config, &self.regulator_config, profile);
        self.run.measured_c = measured_c;
    }

    pub fn profile(&self) -> Option<&Profile> {
        match &self.run.mode {
            RunMode::Profile(run) => Some(&run.profile),
            RunMode::Manual(_) => None,
        }
    }

    pub fn set_manual_setpoint(&mut self, intensity: f32, target_c: Option<f32>, now_ms: u64) {
        self.manual = ManualSetpoint {
            intensity,
            target_temperature: target_c.filter(|target| target.is_finite()),
        };
        self.manual.sanitize();
        self.last_command_ms = Some(now_ms);
    }

    pub fn manual_setpoint(&self) -> &ManualSetpoint {
        &self.manual
    }

    /// Marks the beginning of a run; the current profile restarts from the
    /// first phase.
    pub fn start(&mut self, now_ms: u64) {
        self.started_ms = Some(now_ms);
        self.stopped_ms = None;
        let profile = self.profile().cloned();
        self.set_profile(profile);
    }

    pub fn stop(&mut self, now_ms: u64) {
        if self.started_ms.is_some() && self.stopped_ms.is_none() {
            self.stopped_ms = Some(now_ms);
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_ms.is_some() && self.stopped_ms.is_none()
    }

    pub fn tick(&mut self, now_ms: u64, measured_c: Option<f32>) -> TickOutput {
        let mut output = TickOutput::default();
        let Some(measured_c) = measured_c else {
            return output;
        };
        if !measured_c.is_finite() {
            output.events.push(EngineEvent::TickFault {
                message: EngineError::NonFinite {
                    what: "measured temperature",
                }
                .to_string(),
            });
            return output;
        }

        let dt_ms = self
            .run
            .last_tick_ms
            .map(|last| now_ms.saturating_sub(last))
            .unwrap_or(0);
        self.run.last_tick_ms = Some(now_ms);
        self.run.measured_c = Some(measured_c);

        let dwell_ms = self.config.output_dwell_ms;
        let manual_max_c = self.config.default_absolute_max_c;

        match &mut self.run.mode {
            RunMode::Manual(manual) => {
                if !manual.started {
                    manual
                        .executor
                        .start(now_ms, measured_c, self.gate.value());
                    manual.started = true;
                }

                let out = manual.executor.update(
                    now_ms,
                    measured_c,
                    self.manual.target_temperature,
                    self.manual.intensity,
                );
                self.run.display_target = out.display_target;
                self.run.slope = manual.executor.slope();

                let over_limit = measured_c >= manual_max_c;
                let intensity = if over_limit { 0.0 } else { out.intensity };
                if let Some(value) = self.gate.command(now_ms, intensity, over_limit, dwell_ms) {
                    output.actions.push(EngineAction::SetPulse(value));
                }
            }
            RunMode::Profile(run) => match run.state {
                RunState::NotStarted => {
                    let last_out = self.gate.value();
                    if let Some(target) =
                        run.advance(now_ms, measured_c, last_out, &self.config, &mut output)
                    {
                        self.run.display_target = target;
                    }
                    if run.state == RunState::Finished {
                        self.run.display_target = None;
                        output
                            .actions
                            .extend(self.gate.force_zero(now_ms).map(EngineAction::SetPulse));
                    } else {
                        self.last_command_ms = Some(now_ms);
                    }
                }
                RunState::Finished => {
                    self.run.display_target = None;
                    output
                        .actions
                        .extend(self.gate.force_zero(now_ms).map(EngineAction::SetPulse));
                }
                RunState::Active(index) => {
                    if measured_c >= run.context.liquidus_temperature {
                        run.time_above_liquidus_ms += dt_ms;
                    }

                    let exec = match run.executor.update(now_ms, measured_c) {
                        Ok(exec) => exec,
                        Err(err) => {
                            output.events.push(EngineEvent::TickFault {
                                message: err.to_string(),
                            });
                            return output;
                        }
                    };
                    if let Some(err) = exec.fault {
                        output.events.push(EngineEvent::TickFault {
                            message: err.to_string(),
                        });
                    }
                    self.run.display_target = exec.display_target;
                    self.run.slope = Some(exec.slope_c_per_s);

                    // The finishing tick only sends the forced zero below.
                    let finishing = exec.phase_completed && index + 1 >= run.profile.phases.len();
                    let over_limit = measured_c >= run.context.safety.absolute_max_temperature;
                    let intensity = if over_limit {
                        Some(0.0)
                    } else if finishing || exec.fault.is_some() {
                        None
                    } else {
                        Some(exec.intensity)
                    };
                    if let Some(value) = intensity
                        .and_then(|intensity| self.gate.command(now_ms, intensity, over_limit, dwell_ms))
                    {
                        output.actions.push(EngineAction::SetPulse(value));
                    }

                    if exec.phase_completed {
                        let last_out = self.gate.value();
                        if let Some(target) =
                            run.advance(now_ms, measured_c, last_out, &self.config, &mut output)
                        {
                            self.run.display_target = target;
                        }
                        if run.state == RunState::Finished {
                            self.run.display_target = None;
                            output
                                .actions
                                .extend(self.gate.force_zero(now_ms).map(EngineAction::SetPulse));
                        } else {
                            self.last_command_ms = Some(now_ms);
                        }
                    }
                }
            },
        }

        output
    }

    pub fn mode(&self) -> ControllerMode {
        match self.run.mode {
            RunMode::Manual(_) => ControllerMode::Manual,
            RunMode::Profile(_) => ControllerMode::Profile,
        }
    }

    pub fn run_state(&self) -> Option<RunState> {
        match &self.run.mode {
            RunMode::Profile(run) => Some(run.state),
            RunMode::Manual(_) => None,
        }
    }

    /// -1 before the first phase (and in manual mode), N once finished.
    pub fn phase_index(&self) -> i32 {
        match &self.run.mode {
            RunMode::Manual(_) => -1,
            RunMode::Profile(run) => match run.state {
                RunState::NotStarted => -1,
                RunState::Active(index) => i32::try_from(index).unwrap_or(i32::MAX),
                RunState::Finished => i32::try_from(run.profile.phases.len()).unwrap_or(i32::MAX),
            },
        }
    }

    pub fn phase_type(&self) -> Option<PhaseType> {
        self.active_run()
            .and_then(|(run, index)| run.profile.phases.get(index))
            .map(|phase| phase.phase_type)
    }

    pub fn phase_name(&self) -> String {
        match &self.run.mode {
            RunMode::Manual(_) => "Manual".to_string(),
            RunMode::Profile(run) => match run.state {
                RunState::NotStarted => "pending".to_string(),
                RunState::Active(index) => run.profile.phase_name(index),
                RunState::Finished => run.profile.phase_name(run.profile.phases.len()),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.run_state() == Some(RunState::Finished)
    }

    pub fn target_temperature(&self) -> Option<f32> {
        self.run.display_target
    }

    pub fn current_temperature(&self) -> Option<f32> {
        self.run.measured_c
    }

    pub fn commanded_intensity(&self) -> f32 {
        self.gate.value()
    }

    pub fn slope(&self) -> Option<f32> {
        self.run.slope
    }

    pub fn time_alive_ms(&self, now_ms: u64) -> Option<u64> {
        self.started_ms
            .map(|start| self.stopped_ms.unwrap_or(now_ms).saturating_sub(start))
    }

    pub fn time_since_command_ms(&self, now_ms: u64) -> Option<u64> {
        if !self.is_running() {
            return None;
        }
        self.last_command_ms
            .map(|last| now_ms.saturating_sub(last))
    }

    pub fn phase_elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.active_run()
            .map(|(run, _)| run.executor.elapsed_ms(now_ms))
    }

    pub fn phase_time_ms(&self) -> Option<u64> {
        let (run, index) = self.active_run()?;
        let phase = run.profile.phases.get(index)?;
        if phase.time > 0 {
            Some(phase.time_ms())
        } else if phase.hold_for > 0 {
            Some(phase.hold_for_ms())
        } else {
            None
        }
    }

    /// Rough remaining time from the phase time goal or the remaining hold.
    pub fn next_phase_in_ms(&self, now_ms: u64) -> Option<u64> {
        let (run, index) = self.active_run()?;
        let phase = run.profile.phases.get(index)?;
        let elapsed_ms = run.executor.elapsed_ms(now_ms);

        let by_time = (phase.time > 0).then(|| phase.time_ms().saturating_sub(elapsed_ms));
        let by_hold = (phase.hold_for > 0)
            .then(|| phase.hold_for_ms().saturating_sub(run.executor.last_aux().tal_ms));

        match (by_time, by_hold) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn time_above_liquidus_ms(&self) -> u64 {
        match &self.run.mode {
            RunMode::Profile(run) => run.time_above_liquidus_ms,
            RunMode::Manual(_) => 0,
        }
    }

    pub fn status(&self, now_ms: u64, active_intensity: f32) -> ControllerStatus {
        let aux = self
            .active_run()
            .map(|(run, _)| run.executor.last_aux())
            .unwrap_or_default();
        let above_threshold = self
            .active_run()
            .map(|(run, _)| run.executor.above_threshold())
            .unwrap_or(false);

        ControllerStatus {
            mode: self.mode().as_str(),
            profile_name: self.profile().map(|profile| profile.name.clone()),
            phase: self.phase_index(),
            phase_name: self.phase_name(),
            phase_type: self.phase_type().map(PhaseType::as_str),
            finished: self.is_finished(),
            running: self.is_running(),
            current_temp: self.run.measured_c,
            target_temp: self.run.display_target,
            intensity: self.commanded_intensity(),
            active_intensity,
            manual_intensity: self.manual.intensity,
            slope_c_per_s: self.run.slope,
            time_alive_ms: self.time_alive_ms(now_ms),
            time_since_command_ms: self.time_since_command_ms(now_ms),
            phase_elapsed_ms: self.phase_elapsed_ms(now_ms),
            phase_time_ms: self.phase_time_ms(),
            next_phase_in_ms: self.next_phase_in_ms(now_ms),
            time_above_liquidus_ms: self.time_above_liquidus_ms(),
            tal_ms: aux.tal_ms,
            hit_min_temp: aux.hit_min_temp,
            above_threshold,
        }
    }

    pub fn sample(&self, active_intensity: f32) -> StateSample {
        StateSample {
            mode: self.mode().as_str(),
            phase: self.phase_index(),
            phase_name: self.phase_name(),
            temp: self.run.measured_c,
            target: self.run.display_target,
            intensity: self.commanded_intensity(),
            active_intensity,
        }
    }

    fn active_run(&self) -> Option<(&ProfileRun, usize)> {
        match &self.run.mode {
            RunMode::Profile(run) => match run.state {
                RunState::Active(index) => Some((&**run, index)),
                _ => None,
            },
            RunMode::Manual(_) => None,
        }
    }
}

impl ProfileRun {
    /// Moves to the next phase (or to `Finished`). Returns the display target
    /// for a freshly entered phase.
    fn advance(
        &mut self,
        now_ms: u64,
        measured_c: f32,
        last_out: f32,
        config: &ControllerConfig,
        output: &mut TickOutput,
    ) -> Option<Option<f32>> {
        let next = match self.state {
            RunState::NotStarted => 0,
            RunState::Active(index) => {
                output.events.push(EngineEvent::PhaseEnded {
                    index,
                    name: self.profile.phase_name(index),
                });
                index + 1
            }
            RunState::Finished => return None,
        };

        let Some(phase) = self.profile.phases.get(next) else {
            self.state = RunState::Finished;
            output.events.push(EngineEvent::ProfileFinished {
                name: self.profile.name.clone(),
            });
            return None;
        };

        self.context = ProfileContext::build(&self.profile, config);
        self.executor
            .start_phase(now_ms, measured_c, phase, &self.context, last_out);
        self.state = RunState::Active(next);

        output.events.push(EngineEvent::PhaseStarted {
            index: next,
            name: self.profile.phase_name(next),
            phase_type: phase.phase_type,
            target_temperature: phase.target_temperature,
            time_s: phase.time,
            hold_for_s: phase.hold_for,
            max_temperature: phase.max_temperature,
            base_intensity: self.executor.base_intensity(),
            start_temperature: measured_c,
        });

        // Until the planner has run, show the start temperature as target.
        Some(match phase.phase_type {
            PhaseType::Cooling => None,
            PhaseType::Heating | PhaseType::Reflow => Some(measured_c),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Phase;
    use pretty_assertions::assert_eq;

    fn controller() -> ReflowController {
        ReflowController::new(ControllerConfig::default(), RegulatorConfig::default())
    }

    fn short_profile() -> Profile {
        let mut heat = Phase::new("preheat", PhaseType::Heating, 150.0);
        heat.time = 10;
        let mut reflow = Phase::new("reflow", PhaseType::Reflow, 200.0);
        reflow.hold_for = 2;
        let mut cool = Phase::new("cool", PhaseType::Cooling, 100.0);
        cool.time = 3;

        Profile {
            name: "short".to_string(),
            description: None,
            liquidus_temperature: Some(183.0),
            phases: vec![heat, reflow, cool],
        }
    }

    fn pulses(output: &TickOutput) -> Vec<f32> {
        output
            .actions
            .iter()
            .map(|EngineAction::SetPulse(value)| *value)
            .collect()
    }

    #[test]
    fn tick_without_reading_is_a_no_op() {
        let mut controller = controller();
        controller.set_profile(Some(short_profile()));

        assert!(controller.tick(500, None).is_empty());
        assert_eq!(controller.phase_index(), -1);
    }

    #[test]
    fn first_tick_enters_first_phase_without_pulse() {
        let mut controller = controller();
        controller.set_profile(Some(short_profile()));

        let output = controller.tick(1_000, Some(25.0));

        assert!(output.actions.is_empty());
        assert_eq!(controller.phase_index(), 0);
        assert_eq!(controller.phase_type(), Some(PhaseType::Heating));
        assert_eq!(controller.target_temperature(), Some(25.0));
        assert!(matches!(
            output.events.as_slice(),
            [EngineEvent::PhaseStarted { index: 0, .. }]
        ));
    }

    #[test]
    fn walks_all_phases_and_finishes_once() {
        let mut controller = controller();
        controller.set_profile(Some(short_profile()));

        // Temperature trace: heat to target, hold, cool.
        let mut now = 0;
        let mut last_index = -1;
        let mut finished_events = 0;
        let mut temperature: f32 = 25.0;

        while now < 120_000 {
            now += 500;
            temperature = match controller.phase_type() {
                Some(PhaseType::Heating) => (temperature + 10.0).min(152.0),
                Some(PhaseType::Reflow) => 205.0,
                Some(PhaseType::Cooling) | None => (temperature - 5.0).max(20.0),
            };

            let output = controller.tick(now, Some(temperature));
            finished_events += output
                .events
                .iter()
                .filter(|event| matches!(event, EngineEvent::ProfileFinished { .. }))
                .count();

            let index = controller.phase_index();
            assert!(index >= last_index, "phase index regressed at {now}");
            last_index = index;
        }

        assert!(controller.is_finished());
        assert_eq!(controller.phase_index(), 3);
        assert_eq!(controller.phase_name(), "finished");
        assert_eq!(finished_events, 1);
        assert_eq!(controller.commanded_intensity(), 0.0);
        assert_eq!(controller.target_temperature(), None);
    }

    #[test]
    fn finished_ticks_stay_silent_at_zero() {
        let mut controller = controller();
        let mut heat = Phase::new("heat", PhaseType::Heating, 100.0);
        heat.initial_intensity = Some(0.9);
        controller.set_profile(Some(Profile {
            name: "one".to_string(),
            description: None,
            liquidus_temperature: None,
            phases: vec![heat],
        }));

        controller.tick(0, Some(20.0));
        let heating = controller.tick(500, Some(50.0));
        assert_eq!(pulses(&heating), vec![1.0]);

        let done = controller.tick(1_000, Some(100.0));
        assert_eq!(pulses(&done), vec![0.0]);
        assert!(done
            .events
            .iter()
            .any(|event| matches!(event, EngineEvent::ProfileFinished { .. })));

        for now in (1_500..10_000).step_by(500) {
            let output = controller.tick(now, Some(90.0));
            assert!(output.is_empty(), "unexpected output at {now}: {output:?}");
            assert_eq!(controller.commanded_intensity(), 0.0);
        }
    }

    #[test]
    fn empty_profile_finishes_on_first_tick() {
        let mut controller = controller();
        controller.set_profile(Some(Profile {
            name: "empty".to_string(),
            description: None,
            liquidus_temperature: None,
            phases: Vec::new(),
        }));

        let output = controller.tick(0, Some(20.0));

        assert!(controller.is_finished());
        assert_eq!(controller.phase_index(), 0);
        assert_eq!(
            output.events,
            vec![EngineEvent::ProfileFinished {
                name: "empty".to_string()
            }]
        );
    }

    #[test]
    fn set_profile_resets_to_not_started() {
        let mut controller = controller();
        controller.set_profile(Some(short_profile()));
        controller.tick(0, Some(20.0));
        assert_eq!(controller.phase_index(), 0);

        controller.set_profile(Some(short_profile()));
        assert_eq!(controller.phase_index(), -1);
        assert_eq!(controller.run_state(), Some(RunState::NotStarted));

        controller.set_profile(None);
        assert_eq!(controller.mode(), ControllerMode::Manual);
        assert_eq!(controller.phase_index(), -1);
        assert_eq!(controller.phase_name(), "Manual");
    }

    #[test]
    fn output_stage_enforces_dwell_between_commands() {
        let mut controller = controller();
        controller.set_manual_setpoint(1.0, Some(200.0), 0);

        assert_eq!(pulses(&controller.tick(0, Some(20.0))), vec![1.0]);
        // 198 °C is in the 0.3 band, but the previous command is too recent.
        assert!(controller.tick(1_000, Some(198.0)).actions.is_empty());
        assert_eq!(controller.commanded_intensity(), 1.0);

        let later = controller.tick(2_200, Some(198.0));
        assert_eq!(pulses(&later), vec![0.3]);
    }

    #[test]
    fn manual_null_target_commands_zero() {
        let mut controller = controller();
        controller.set_manual_setpoint(1.0, None, 0);

        for now in (0..5_000).step_by(500) {
            controller.tick(now, Some(25.0));
            assert_eq!(controller.commanded_intensity(), 0.0);
        }
    }

    #[test]
    fn manual_over_limit_zeroes_without_dwell() {
        let mut controller = controller();
        controller.set_manual_setpoint(1.0, Some(300.0), 0);

        assert_eq!(pulses(&controller.tick(0, Some(100.0))), vec![1.0]);
        assert_eq!(pulses(&controller.tick(500, Some(261.0))), vec![0.0]);
    }

    #[test]
    fn non_finite_reading_is_reported_and_output_kept() {
        let mut controller = controller();
        controller.set_manual_setpoint(0.6, Some(200.0), 0);
        controller.tick(0, Some(20.0));

        let output = controller.tick(500, Some(f32::NAN));

        assert!(output.actions.is_empty());
        assert!(matches!(
            output.events.as_slice(),
            [EngineEvent::TickFault { .. }]
        ));
        assert_eq!(controller.commanded_intensity(), 0.6);
        assert_eq!(controller.current_temperature(), Some(20.0));
    }

    #[test]
    fn tracks_time_above_liquidus_and_status() {
        let mut controller = controller();
        controller.set_profile(Some(short_profile()));
        controller.start(0);

        controller.tick(0, Some(100.0));
        controller.tick(500, Some(120.0));
        controller.tick(1_000, Some(185.0));
        controller.tick(1_500, Some(186.0));

        assert_eq!(controller.time_above_liquidus_ms(), 1_000);

        let status = controller.status(2_000, 0.25);
        assert_eq!(status.mode, "PROFILE");
        assert_eq!(status.phase, 0);
        assert_eq!(status.phase_name, "preheat");
        assert_eq!(status.phase_type, Some("HEATING"));
        assert_eq!(status.phase_time_ms, Some(10_000));
        assert_eq!(status.next_phase_in_ms, Some(8_000));
        assert_eq!(status.time_alive_ms, Some(2_000));
        assert_eq!(status.active_intensity, 0.25);
        assert!(status.running);
        assert!(!status.finished);
    }

    #[test]
    fn finishing_tick_sends_a_single_zero() {
        let mut controller = controller();
        let mut heat = Phase::new("heat", PhaseType::Heating, 100.0);
        heat.initial_intensity = Some(0.9);
        controller.set_profile(Some(Profile {
            name: "one".to_string(),
            description: None,
            liquidus_temperature: None,
            phases: vec![heat],
        }));

        controller.tick(0, Some(20.0));
        assert_eq!(pulses(&controller.tick(500, Some(50.0))), vec![1.0]);

        // Dwell has elapsed and the regulator would now ask for 0.35.
        let done = controller.tick(3_000, Some(99.6));

        assert_eq!(pulses(&done), vec![0.0]);
        assert!(controller.is_finished());
    }

    #[test]
    fn profile_over_limit_zeroes_without_dwell() {
        let mut controller = controller();
        let mut heat = Phase::new("heat", PhaseType::Heating, 255.0);
        heat.initial_intensity = Some(1.0);
        heat.hold_for = 30;
        controller.set_profile(Some(Profile {
            name: "hot".to_string(),
            description: None,
            liquidus_temperature: None,
            phases: vec![heat],
        }));

        assert!(controller.tick(0, Some(20.0)).actions.is_empty());
        assert_eq!(pulses(&controller.tick(500, Some(200.0))), vec![1.0]);
        assert_eq!(pulses(&controller.tick(1_000, Some(261.0))), vec![0.0]);
        assert_eq!(controller.phase_index(), 0);
    }

    #[test]
    fn phase_transition_ends_before_starting_next() {
        let mut controller = controller();
        let heat = Phase::new("heat", PhaseType::Heating, 150.0);
        let mut cool = Phase::new("cool", PhaseType::Cooling, 60.0);
        cool.time = 30;
        controller.set_profile(Some(Profile {
            name: "two".to_string(),
            description: None,
            liquidus_temperature: None,
            phases: vec![heat, cool],
        }));

        controller.tick(0, Some(20.0));
        let output = controller.tick(500, Some(151.0));

        assert!(matches!(
            output.events.as_slice(),
            [
                EngineEvent::PhaseEnded { index: 0, .. },
                EngineEvent::PhaseStarted { index: 1, .. },
            ]
        ));
        assert_eq!(controller.phase_index(), 1);
        assert_eq!(controller.target_temperature(), None);
    }

    #[test]
    fn regulator_fault_still_lets_timed_phase_finish() {
        let mut controller = controller();
        let mut heat = Phase::new("heat", PhaseType::Heating, f32::INFINITY);
        heat.time = 1;
        controller.set_profile(Some(Profile {
            name: "broken".to_string(),
            description: None,
            liquidus_temperature: None,
            phases: vec![heat],
        }));

        controller.tick(0, Some(20.0));
        let faulted = controller.tick(500, Some(25.0));
        assert!(faulted.actions.is_empty());
        assert!(matches!(
            faulted.events.as_slice(),
            [EngineEvent::TickFault { .. }]
        ));

        let done = controller.tick(1_000, Some(30.0));
        assert!(done
            .events
            .iter()
            .any(|event| matches!(event, EngineEvent::ProfileFinished { .. })));
        assert_eq!(pulses(&done), vec![0.0]);
        assert!(controller.is_finished());
    }

    #[test]
    fn event_records_are_tagged() {
        let event = EngineEvent::ProfileFinished {
            name: "SAC305".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "type": "PROFILE_FINISHED", "name": "SAC305" })
        );
    }
}
