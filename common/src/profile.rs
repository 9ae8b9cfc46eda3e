use serde::{Deserialize, Serialize};

use crate::config::ControllerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    #[default]
    Heating,
    Reflow,
    Cooling,
}

impl PhaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heating => "HEATING",
            Self::Reflow => "REFLOW",
            Self::Cooling => "COOLING",
        }
    }
}

/// One step of a reflow profile.
///
/// Field meaning depends on `phase_type`:
///  - heating: reach `target_temperature` within `time` seconds
///  - reflow: hold above `target_temperature` for `hold_for` seconds, touching
///    `min_temperature` at least once and never exceeding `max_temperature`
///  - cooling: heater off for `time` seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(rename = "type", default)]
    pub phase_type: PhaseType,
    pub target_temperature: f32,
    #[serde(default)]
    pub time: u32,
    #[serde(default)]
    pub hold_for: u32,
    #[serde(default)]
    pub initial_intensity: Option<f32>,
    #[serde(default)]
    pub max_slope: Option<f32>,
    #[serde(default)]
    pub max_temperature: Option<f32>,
    #[serde(default)]
    pub min_temperature: Option<f32>,
    #[serde(default)]
    pub min_time: Option<u32>,
}

impl Phase {
    pub fn new(name: impl Into<String>, phase_type: PhaseType, target_temperature: f32) -> Self {
        Self {
            name: name.into(),
            phase_type,
            target_temperature,
            time: 0,
            hold_for: 0,
            initial_intensity: None,
            max_slope: None,
            max_temperature: None,
            min_temperature: None,
            min_time: None,
        }
    }

    pub fn time_ms(&self) -> u64 {
        u64::from(self.time) * 1_000
    }

    pub fn hold_for_ms(&self) -> u64 {
        u64::from(self.hold_for) * 1_000
    }

    pub fn min_time_ms(&self) -> u64 {
        u64::from(self.min_time.unwrap_or(0)) * 1_000
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub liquidus_temperature: Option<f32>,
    pub phases: Vec<Phase>,
}

impl Profile {
    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn phase_name(&self, pos: usize) -> String {
        match self.phases.get(pos) {
            None => "finished".to_string(),
            Some(phase) if phase.name.trim().is_empty() => format!("phase-{}", pos + 1),
            Some(phase) => phase.name.clone(),
        }
    }

    /// Highest phase cap in the profile, if any phase declares one.
    pub fn max_phase_temperature(&self) -> Option<f32> {
        self.phases
            .iter()
            .filter_map(|phase| phase.max_temperature)
            .reduce(f32::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub absolute_max_temperature: f32,
    /// Reserved for sensor-fault debouncing.
    pub sensor_fault_hysteresis_s: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            absolute_max_temperature: 260.0,
            sensor_fault_hysteresis_s: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileContext {
    pub liquidus_temperature: f32,
    pub safety: SafetyConfig,
}

impl ProfileContext {
    pub fn build(profile: &Profile, config: &ControllerConfig) -> Self {
        let liquidus_temperature = profile
            .liquidus_temperature
            .unwrap_or(config.default_liquidus_c);
        let absolute_max_temperature = profile
            .max_phase_temperature()
            .unwrap_or(config.default_absolute_max_c)
            .max(config.absolute_max_floor_c);

        Self {
            liquidus_temperature,
            safety: SafetyConfig {
                absolute_max_temperature,
                sensor_fault_hysteresis_s: config.sensor_fault_hysteresis_s,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_PROFILE: &str = r#"{
        "name": "SAC305",
        "liquidus_temperature": 217,
        "phases": [
            { "name": "preheat", "type": "heating", "target_temperature": 150, "time": 90, "max_slope": 2.0 },
            { "name": "", "type": "reflow", "target_temperature": 217, "hold_for": 45,
              "min_temperature": 235, "max_temperature": 249 },
            { "name": "cool", "type": "cooling", "target_temperature": 100, "time": 60 }
        ]
    }"#;

    #[test]
    fn parses_snake_case_profile() {
        let profile = Profile::from_json(SAMPLE_PROFILE.as_bytes()).unwrap();

        assert_eq!(profile.phases.len(), 3);
        assert_eq!(profile.phases[0].phase_type, PhaseType::Heating);
        assert_eq!(profile.phases[1].phase_type, PhaseType::Reflow);
        assert_eq!(profile.phases[1].hold_for_ms(), 45_000);
        assert_eq!(profile.phases[2].min_time, None);
    }

    #[test]
    fn phase_names_fall_back_to_position() {
        let profile = Profile::from_json(SAMPLE_PROFILE.as_bytes()).unwrap();

        assert_eq!(profile.phase_name(0), "preheat");
        assert_eq!(profile.phase_name(1), "phase-2");
        assert_eq!(profile.phase_name(3), "finished");
    }

    #[test]
    fn context_uses_highest_phase_cap_with_floor() {
        let config = ControllerConfig::default();
        let mut profile = Profile::from_json(SAMPLE_PROFILE.as_bytes()).unwrap();

        let context = ProfileContext::build(&profile, &config);
        assert_eq!(context.liquidus_temperature, 217.0);
        assert_eq!(context.safety.absolute_max_temperature, 249.0);

        profile.phases[1].max_temperature = Some(200.0);
        let context = ProfileContext::build(&profile, &config);
        assert_eq!(context.safety.absolute_max_temperature, 230.0);
    }

    #[test]
    fn context_defaults_without_caps_or_liquidus() {
        let config = ControllerConfig::default();
        let profile = Profile {
            name: "bare".to_string(),
            description: None,
            liquidus_temperature: None,
            phases: vec![Phase::new("heat", PhaseType::Heating, 150.0)],
        };

        let context = ProfileContext::build(&profile, &config);

        assert_eq!(context.liquidus_temperature, 217.0);
        assert_eq!(context.safety.absolute_max_temperature, 260.0);
        assert_eq!(context.safety.sensor_fault_hysteresis_s, 3);
    }
}
