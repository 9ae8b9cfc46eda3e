use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControllerMode {
    Manual,
    Profile,
}

impl ControllerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Profile => "PROFILE",
        }
    }
}

/// Point-in-time snapshot of the controller, safe to poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub mode: &'static str,
    #[serde(rename = "profileName")]
    pub profile_name: Option<String>,
    pub phase: i32,
    #[serde(rename = "phaseName")]
    pub phase_name: String,
    #[serde(rename = "phaseType")]
    pub phase_type: Option<&'static str>,
    pub finished: bool,
    pub running: bool,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<f32>,
    pub intensity: f32,
    #[serde(rename = "activeIntensity")]
    pub active_intensity: f32,
    #[serde(rename = "manualIntensity")]
    pub manual_intensity: f32,
    #[serde(rename = "slopeCPerS")]
    pub slope_c_per_s: Option<f32>,
    #[serde(rename = "timeAliveMs")]
    pub time_alive_ms: Option<u64>,
    #[serde(rename = "timeSinceCommandMs")]
    pub time_since_command_ms: Option<u64>,
    #[serde(rename = "phaseElapsedMs")]
    pub phase_elapsed_ms: Option<u64>,
    #[serde(rename = "phaseTimeMs")]
    pub phase_time_ms: Option<u64>,
    #[serde(rename = "nextPhaseInMs")]
    pub next_phase_in_ms: Option<u64>,
    #[serde(rename = "timeAboveLiquidusMs")]
    pub time_above_liquidus_ms: u64,
    #[serde(rename = "talMs")]
    pub tal_ms: u64,
    #[serde(rename = "hitMinTemp")]
    pub hit_min_temp: bool,
    #[serde(rename = "aboveThreshold")]
    pub above_threshold: bool,
}

/// Periodic (temperature, intensity, target) record for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSample {
    pub mode: &'static str,
    pub phase: i32,
    #[serde(rename = "phaseName")]
    pub phase_name: String,
    pub temp: Option<f32>,
    pub target: Option<f32>,
    pub intensity: f32,
    #[serde(rename = "activeIntensity")]
    pub active_intensity: f32,
}
