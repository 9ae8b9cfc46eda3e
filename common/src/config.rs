use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub tick_interval_ms: u64,
    pub output_dwell_ms: u64,
    pub manual_brake: f32,
    pub default_liquidus_c: f32,
    pub default_absolute_max_c: f32,
    pub absolute_max_floor_c: f32,
    pub sensor_fault_hysteresis_s: u32,
    pub state_publish_interval_ms: u64,
    pub default_initial_intensity: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            output_dwell_ms: 2_200,
            manual_brake: 0.75,
            default_liquidus_c: 217.0,
            default_absolute_max_c: 260.0,
            absolute_max_floor_c: 230.0,
            sensor_fault_hysteresis_s: 3,
            state_publish_interval_ms: 2_000,
            default_initial_intensity: 0.5,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(50, 10_000);
        self.state_publish_interval_ms = self.state_publish_interval_ms.max(self.tick_interval_ms);
        self.manual_brake = self.manual_brake.clamp(0.05, 1.0);
        self.default_initial_intensity = self.default_initial_intensity.clamp(0.0, 1.0);
        if self.absolute_max_floor_c > self.default_absolute_max_c {
            self.absolute_max_floor_c = self.default_absolute_max_c;
        }
    }
}

/// Coefficient table for the intensity regulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorConfig {
    pub kp_heat: f32,
    pub kp_reflow: f32,
    pub k_band: f32,
    pub dwell_ms: u64,
    pub slope_dampen: f32,
    pub near_plan_ceiling: f32,
    pub change_epsilon: f32,
    pub threshold_hysteresis_up: f32,
    pub threshold_hysteresis_down: f32,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            kp_heat: 0.010,
            kp_reflow: 0.009,
            k_band: 0.004,
            dwell_ms: 2_000,
            slope_dampen: 0.75,
            near_plan_ceiling: 0.35,
            change_epsilon: 1e-3,
            threshold_hysteresis_up: 2.5,
            threshold_hysteresis_down: 0.5,
        }
    }
}

impl RegulatorConfig {
    pub fn sanitize(&mut self) {
        self.slope_dampen = self.slope_dampen.clamp(0.0, 1.0);
        self.near_plan_ceiling = self.near_plan_ceiling.clamp(0.0, 1.0);
        self.change_epsilon = self.change_epsilon.max(0.0);
        self.threshold_hysteresis_up = self.threshold_hysteresis_up.max(0.0);
        self.threshold_hysteresis_down = self.threshold_hysteresis_down.max(0.0);
    }
}

/// Operator setpoint used when no profile is loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ManualSetpoint {
    pub intensity: f32,
    pub target_temperature: Option<f32>,
}

impl ManualSetpoint {
    pub fn sanitize(&mut self) {
        self.intensity = self.intensity.clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    #[serde(default)]
    pub regulator: RegulatorConfig,
    #[serde(default)]
    pub manual: ManualSetpoint,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub profile_path: Option<String>,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        self.regulator.sanitize();
        self.manual.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut runtime = RuntimeConfig::default();
        runtime.controller.tick_interval_ms = 1;
        runtime.controller.manual_brake = 3.0;
        runtime.controller.absolute_max_floor_c = 400.0;
        runtime.manual.intensity = 1.7;

        runtime.sanitize();

        assert_eq!(runtime.controller.tick_interval_ms, 50);
        assert_eq!(runtime.controller.manual_brake, 1.0);
        assert_eq!(runtime.controller.absolute_max_floor_c, 260.0);
        assert_eq!(runtime.manual.intensity, 1.0);
    }

    #[test]
    fn partial_runtime_file_fills_defaults() {
        let raw = r#"{ "controller": {
            "tick_interval_ms": 500, "output_dwell_ms": 2200, "manual_brake": 0.75,
            "default_liquidus_c": 217.0, "default_absolute_max_c": 260.0,
            "absolute_max_floor_c": 230.0, "sensor_fault_hysteresis_s": 3,
            "state_publish_interval_ms": 2000, "default_initial_intensity": 0.5
        } }"#;

        let runtime: RuntimeConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(runtime.regulator.dwell_ms, 2_000);
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert!(runtime.profile_path.is_none());
    }
}
