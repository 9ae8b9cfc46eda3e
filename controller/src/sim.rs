use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use reflow_common::{Device, DeviceError, TemperatureListener};

const PERIOD: Duration = Duration::from_millis(1_000);
/// °C/s at full pulse once the element has settled.
const HEATING_SPEED: f32 = 0.17;
/// Per-step adaptation of the element toward the commanded speed.
const HEATING_ADAPTION: f32 = 0.3;
/// Passive loss in °C/s while the element is cold.
const COOLING: f32 = 0.05;
const AMBIENT_C: f32 = 20.0;
/// Below this the element counts as cold.
const IDLE_SPEED: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct OvenPhysics {
    temperature_c: f32,
    heating_speed: f32,
    pulse: f32,
}

impl Default for OvenPhysics {
    fn default() -> Self {
        Self {
            temperature_c: AMBIENT_C,
            heating_speed: 0.0,
            pulse: 0.0,
        }
    }
}

impl OvenPhysics {
    fn step(&mut self, dt_s: f32) {
        let heating = HEATING_SPEED * self.pulse;
        self.heating_speed = self.heating_speed * (1.0 - HEATING_ADAPTION) + heating * HEATING_ADAPTION;
        if self.heating_speed < IDLE_SPEED {
            self.heating_speed = 0.0;
        }

        self.temperature_c += self.heating_speed * dt_s;
        if self.heating_speed == 0.0 {
            self.temperature_c = (self.temperature_c - COOLING * dt_s).max(AMBIENT_C);
        }
    }
}

struct Shared {
    physics: Mutex<OvenPhysics>,
    listeners: Mutex<Vec<TemperatureListener>>,
    started: AtomicBool,
}

impl Shared {
    fn physics(&self) -> MutexGuard<'_, OvenPhysics> {
        self.physics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, temperature_c: f32) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(temperature_c);
        }
    }
}

/// In-process oven used when no hardware is attached.
///
/// A worker thread advances a first-order heating model once per period
/// while the oven is started and pushes each new reading to the registered
/// listeners.
pub struct SimulatedOven {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedOven {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                physics: Mutex::new(OvenPhysics::default()),
                listeners: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn spawn_worker(&mut self) -> Result<(), DeviceError> {
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);

        let handle = std::thread::Builder::new()
            .name("simulated-oven".to_string())
            .spawn(move || {
                let mut last = Instant::now();
                while running.load(Ordering::Acquire) {
                    std::thread::sleep(PERIOD);
                    let now = Instant::now();
                    let dt_s = now.duration_since(last).as_secs_f32();
                    last = now;

                    if !shared.started.load(Ordering::Acquire) {
                        continue;
                    }

                    let temperature_c = {
                        let mut physics = shared.physics();
                        physics.step(dt_s);
                        physics.temperature_c
                    };
                    debug!(temperature_c, "simulated oven step");
                    shared.notify(temperature_c);
                }
            })
            .map_err(|err| DeviceError::ReadFailed(format!("worker spawn failed: {err}")))?;

        self.worker = Some(handle);
        Ok(())
    }
}

impl Default for SimulatedOven {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SimulatedOven {
    fn connect(&mut self) -> Result<(), DeviceError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.spawn_worker().inspect_err(|_| {
            self.running.store(false, Ordering::Release);
        })
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::Release);
        self.shared.started.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("simulated oven worker panicked");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        self.shared.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        if self.shared.started.swap(false, Ordering::AcqRel) {
            *self.shared.physics() = OvenPhysics::default();
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    fn temperature(&self) -> Result<f32, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        Ok(self.shared.physics().temperature_c)
    }

    fn set_pulse(&mut self, duty: f32) -> Result<(), DeviceError> {
        if !self.is_started() {
            return Err(DeviceError::NotStarted);
        }
        let duty = if duty.is_finite() { duty.clamp(0.0, 1.0) } else { 0.0 };
        self.shared.physics().pulse = duty;
        Ok(())
    }

    fn pulse(&self) -> f32 {
        self.shared.physics().pulse
    }

    fn on_temperature_changed(&mut self, listener: TemperatureListener) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

impl Drop for SimulatedOven {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pulse_converges_to_heating_speed() {
        let mut physics = OvenPhysics {
            pulse: 1.0,
            ..OvenPhysics::default()
        };

        for _ in 0..60 {
            physics.step(1.0);
        }

        assert!((physics.heating_speed - HEATING_SPEED).abs() < 1e-3);
        assert!(physics.temperature_c > AMBIENT_C + 8.0);
    }

    #[test]
    fn idle_oven_cools_to_ambient_and_stops() {
        let mut physics = OvenPhysics {
            temperature_c: 21.0,
            ..OvenPhysics::default()
        };

        for _ in 0..30 {
            physics.step(1.0);
        }

        assert_eq!(physics.temperature_c, AMBIENT_C);
    }

    #[test]
    fn element_keeps_heating_briefly_after_pulse_drops() {
        let mut physics = OvenPhysics {
            temperature_c: 100.0,
            heating_speed: HEATING_SPEED,
            pulse: 0.0,
        };

        physics.step(1.0);

        assert!(physics.temperature_c > 100.0);
    }

    #[test]
    fn lifecycle_requires_connect_then_start() {
        let mut oven = SimulatedOven::new();

        assert_eq!(oven.start(), Err(DeviceError::NotConnected));
        assert_eq!(oven.set_pulse(0.5), Err(DeviceError::NotStarted));

        oven.connect().unwrap();
        oven.start().unwrap();
        oven.set_pulse(1.7).unwrap();
        assert_eq!(oven.pulse(), 1.0);
        assert_eq!(oven.temperature(), Ok(AMBIENT_C));

        oven.stop().unwrap();
        assert!(!oven.is_started());
        assert_eq!(oven.pulse(), 0.0);

        oven.disconnect().unwrap();
        assert!(!oven.is_connected());
    }
}
