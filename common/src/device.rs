use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("device is not connected")]
    NotConnected,

    #[error("device is not started")]
    NotStarted,

    #[error("temperature read failed: {0}")]
    ReadFailed(String),
}

pub type TemperatureListener = Box<dyn Fn(f32) + Send + Sync>;

/// Oven hardware as seen by the controller. Transport details (serial
/// framing, checksums) stay behind this trait.
pub trait Device: Send {
    fn connect(&mut self) -> Result<(), DeviceError>;

    fn disconnect(&mut self) -> Result<(), DeviceError>;

    fn is_connected(&self) -> bool;

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    fn is_started(&self) -> bool;

    fn temperature(&self) -> Result<f32, DeviceError>;

    /// Duty cycle in 0..=1.
    fn set_pulse(&mut self, duty: f32) -> Result<(), DeviceError>;

    fn pulse(&self) -> f32;

    /// Registers a callback invoked from the device I/O thread on every new
    /// reading.
    fn on_temperature_changed(&mut self, listener: TemperatureListener);
}
