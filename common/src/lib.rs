pub mod cell;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod executor;
pub mod planner;
pub mod profile;
pub mod regulator;
pub mod slope;
pub mod topics;
pub mod types;

pub use cell::TemperatureCell;
pub use config::{ControllerConfig, ManualSetpoint, NetworkConfig, RegulatorConfig, RuntimeConfig};
pub use controller::{EngineAction, EngineEvent, ReflowController, RunState, TickOutput};
pub use device::{Device, DeviceError, TemperatureListener};
pub use error::{EngineError, EngineResult};
pub use profile::{Phase, PhaseType, Profile, ProfileContext, SafetyConfig};
pub use topics::*;
pub use types::{ControllerMode, ControllerStatus, StateSample};
