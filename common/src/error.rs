use thiserror::Error;

/// Faults raised while computing a single control cycle.
///
/// None of these stop the control loop; the controller turns them into a
/// `TickFault` event and keeps the previous output.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum EngineError {
    #[error("non-finite {what} value")]
    NonFinite { what: &'static str },

    #[error("no phase is active")]
    NoActivePhase,
}

pub type EngineResult<T> = Result<T, EngineError>;

pub(crate) fn ensure_finite(value: f32, what: &'static str) -> EngineResult<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::NonFinite { what })
    }
}
