// Error types for the arm core

use crate::motor::{BusError, Joint};

/// Errors raised by calibration, solving and motion dispatch
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{joint} target {value:.2} {unit} outside bounds [{min:.2}, {max:.2}]")]
    OutOfBounds {
        joint: Joint,
        value: f64,
        min: f64,
        max: f64,
        unit: &'static str,
    },

    #[error("Actuator command failed: {0}")]
    ActuatorCommand(#[from] BusError),

    #[error("Motion stopped on request")]
    Stopped,

    #[error("Detection centre ({cx:.3}, {cy:.3}) is outside the normalized frame")]
    InvalidDetection { cx: f64, cy: f64 },
}

pub type Result<T> = std::result::Result<T, ArmError>;

impl ArmError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        ArmError::Configuration(reason.into())
    }
}
