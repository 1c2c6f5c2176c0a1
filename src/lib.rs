// Pick-and-place runtime for the six-servo xArm
//
// Calibration, kinematics and motion timing live under `motor`; the
// zenoh command loop lives under `runtime`.

pub mod config;
pub mod error;
pub mod messages;
pub mod motor;
pub mod perception;
pub mod profile;
pub mod runtime;

pub use error::{ArmError, Result};
pub use profile::ArmProfile;
