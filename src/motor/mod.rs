// Motor control module for the xArm
//
// Provides:
// - Per-joint calibration (raw servo units <-> degrees)
// - Forward and bounded inverse kinematics for the 4-link chain
// - Motion executor with duration pacing and arm state tracking
// - Actuator port contract, Hiwonder serial bus and a simulated bus

pub mod calibration;
mod driver;
pub mod hiwonder;
pub mod joint;
pub mod kinematics;
pub mod port;
mod sequence;
pub mod sim;

pub use calibration::{CalibrationModel, CalibrationSample, JointCalibration, JointConfig};
pub use driver::{
    ArmState, GripperAction, GripperConfig, GripperOrientation, MotionCommand, MotionExecutor,
    MotionLimits, Reach, StopSignal,
};
pub use hiwonder::HiwonderBus;
pub use joint::Joint;
pub use kinematics::{
    ArmGeometry, ChainAngles, ChainBounds, InverseSolution, JointBounds, KinematicsSolver, Pose,
    SolverConfig,
};
pub use port::{ActuatorPort, BusError};
pub use sequence::{BinLocation, PickConfig, PickReport};
pub use sim::{PortEvent, SimulatedPort};
