// Message types for the runtime

use serde::{Deserialize, Serialize};

use crate::motor::{GripperAction, GripperOrientation, Joint};

// Command from operator/scripts -> runtime
// Tagged by "type", e.g. {"type": "move_to", "x": 20.0, "y": 0.0, "z": 5.0}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArmCommand {
    MoveTo {
        x: f64,
        y: f64,
        z: f64,
    },
    MoveJoint {
        joint: Joint,
        raw: u16,
    },
    Pick {
        x: f64,
        y: f64,
        z: f64,
        bin: usize,
    },
    /// Pick from a normalized detection centre on the work surface
    PickDetection {
        cx: f64,
        cy: f64,
        bin: usize,
    },
    Gripper {
        action: GripperAction,
    },
    Orient {
        orientation: GripperOrientation,
    },
    Default {
        #[serde(default = "include_gripper_default")]
        include_gripper: bool,
    },
    Stop,
    Battery,
}

fn include_gripper_default() -> bool {
    true
}

impl ArmCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ArmCommand::MoveTo { .. } => "move_to",
            ArmCommand::MoveJoint { .. } => "move_joint",
            ArmCommand::Pick { .. } => "pick",
            ArmCommand::PickDetection { .. } => "pick_detection",
            ArmCommand::Gripper { .. } => "gripper",
            ArmCommand::Orient { .. } => "orient",
            ArmCommand::Default { .. } => "default",
            ArmCommand::Stop => "stop",
            ArmCommand::Battery => "battery",
        }
    }
}

// Outcome of one command, runtime -> operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStatus {
    pub command: String,
    pub ok: bool,
    /// Slowest joint of the last move
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u32>,
    /// Distance between target and reached position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_volts: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArmStatus {
    pub fn done(command: &ArmCommand) -> Self {
        Self {
            command: command.kind().to_string(),
            ok: true,
            max_duration_ms: None,
            position_error: None,
            battery_volts: None,
            error: None,
        }
    }

    pub fn failed(command: &ArmCommand, error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Self::done(command)
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Idle,
    Busy,
    Fault,
}
