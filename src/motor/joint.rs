// Joint identities for the six servos on the xArm bus

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six arm servos, in bus order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    GripperClose,
    GripperRotate,
    LinkTop,
    LinkMiddle,
    LinkBottom,
    BaseRotate,
}

impl Joint {
    /// All joints, ordered by bus id
    pub const ALL: [Joint; 6] = [
        Joint::GripperClose,
        Joint::GripperRotate,
        Joint::LinkTop,
        Joint::LinkMiddle,
        Joint::LinkBottom,
        Joint::BaseRotate,
    ];

    /// The kinematic chain, in solver order (top, middle, bottom, base)
    pub const CHAIN: [Joint; 4] = [
        Joint::LinkTop,
        Joint::LinkMiddle,
        Joint::LinkBottom,
        Joint::BaseRotate,
    ];

    /// Servo id on the controller bus (1..=6)
    pub fn bus_id(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn from_bus_id(id: u8) -> Option<Joint> {
        match id {
            1..=6 => Some(Self::ALL[id as usize - 1]),
            _ => None,
        }
    }

    /// Zero-based position in [`Joint::ALL`]
    pub fn index(self) -> usize {
        match self {
            Joint::GripperClose => 0,
            Joint::GripperRotate => 1,
            Joint::LinkTop => 2,
            Joint::LinkMiddle => 3,
            Joint::LinkBottom => 4,
            Joint::BaseRotate => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Joint::GripperClose => "gripper_close",
            Joint::GripperRotate => "gripper_rotate",
            Joint::LinkTop => "link_top",
            Joint::LinkMiddle => "link_middle",
            Joint::LinkBottom => "link_bottom",
            Joint::BaseRotate => "base_rotate",
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
