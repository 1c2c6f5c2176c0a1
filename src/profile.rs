// Arm profile: every geometric, calibration and timing constant
//
// Loaded from JSON at startup. `ArmProfile::default()` is the canonical
// profile for the stock xArm with the overhead camera mount.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;
use tracing::info;

use crate::error::{ArmError, Result};
use crate::motor::{
    ArmGeometry, BinLocation, CalibrationSample, ChainBounds, GripperConfig, Joint, JointBounds,
    JointConfig, MotionLimits, PickConfig, SolverConfig,
};
use crate::perception::FieldOfView;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmProfile {
    pub geometry: ArmGeometry,
    /// Chain joint travel, radians
    pub bounds: ChainBounds,
    pub joints: Vec<JointConfig>,
    pub motion: MotionLimits,
    #[serde(default)]
    pub solver: SolverConfig,
    pub gripper: GripperConfig,
    pub field_of_view: FieldOfView,
    pub pick: PickConfig,
}

impl ArmProfile {
    pub fn from_json(json: &str) -> Result<Self> {
        let profile: ArmProfile = serde_json::from_str(json)
            .map_err(|e| ArmError::config(format!("bad profile JSON: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ArmError::config(format!("cannot read {}: {e}", path.display())))?;
        let profile = Self::from_json(&contents)?;
        info!("Loaded arm profile from {}", path.display());
        Ok(profile)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ArmError::config(format!("cannot encode profile: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| ArmError::config(format!("cannot write {}: {e}", path.display())))
    }

    pub fn joint(&self, joint: Joint) -> Option<&JointConfig> {
        self.joints.iter().find(|c| c.joint == joint)
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.bounds.validate()?;
        self.motion.validate()?;
        self.field_of_view.validate()?;

        for joint in Joint::ALL {
            let config = self
                .joint(joint)
                .ok_or_else(|| ArmError::config(format!("{} is not configured", joint)))?;
            if config.samples.len() < 2 {
                return Err(ArmError::config(format!(
                    "{} needs at least 2 calibration samples",
                    joint
                )));
            }
            if let (Some(min), Some(max)) = (config.raw_min, config.raw_max) {
                if min > max {
                    return Err(ArmError::config(format!(
                        "{} raw range {}..{} is empty",
                        joint, min, max
                    )));
                }
            }
            if !config.contains_raw(config.default_raw as i32) {
                return Err(ArmError::config(format!(
                    "{} default {} is outside its raw range",
                    joint, config.default_raw
                )));
            }
        }

        self.validate_gripper()
    }

    /// Gripper positions must be inside their servo's travel, or a pick
    /// would fail with the arm already lowered onto the piece
    fn validate_gripper(&self) -> Result<()> {
        let g = &self.gripper;
        let positions = [
            (Joint::GripperClose, "open_raw", g.open_raw),
            (Joint::GripperClose, "close_raw", g.close_raw),
            (Joint::GripperRotate, "vertical_raw", g.vertical_raw),
            (Joint::GripperRotate, "horizontal_raw", g.horizontal_raw),
        ];
        for (joint, name, raw) in positions {
            let in_range = self
                .joint(joint)
                .is_some_and(|config| config.contains_raw(raw as i32));
            if !in_range {
                return Err(ArmError::config(format!(
                    "gripper {} {} is outside the {} raw range",
                    name, raw, joint
                )));
            }
        }
        if !(0.0..=1.0).contains(&g.close_lead) {
            return Err(ArmError::config(format!(
                "gripper close_lead {} must be within [0, 1]",
                g.close_lead
            )));
        }
        Ok(())
    }
}

fn joint(
    joint: Joint,
    samples: &[(i32, f64)],
    default_raw: u16,
    raw_range: (u16, u16),
) -> JointConfig {
    JointConfig {
        joint,
        samples: samples
            .iter()
            .map(|&(raw, degrees)| CalibrationSample::new(raw, degrees))
            .collect(),
        default_raw,
        raw_min: Some(raw_range.0),
        raw_max: Some(raw_range.1),
    }
}

impl Default for ArmProfile {
    fn default() -> Self {
        Self {
            geometry: ArmGeometry {
                base_height: 14.5,
                shoulder_to_elbow: 10.5,
                elbow_to_wrist: 9.0,
                wrist_to_gripper: 17.0,
                wrist_offset: 1.7,
            },
            bounds: ChainBounds {
                top: JointBounds::new(0.0, 3.0 / 4.0 * PI),
                middle: JointBounds::new(0.0, 7.0 / 12.0 * PI),
                bottom: JointBounds::new(-PI / 2.0, PI / 2.0),
                base: JointBounds::new(-5.0 / 9.0 * PI, 2.0 / 3.0 * PI),
            },
            joints: vec![
                joint(Joint::GripperClose, &[(1150, 90.0), (2300, 180.0)], 1150, (1150, 2300)),
                joint(Joint::GripperRotate, &[(400, -180.0), (2600, 200.0)], 1500, (400, 2600)),
                joint(
                    Joint::LinkTop,
                    &[(1275, 90.0), (750, 45.0), (1750, 135.0)],
                    410,
                    (410, 1900),
                ),
                joint(
                    Joint::LinkMiddle,
                    &[(1500, 0.0), (1975, 45.0), (2475, 90.0)],
                    1500,
                    (400, 2600),
                ),
                joint(
                    Joint::LinkBottom,
                    &[(2325, 0.0), (1850, 45.0), (1325, 90.0)],
                    2300,
                    (1200, 2600),
                ),
                joint(Joint::BaseRotate, &[(1900, 0.0), (875, 90.0)], 1900, (400, 2600)),
            ],
            motion: MotionLimits {
                angular_speed_dps: 60.0,
                min_duration_ms: 500,
                max_duration_ms: 1000,
                settle_margin_ms: 100,
            },
            solver: SolverConfig::default(),
            gripper: GripperConfig {
                open_raw: 1150,
                close_raw: 2200,
                vertical_raw: 1500,
                horizontal_raw: 500,
                close_lead: 0.95,
                grip_settle_ms: 1000,
            },
            field_of_view: FieldOfView {
                area_width: 52.0,
                area_height: 41.0,
                arm_x: -3.0,
                arm_y: 10.0,
                invert_vertical: false,
            },
            pick: PickConfig {
                lift_height: 10.0,
                surface_height: 0.0,
                bins: vec![
                    BinLocation { x: 0.0, y: 20.0, z: 10.0 },
                    BinLocation { x: -5.0, y: 20.0, z: 15.0 },
                    BinLocation { x: 5.0, y: -20.0, z: 15.0 },
                ],
            },
        }
    }
}
