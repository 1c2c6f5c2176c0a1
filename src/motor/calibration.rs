// Per-joint calibration: raw servo units <-> physical angle
//
// Each joint is calibrated from two or more observed (raw, degrees) samples.
// Two least-squares lines are fit independently, one per direction, so a
// handful of noisy samples does not need to be perfectly linear both ways.

use serde::{Deserialize, Serialize};

use super::joint::Joint;
use crate::error::{ArmError, Result};

/// One observed (raw unit, angle) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub raw: i32,
    pub degrees: f64,
}

impl CalibrationSample {
    pub const fn new(raw: i32, degrees: f64) -> Self {
        Self { raw, degrees }
    }
}

/// Static configuration of one servo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    pub joint: Joint,
    pub samples: Vec<CalibrationSample>,
    /// Rest position used by move-to-default
    pub default_raw: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_max: Option<u16>,
}

impl JointConfig {
    /// Raw travel limits, defaulting to the full u16 range
    pub fn raw_range(&self) -> (u16, u16) {
        (self.raw_min.unwrap_or(0), self.raw_max.unwrap_or(u16::MAX))
    }

    pub fn contains_raw(&self, raw: i32) -> bool {
        let (min, max) = self.raw_range();
        raw >= min as i32 && raw <= max as i32
    }

    /// Clamp a computed raw target into the joint's travel limits
    pub fn clamp_raw(&self, raw: i32) -> u16 {
        let (min, max) = self.raw_range();
        raw.clamp(min as i32, max as i32) as u16
    }
}

/// y = intercept + slope * x
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub slope: f64,
    /// Root-mean-square residual of the fit in y units
    pub rms_residual: f64,
}

impl LinearFit {
    /// Ordinary least-squares fit. Returns `None` with fewer than two points
    /// or when every x is identical.
    pub fn fit(points: &[(f64, f64)]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

        let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
        let sxy: f64 = points
            .iter()
            .map(|p| (p.0 - mean_x) * (p.1 - mean_y))
            .sum();
        if sxx <= f64::EPSILON {
            return None;
        }

        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let sq_err: f64 = points
            .iter()
            .map(|p| (intercept + slope * p.0 - p.1).powi(2))
            .sum();

        Some(Self {
            intercept,
            slope,
            rms_residual: (sq_err / n).sqrt(),
        })
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Fitted mapping for a single joint
#[derive(Debug, Clone, PartialEq)]
pub struct JointCalibration {
    joint: Joint,
    raw_to_angle: LinearFit,
    angle_to_raw: LinearFit,
}

impl JointCalibration {
    pub fn fit(joint: Joint, samples: &[CalibrationSample]) -> Result<Self> {
        if samples.len() < 2 {
            return Err(ArmError::config(format!(
                "{} has {} calibration sample(s), at least 2 are required",
                joint,
                samples.len()
            )));
        }

        let forward: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| (s.raw as f64, s.degrees))
            .collect();
        let backward: Vec<(f64, f64)> = forward.iter().map(|&(r, d)| (d, r)).collect();

        let raw_to_angle = LinearFit::fit(&forward).ok_or_else(|| {
            ArmError::config(format!("{} calibration samples share a single raw value", joint))
        })?;
        let angle_to_raw = LinearFit::fit(&backward).ok_or_else(|| {
            ArmError::config(format!("{} calibration samples share a single angle", joint))
        })?;

        Ok(Self {
            joint,
            raw_to_angle,
            angle_to_raw,
        })
    }

    pub fn joint(&self) -> Joint {
        self.joint
    }

    /// Nearest raw unit for an angle. Not clamped to the joint's travel.
    pub fn angle_to_raw(&self, degrees: f64) -> i32 {
        self.angle_to_raw.eval(degrees).round() as i32
    }

    pub fn raw_to_angle(&self, raw: i32) -> f64 {
        self.raw_to_angle.eval(raw as f64)
    }

    pub fn raw_to_angle_fit(&self) -> &LinearFit {
        &self.raw_to_angle
    }

    pub fn angle_to_raw_fit(&self) -> &LinearFit {
        &self.angle_to_raw
    }
}

/// Calibration for every joint on the arm
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationModel {
    joints: Vec<JointCalibration>, // indexed by Joint::index()
}

impl CalibrationModel {
    /// Fit every joint. Each of the six joints must appear exactly once.
    pub fn fit(configs: &[JointConfig]) -> Result<Self> {
        let mut joints = Vec::with_capacity(Joint::ALL.len());
        for joint in Joint::ALL {
            let mut matching = configs.iter().filter(|c| c.joint == joint);
            let config = matching
                .next()
                .ok_or_else(|| ArmError::config(format!("{} has no calibration entry", joint)))?;
            if matching.next().is_some() {
                return Err(ArmError::config(format!(
                    "{} has more than one calibration entry",
                    joint
                )));
            }
            joints.push(JointCalibration::fit(joint, &config.samples)?);
        }
        Ok(Self { joints })
    }

    pub fn joint(&self, joint: Joint) -> &JointCalibration {
        &self.joints[joint.index()]
    }

    pub fn angle_to_raw(&self, joint: Joint, degrees: f64) -> i32 {
        self.joint(joint).angle_to_raw(degrees)
    }

    pub fn raw_to_angle(&self, joint: Joint, raw: i32) -> f64 {
        self.joint(joint).raw_to_angle(raw)
    }
}
