// Camera frame -> arm plane
//
// Detections arrive as a normalized bounding-box centre (cx, cy) in [0, 1]².
// The camera's field of view and the arm base offset inside it are
// configuration; so is whether the image's vertical axis runs against the
// arm's y axis (depends on how the camera is mounted).

use serde::{Deserialize, Serialize};

use crate::error::{ArmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    /// Physical width seen by the camera, arm length units
    pub area_width: f64,
    pub area_height: f64,
    /// Arm base position inside the field of view
    pub arm_x: f64,
    pub arm_y: f64,
    /// Use (1 - cy) instead of cy
    #[serde(default)]
    pub invert_vertical: bool,
}

impl FieldOfView {
    pub fn validate(&self) -> Result<()> {
        if !(self.area_width > 0.0 && self.area_height > 0.0) {
            return Err(ArmError::config(format!(
                "field of view {}x{} must be positive",
                self.area_width, self.area_height
            )));
        }
        Ok(())
    }

    /// Map a normalized detection centre to arm-plane (x, y)
    pub fn to_arm_plane(&self, cx: f64, cy: f64) -> Result<(f64, f64)> {
        let unit = 0.0..=1.0;
        if !unit.contains(&cx) || !unit.contains(&cy) {
            return Err(ArmError::InvalidDetection { cx, cy });
        }
        let v = if self.invert_vertical { 1.0 - cy } else { cy };
        Ok((
            cx * self.area_width - self.arm_x,
            v * self.area_height - self.arm_y,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fov(invert_vertical: bool) -> FieldOfView {
        FieldOfView {
            area_width: 52.0,
            area_height: 41.0,
            arm_x: -3.0,
            arm_y: 10.0,
            invert_vertical,
        }
    }

    #[test]
    fn test_centre_maps_with_offset() {
        let (x, y) = fov(false).to_arm_plane(0.5, 0.5).unwrap();
        assert!((x - 29.0).abs() < 1e-9);
        assert!((y - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_inverted_vertical_axis() {
        let (_, top) = fov(false).to_arm_plane(0.0, 0.0).unwrap();
        let (_, flipped) = fov(true).to_arm_plane(0.0, 0.0).unwrap();
        assert!((top + 10.0).abs() < 1e-9);
        assert!((flipped - 31.0).abs() < 1e-9);
    }

    #[test]
    fn test_outside_frame_rejected() {
        let err = fov(false).to_arm_plane(1.2, 0.5).unwrap_err();
        assert!(matches!(err, ArmError::InvalidDetection { .. }));
        assert!(fov(false).to_arm_plane(0.5, f64::NAN).is_err());
    }
}
