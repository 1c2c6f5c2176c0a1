// Pick-and-place: hover, descend and grip, lift, carry to a bin, release,
// return home. Every step waits for the slowest joint of the previous
// move before issuing the next one, then checks for a stop request.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::driver::{GripperAction, MotionExecutor};
use super::port::ActuatorPort;
use crate::error::{ArmError, Result};

/// Drop-off location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinLocation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickConfig {
    /// Height above the target to approach from and retreat to
    pub lift_height: f64,
    /// Height of the work surface, used for detections
    pub surface_height: f64,
    pub bins: Vec<BinLocation>,
}

/// Summary of a completed pick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PickReport {
    /// Moves issued, gripper included
    pub moves: usize,
    /// Worst positional error across the Cartesian moves
    pub worst_position_error: f64,
    /// Total time spent waiting for motions
    pub elapsed_ms: u64,
}

impl PickReport {
    fn record_reach(&mut self, position_error: f64) {
        self.moves += 1;
        self.worst_position_error = self.worst_position_error.max(position_error);
    }
}

impl<P: ActuatorPort> MotionExecutor<P> {
    fn reach_and_settle(&mut self, x: f64, y: f64, z: f64, report: &mut PickReport) -> Result<u32> {
        let reach = self.reach(x, y, z)?;
        report.record_reach(reach.solution.position_error);
        Ok(reach.max_duration_ms)
    }

    fn wait(&mut self, duration_ms: u32, report: &mut PickReport) -> Result<()> {
        self.settle(duration_ms);
        report.elapsed_ms += duration_ms as u64;
        self.check_stop()
    }

    /// Pick the piece at (x, y, z) and drop it into bin `bin`
    pub fn pick_and_place(&mut self, x: f64, y: f64, z: f64, bin: usize) -> Result<PickReport> {
        let pick = self.pick_config().clone();
        let bin_location = *pick.bins.get(bin).ok_or_else(|| {
            ArmError::config(format!("bin {} not configured ({} bins)", bin, pick.bins.len()))
        })?;
        let gripper = *self.gripper();
        let margin = self.limits().settle_margin_ms;
        let hover = z + pick.lift_height;
        let mut report = PickReport::default();

        info!("Pick ({:.2}, {:.2}, {:.2}) -> bin {}", x, y, z, bin);
        self.check_stop()?;

        // Approach from above with the pincers open
        let d = self.set_gripper(GripperAction::Open)?;
        report.moves += 1;
        let d = d.max(self.reach_and_settle(x, y, hover, &mut report)?);
        self.wait(d.saturating_add(margin), &mut report)?;

        // Descend, closing slightly before the arm arrives
        let d = self.reach_and_settle(x, y, z, &mut report)?;
        self.wait((d as f64 * gripper.close_lead) as u32, &mut report)?;
        self.set_gripper(GripperAction::Close)?;
        report.moves += 1;
        self.wait(gripper.grip_settle_ms, &mut report)?;

        // Lift and carry home with the piece held
        let d = self.reach_and_settle(x, y, hover, &mut report)?;
        self.wait(d.saturating_add(margin), &mut report)?;
        let d = self.move_to_default(false)?;
        report.moves += 1;
        self.wait(d.saturating_add(margin), &mut report)?;

        // Release over the bin
        let d = self.reach_and_settle(bin_location.x, bin_location.y, bin_location.z, &mut report)?;
        self.wait(d.saturating_add(margin), &mut report)?;
        let d = self.set_gripper(GripperAction::Open)?;
        report.moves += 1;
        self.wait(d, &mut report)?;

        let d = self.move_to_default(true)?;
        report.moves += 1;
        self.wait(d.saturating_add(margin), &mut report)?;

        info!(
            "Pick done: {} moves, worst error {:.3}, {}ms",
            report.moves, report.worst_position_error, report.elapsed_ms
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::driver::StopSignal;
    use crate::motor::joint::Joint;
    use crate::motor::sim::{PortEvent, SimulatedPort};
    use crate::profile::ArmProfile;

    fn executor() -> MotionExecutor<SimulatedPort> {
        let mut arm = MotionExecutor::new(&ArmProfile::default(), SimulatedPort::new()).unwrap();
        arm.move_to_default(true).unwrap();
        arm.port_mut().clear();
        arm
    }

    #[test]
    fn test_pick_sequence_order() {
        let mut arm = executor();
        let report = arm.pick_and_place(20.0, 0.0, 5.0, 0).unwrap();

        assert_eq!(report.moves, 9);
        assert!(report.worst_position_error < 0.5, "error {}", report.worst_position_error);

        let gripper = *arm.gripper();
        let grip_id = Joint::GripperClose.bus_id();
        let gripper_moves: Vec<u16> = arm
            .port()
            .moves()
            .iter()
            .filter(|m| m.0 == grip_id)
            .map(|m| m.1)
            .collect();
        // open, close, open on release, open again at home
        assert_eq!(
            gripper_moves,
            vec![gripper.open_raw, gripper.close_raw, gripper.open_raw, gripper.open_raw]
        );

        // Close is only issued after a pause
        let events = arm.port().events();
        let close_at = events
            .iter()
            .position(|e| {
                matches!(e, PortEvent::Move { joint_id, raw, .. }
                    if *joint_id == grip_id && *raw == gripper.close_raw)
            })
            .unwrap();
        assert!(matches!(events[close_at - 1], PortEvent::Pause(_)));

        // Ends at rest
        for (joint, raw) in arm.state().iter() {
            assert_eq!(raw, Some(arm.joint_config(joint).default_raw));
        }
    }

    #[test]
    fn test_pick_keeps_gripper_closed_while_carrying() {
        let mut arm = executor();
        arm.pick_and_place(20.0, 0.0, 5.0, 1).unwrap();

        let grip_id = Joint::GripperClose.bus_id();
        let close_raw = arm.gripper().close_raw;
        let moves = arm.port().moves();
        let close_idx = moves
            .iter()
            .position(|m| m.0 == grip_id && m.1 == close_raw)
            .unwrap();
        let next_gripper = moves[close_idx + 1..]
            .iter()
            .position(|m| m.0 == grip_id)
            .unwrap()
            + close_idx
            + 1;
        // Lift (4 joints) + default without gripper (5 joints) + bin (4 joints)
        assert_eq!(next_gripper - close_idx - 1, 13);
    }

    #[test]
    fn test_pending_stop_abandons_pick_before_moving() {
        let signal = StopSignal::new();
        let mut arm = executor().with_stop_signal(signal.clone());

        let grip_id = Joint::GripperClose.bus_id();
        signal.raise();
        let err = arm.pick_and_place(20.0, 0.0, 5.0, 0).unwrap_err();
        assert!(matches!(err, ArmError::Stopped));
        assert_eq!(arm.port().events(), &[PortEvent::Stop(vec![1, 2, 3, 4, 5, 6])]);
        assert!(arm.port().moves().iter().all(|m| m.0 != grip_id));
    }

    #[test]
    fn test_unknown_bin_rejected_before_moving() {
        let mut arm = executor();
        let err = arm.pick_and_place(20.0, 0.0, 5.0, 99).unwrap_err();
        assert!(matches!(err, ArmError::Configuration(_)));
        assert!(arm.port().events().is_empty());
    }
}
