// Motion executor for the xArm
//
// Combines calibration, kinematics and the actuator port. Owns the arm
// state (last commanded raw position per joint) and is its only writer:
// move duration depends on the previous angle, so every dispatch reads
// and then updates that state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::calibration::{CalibrationModel, JointConfig};
use super::joint::Joint;
use super::kinematics::{InverseSolution, KinematicsSolver};
use super::port::ActuatorPort;
use super::sequence::PickConfig;
use crate::error::{ArmError, Result};
use crate::profile::ArmProfile;

/// Pacing limits for a single move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionLimits {
    /// Maximum angular speed, degrees per second
    pub angular_speed_dps: f64,
    pub min_duration_ms: u32,
    pub max_duration_ms: u32,
    /// Extra wait after the slowest joint before the next dependent move
    #[serde(default)]
    pub settle_margin_ms: u32,
}

impl MotionLimits {
    pub fn validate(&self) -> Result<()> {
        if !self.angular_speed_dps.is_finite() || self.angular_speed_dps <= 0.0 {
            return Err(ArmError::config(format!(
                "angular speed must be positive, got {}",
                self.angular_speed_dps
            )));
        }
        if self.min_duration_ms > self.max_duration_ms {
            return Err(ArmError::config(format!(
                "min duration {}ms exceeds max duration {}ms",
                self.min_duration_ms, self.max_duration_ms
            )));
        }
        Ok(())
    }

    /// Duration for an angular displacement, clamped to [min, max]
    ///
    /// A caller ceiling can only lower the max, never below the min.
    pub fn duration_for(&self, delta_degrees: f64, ceiling_ms: Option<u32>) -> u32 {
        let max = ceiling_ms
            .map_or(self.max_duration_ms, |c| c.min(self.max_duration_ms))
            .max(self.min_duration_ms);
        let ms = delta_degrees.abs() / self.angular_speed_dps * 1000.0;
        ms.clamp(self.min_duration_ms as f64, max as f64) as u32
    }
}

/// Gripper raw positions and timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GripperConfig {
    pub open_raw: u16,
    pub close_raw: u16,
    /// Gripper-rotate raw position for a vertical grip
    pub vertical_raw: u16,
    /// Gripper-rotate raw position for a horizontal grip
    pub horizontal_raw: u16,
    /// Fraction of the reach duration to wait before closing on a target
    pub close_lead: f64,
    /// Time the pincers need to close
    pub grip_settle_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperAction {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperOrientation {
    Vertical,
    Horizontal,
}

/// One dispatched move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub joint: Joint,
    pub target_raw: u16,
    pub duration_ms: u32,
}

/// Last commanded raw position for each joint; `None` until first commanded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArmState {
    positions: [Option<u16>; 6],
}

impl ArmState {
    pub fn get(&self, joint: Joint) -> Option<u16> {
        self.positions[joint.index()]
    }

    fn set(&mut self, joint: Joint, raw: u16) {
        self.positions[joint.index()] = Some(raw);
    }

    pub fn is_known(&self) -> bool {
        self.positions.iter().all(Option::is_some)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Joint, Option<u16>)> + '_ {
        Joint::ALL.iter().map(|&j| (j, self.get(j)))
    }
}

/// Result of a Cartesian move: the slowest joint's duration plus solver
/// diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct Reach {
    pub max_duration_ms: u32,
    /// One per chain joint, in dispatch order
    pub commands: Vec<MotionCommand>,
    pub solution: InverseSolution,
}

/// Request to abandon in-flight motion, shared with whoever may raise it
/// from another thread. Compound moves check it between steps.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the arm through an actuator port
pub struct MotionExecutor<P: ActuatorPort> {
    port: P,
    calibration: CalibrationModel,
    solver: KinematicsSolver,
    joints: Vec<JointConfig>, // indexed by Joint::index()
    limits: MotionLimits,
    gripper: GripperConfig,
    pick: PickConfig,
    state: ArmState,
    stop: StopSignal,
}

impl<P: ActuatorPort> MotionExecutor<P> {
    /// Build an executor from a profile. The arm state starts unknown.
    pub fn new(profile: &ArmProfile, port: P) -> Result<Self> {
        profile.validate()?;
        let calibration = CalibrationModel::fit(&profile.joints)?;
        let solver = KinematicsSolver::new(profile.geometry, profile.bounds, profile.solver)?;

        let joints = Joint::ALL
            .iter()
            .map(|&joint| {
                profile
                    .joint(joint)
                    .cloned()
                    .ok_or_else(|| ArmError::config(format!("{} is not configured", joint)))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Motion executor ready: {}°/s, {}-{}ms per move",
            profile.motion.angular_speed_dps,
            profile.motion.min_duration_ms,
            profile.motion.max_duration_ms
        );

        Ok(Self {
            port,
            calibration,
            solver,
            joints,
            limits: profile.motion,
            gripper: profile.gripper,
            pick: profile.pick.clone(),
            state: ArmState::default(),
            stop: StopSignal::new(),
        })
    }

    /// Share a stop signal with another thread
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Abort point for compound moves: releases every servo and fails with
    /// `Stopped` once a stop has been requested
    pub fn check_stop(&mut self) -> Result<()> {
        if !self.stop.is_raised() {
            return Ok(());
        }
        warn!("Stop requested, abandoning motion");
        self.stop_all()?;
        Err(ArmError::Stopped)
    }

    pub fn state(&self) -> &ArmState {
        &self.state
    }

    pub fn calibration(&self) -> &CalibrationModel {
        &self.calibration
    }

    pub fn solver(&self) -> &KinematicsSolver {
        &self.solver
    }

    pub fn limits(&self) -> &MotionLimits {
        &self.limits
    }

    pub fn gripper(&self) -> &GripperConfig {
        &self.gripper
    }

    pub fn pick_config(&self) -> &PickConfig {
        &self.pick
    }

    pub fn joint_config(&self, joint: Joint) -> &JointConfig {
        &self.joints[joint.index()]
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Move one joint to a raw position without waiting
    ///
    /// Returns the derived duration so callers can sequence dependent moves.
    pub fn move_joint(&mut self, joint: Joint, target_raw: u16) -> Result<u32> {
        self.move_joint_with_ceiling(joint, target_raw, None)
    }

    /// Like [`move_joint`](Self::move_joint) with an optional cap on the
    /// derived duration
    pub fn move_joint_with_ceiling(
        &mut self,
        joint: Joint,
        target_raw: u16,
        ceiling_ms: Option<u32>,
    ) -> Result<u32> {
        let config = &self.joints[joint.index()];
        if !config.contains_raw(target_raw as i32) {
            let (min, max) = config.raw_range();
            return Err(ArmError::OutOfBounds {
                joint,
                value: target_raw as f64,
                min: min as f64,
                max: max as f64,
                unit: "raw",
            });
        }

        let duration_ms = match self.current_raw(joint) {
            Some(current) => {
                let from = self.calibration.raw_to_angle(joint, current as i32);
                let to = self.calibration.raw_to_angle(joint, target_raw as i32);
                debug!(
                    "{}: {} -> {} ({:.1}° -> {:.1}°)",
                    joint, current, target_raw, from, to
                );
                self.limits.duration_for(to - from, ceiling_ms)
            }
            None => {
                warn!("{} position unknown, moving at the slowest pace", joint);
                self.limits.duration_for(f64::INFINITY, ceiling_ms)
            }
        };

        let command = MotionCommand {
            joint,
            target_raw,
            duration_ms,
        };
        self.dispatch(command)?;
        Ok(duration_ms)
    }

    fn dispatch(&mut self, command: MotionCommand) -> Result<()> {
        self.port.set_position(
            command.joint.bus_id(),
            command.target_raw,
            command.duration_ms,
            false,
        )?;
        self.state.set(command.joint, command.target_raw);
        debug!(
            "Dispatched {} -> {} over {}ms",
            command.joint, command.target_raw, command.duration_ms
        );
        Ok(())
    }

    /// Tracked position, falling back to a bus read for never-commanded joints
    fn current_raw(&mut self, joint: Joint) -> Option<u16> {
        if let Some(raw) = self.state.get(joint) {
            return Some(raw);
        }
        match self.port.get_position(joint.bus_id()) {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!("Could not read {} position: {}", joint, e);
                None
            }
        }
    }

    /// Solve for a Cartesian target and move the four chain joints
    ///
    /// Returns the slowest joint's duration; wait at least that long before
    /// assuming the arm has settled.
    pub fn move_to_cartesian(&mut self, x: f64, y: f64, z: f64) -> Result<u32> {
        self.reach(x, y, z).map(|r| r.max_duration_ms)
    }

    /// [`move_to_cartesian`](Self::move_to_cartesian) with solver diagnostics
    pub fn reach(&mut self, x: f64, y: f64, z: f64) -> Result<Reach> {
        let solution = self.solver.solve(x, y, z);
        self.solver.check_bounds(&solution.angles)?;

        let [top, middle, bottom, base] = solution.degrees();
        info!(
            "Reach ({:.2}, {:.2}, {:.2}): top={:.1}° mid={:.1}° bot={:.1}° base={:.1}°, error {:.3}",
            x, y, z, top, middle, bottom, base, solution.position_error
        );

        // Convert everything before moving anything
        let targets = solution.joint_degrees().map(|(joint, degrees)| {
            let raw = self.calibration.angle_to_raw(joint, degrees);
            let clamped = self.joints[joint.index()].clamp_raw(raw);
            if clamped as i32 != raw {
                warn!("{} raw target {} clamped to {}", joint, raw, clamped);
            }
            (joint, clamped)
        });

        let mut commands = Vec::with_capacity(targets.len());
        for (joint, raw) in targets {
            let duration_ms = self.move_joint(joint, raw)?;
            commands.push(MotionCommand {
                joint,
                target_raw: raw,
                duration_ms,
            });
        }
        let max_duration_ms = commands.iter().map(|c| c.duration_ms).max().unwrap_or(0);

        Ok(Reach {
            max_duration_ms,
            commands,
            solution,
        })
    }

    /// Send every joint to its rest position
    ///
    /// With `include_gripper == false` the pincers are left (and tracked)
    /// where they are, e.g. to carry a grasped piece. Returns the slowest
    /// joint's duration.
    pub fn move_to_default(&mut self, include_gripper: bool) -> Result<u32> {
        info!("Moving to default (gripper included: {})", include_gripper);
        let mut max_duration = 0;
        for joint in Joint::ALL {
            if joint == Joint::GripperClose && !include_gripper {
                continue;
            }
            let raw = self.joints[joint.index()].default_raw;
            max_duration = max_duration.max(self.move_joint(joint, raw)?);
        }
        Ok(max_duration)
    }

    pub fn set_gripper(&mut self, action: GripperAction) -> Result<u32> {
        let raw = match action {
            GripperAction::Open => self.gripper.open_raw,
            GripperAction::Close => self.gripper.close_raw,
        };
        info!("Gripper {:?}", action);
        self.move_joint(Joint::GripperClose, raw)
    }

    pub fn orient_gripper(&mut self, orientation: GripperOrientation) -> Result<u32> {
        let raw = match orientation {
            GripperOrientation::Vertical => self.gripper.vertical_raw,
            GripperOrientation::Horizontal => self.gripper.horizontal_raw,
        };
        self.move_joint(Joint::GripperRotate, raw)
    }

    /// Wait for in-flight motions
    pub fn settle(&mut self, duration_ms: u32) {
        self.port.pause(Duration::from_millis(duration_ms as u64));
    }

    /// Wait for the slowest joint plus the configured margin
    pub fn settle_after(&mut self, max_duration_ms: u32) {
        self.settle(max_duration_ms.saturating_add(self.limits.settle_margin_ms));
    }

    pub fn battery_voltage(&mut self) -> Result<f32> {
        Ok(self.port.get_battery_voltage()?)
    }

    /// Release every servo. Arm state is kept: the last commanded targets
    /// remain the best estimate of where the joints stopped.
    pub fn stop_all(&mut self) -> Result<()> {
        info!("Stopping all servos");
        let ids = Joint::ALL.map(Joint::bus_id);
        Ok(self.port.stop(&ids)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::sim::{PortEvent, SimulatedPort};

    fn executor() -> MotionExecutor<SimulatedPort> {
        MotionExecutor::new(&ArmProfile::default(), SimulatedPort::new()).unwrap()
    }

    #[test]
    fn test_duration_clamped_and_monotonic() {
        let limits = ArmProfile::default().motion;
        let mut previous = 0;
        let mut delta = 0.0;
        while delta <= 360.0 {
            let d = limits.duration_for(delta, None);
            assert!(d >= limits.min_duration_ms && d <= limits.max_duration_ms);
            assert!(d >= previous, "delta {} gave {} < {}", delta, d, previous);
            previous = d;
            delta += 0.5;
        }
        assert_eq!(limits.duration_for(-90.0, None), limits.duration_for(90.0, None));
    }

    #[test]
    fn test_duration_proportional_between_limits() {
        let limits = MotionLimits {
            angular_speed_dps: 30.0,
            min_duration_ms: 800,
            max_duration_ms: 5000,
            settle_margin_ms: 0,
        };
        assert_eq!(limits.duration_for(45.0, None), 1500);
        assert_eq!(limits.duration_for(1.0, None), 800);
        assert_eq!(limits.duration_for(1000.0, None), 5000);
        // Ceiling lowers the max but never below the min
        assert_eq!(limits.duration_for(1000.0, Some(2000)), 2000);
        assert_eq!(limits.duration_for(1000.0, Some(100)), 800);
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let mut limits = ArmProfile::default().motion;
        limits.min_duration_ms = limits.max_duration_ms + 1;
        assert!(limits.validate().is_err());
        limits = ArmProfile::default().motion;
        limits.angular_speed_dps = 0.0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_move_joint_updates_state_and_dispatches() {
        let mut arm = executor();
        arm.move_to_default(true).unwrap();
        arm.port_mut().clear();

        let duration = arm.move_joint(Joint::GripperRotate, 2000).unwrap();
        assert_eq!(arm.state().get(Joint::GripperRotate), Some(2000));

        let moves = arm.port().moves();
        assert_eq!(moves, vec![(2, 2000, duration)]);
        assert!(matches!(
            arm.port().events()[0],
            PortEvent::Move { wait: false, .. }
        ));
    }

    #[test]
    fn test_duration_follows_angle_delta() {
        let mut arm = executor();
        arm.move_to_default(true).unwrap();

        let limits = *arm.limits();
        let base_default = arm.joint_config(Joint::BaseRotate).default_raw;
        let near = arm.move_joint(Joint::BaseRotate, base_default + 50).unwrap();
        let far = arm.move_joint(Joint::BaseRotate, base_default - 600).unwrap();
        assert!(far >= near);

        let cal = arm.calibration().joint(Joint::BaseRotate);
        let delta = cal.raw_to_angle(base_default as i32 - 600) - cal.raw_to_angle(base_default as i32 + 50);
        assert_eq!(far, limits.duration_for(delta, None));
    }

    #[test]
    fn test_unknown_state_uses_slowest_pace() {
        let mut arm = executor();
        assert!(!arm.state().is_known());
        let duration = arm.move_joint(Joint::LinkTop, 1000).unwrap();
        assert_eq!(duration, arm.limits().max_duration_ms);
    }

    #[test]
    fn test_unknown_state_reads_back_position() {
        let port = SimulatedPort::new().with_readback(&[(Joint::LinkMiddle.bus_id(), 1500)]);
        let mut arm = MotionExecutor::new(&ArmProfile::default(), port).unwrap();
        // Same position as the readback: zero delta, minimum duration
        let duration = arm.move_joint(Joint::LinkMiddle, 1500).unwrap();
        assert_eq!(duration, arm.limits().min_duration_ms);
    }

    #[test]
    fn test_raw_outside_travel_rejected() {
        let mut arm = executor();
        let err = arm.move_joint(Joint::LinkTop, 3000).unwrap_err();
        assert!(matches!(
            err,
            ArmError::OutOfBounds {
                joint: Joint::LinkTop,
                unit: "raw",
                ..
            }
        ));
        assert!(arm.port().moves().is_empty());
        assert_eq!(arm.state().get(Joint::LinkTop), None);
    }

    #[test]
    fn test_failed_dispatch_leaves_state() {
        let mut arm = executor();
        arm.move_to_default(true).unwrap();
        arm.port_mut().fail_next("bus unplugged");

        let err = arm.move_joint(Joint::LinkMiddle, 2000).unwrap_err();
        assert!(matches!(err, ArmError::ActuatorCommand(_)));
        let default = arm.joint_config(Joint::LinkMiddle).default_raw;
        assert_eq!(arm.state().get(Joint::LinkMiddle), Some(default));
    }

    #[test]
    fn test_move_to_default_sets_every_joint() {
        let mut arm = executor();
        arm.move_to_default(true).unwrap();
        for (joint, raw) in arm.state().iter() {
            assert_eq!(raw, Some(arm.joint_config(joint).default_raw));
        }
        assert_eq!(arm.port().moves().len(), 6);
    }

    #[test]
    fn test_default_without_gripper_keeps_gripper_update() {
        let mut arm = executor();
        arm.move_to_default(true).unwrap();

        let close = arm.gripper().close_raw;
        arm.set_gripper(GripperAction::Close).unwrap();
        arm.port_mut().clear();

        arm.move_to_default(false).unwrap();
        assert!(arm
            .port()
            .moves()
            .iter()
            .all(|&(id, _, _)| id != Joint::GripperClose.bus_id()));
        assert_eq!(arm.state().get(Joint::GripperClose), Some(close));

        let open = arm.gripper().open_raw;
        arm.move_joint(Joint::GripperClose, open).unwrap();
        assert_eq!(arm.state().get(Joint::GripperClose), Some(open));
    }

    #[test]
    fn test_default_then_close_reflected_in_state() {
        let mut arm = executor();
        arm.move_to_default(false).unwrap();
        assert_eq!(arm.state().get(Joint::GripperClose), None);

        let close = arm.gripper().close_raw;
        arm.move_joint(Joint::GripperClose, close).unwrap();
        assert_eq!(arm.state().get(Joint::GripperClose), Some(close));
        assert!(arm.state().is_known());
    }

    #[test]
    fn test_move_to_cartesian_dispatches_chain() {
        let mut arm = executor();
        arm.move_to_default(true).unwrap();
        arm.port_mut().clear();

        let reach = arm.reach(20.0, 0.0, 15.0).unwrap();
        assert!(reach.solution.converged);

        let moves = arm.port().moves();
        let ids: Vec<u8> = moves.iter().map(|m| m.0).collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);

        let slowest = moves.iter().map(|m| m.2).max().unwrap();
        assert_eq!(reach.max_duration_ms, slowest);
        let joints: Vec<Joint> = reach.commands.iter().map(|c| c.joint).collect();
        assert_eq!(joints, Joint::CHAIN.to_vec());
        for command in reach.commands {
            assert_eq!(arm.state().get(command.joint), Some(command.target_raw));
            assert!(arm.joint_config(command.joint).contains_raw(command.target_raw as i32));
        }
    }

    #[test]
    fn test_move_to_cartesian_unreachable_is_not_an_error() {
        let mut arm = executor();
        arm.move_to_default(true).unwrap();
        let reach = arm.reach(100.0, 0.0, 0.0).unwrap();
        assert!(!reach.solution.converged);
        assert!(reach.solution.position_error > 50.0);
        assert!(reach.max_duration_ms <= arm.limits().max_duration_ms);
    }

    #[test]
    fn test_settle_margin_saturates() {
        let mut arm = executor();
        arm.settle_after(u32::MAX);
        assert_eq!(
            arm.port().events(),
            &[PortEvent::Pause(Duration::from_millis(u32::MAX as u64))]
        );
    }

    #[test]
    fn test_raised_stop_releases_servos() {
        let signal = StopSignal::new();
        let mut arm = executor().with_stop_signal(signal.clone());
        arm.check_stop().unwrap();
        assert!(arm.port().events().is_empty());

        signal.raise();
        let err = arm.check_stop().unwrap_err();
        assert!(matches!(err, ArmError::Stopped));
        assert_eq!(arm.port().events(), &[PortEvent::Stop(vec![1, 2, 3, 4, 5, 6])]);
        // The signal stays raised until whoever raised it clears it
        assert!(arm.stop_signal().is_raised());
    }

    #[test]
    fn test_settle_and_stop_go_through_port() {
        let mut arm = executor();
        arm.settle_after(700);
        arm.stop_all().unwrap();
        let margin = arm.limits().settle_margin_ms as u64;
        assert_eq!(
            arm.port().events(),
            &[
                PortEvent::Pause(Duration::from_millis(700 + margin)),
                PortEvent::Stop(vec![1, 2, 3, 4, 5, 6]),
            ]
        );
        assert!((arm.battery_voltage().unwrap() - 7.4).abs() < 1e-6);
    }
}
