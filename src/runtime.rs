// Command loop for the arm
//
// The async side drains JSON commands from zenoh and publishes status and
// health. The arm itself is owned by one worker thread: motions block on
// settle waits, and ArmState must only ever have one writer.
//
// A stop is the exception to arrival order: the loop raises the shared stop
// signal as soon as it parses one, the running compound move bails out at
// its next step, and commands queued ahead of the stop are skipped.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{LOOP_HZ, TOPIC_CMD_ARM, TOPIC_HEALTH, TOPIC_STATE_ARM};
use crate::messages::{ArmCommand, ArmStatus, RuntimeHealth};
use crate::error::ArmError;
use crate::motor::{ActuatorPort, MotionExecutor, StopSignal};
use crate::perception::FieldOfView;
use crate::profile::ArmProfile;

/// Tracks queued commands and the last outcome
pub struct Runtime {
    pending: usize,
    last_fault: Option<String>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            pending: 0,
            last_fault: None,
        }
    }

    /// Command handed to the worker
    fn on_command(&mut self, cmd: &ArmCommand) {
        info!("Received command: {:?}", cmd);
        self.pending += 1;
    }

    /// Worker finished a command
    fn on_status(&mut self, status: &ArmStatus) {
        self.pending = self.pending.saturating_sub(1);
        if status.ok {
            self.last_fault = None;
        } else {
            warn!(
                "{} failed: {}",
                status.command,
                status.error.as_deref().unwrap_or("unknown error")
            );
            self.last_fault = status.error.clone();
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        if self.pending > 0 {
            RuntimeHealth::Busy
        } else if self.last_fault.is_some() {
            RuntimeHealth::Fault
        } else {
            RuntimeHealth::Idle
        }
    }
}

/// Run one command to completion
///
/// Motions wait for the slowest joint before returning so the next command
/// starts from a settled arm. While a stop is pending every other command is
/// skipped; the stop itself releases the servos and clears it.
pub fn execute<P: ActuatorPort>(
    arm: &mut MotionExecutor<P>,
    cmd: &ArmCommand,
    fov: &FieldOfView,
) -> ArmStatus {
    if arm.stop_signal().is_raised() && *cmd != ArmCommand::Stop {
        info!("Skipping {} behind a pending stop", cmd.kind());
        return ArmStatus::failed(cmd, ArmError::Stopped);
    }

    let mut status = ArmStatus::done(cmd);
    let outcome = match *cmd {
        ArmCommand::MoveTo { x, y, z } => arm.reach(x, y, z).map(|reach| {
            arm.settle_after(reach.max_duration_ms);
            status.max_duration_ms = Some(reach.max_duration_ms);
            status.position_error = Some(reach.solution.position_error);
        }),
        ArmCommand::MoveJoint { joint, raw } => arm.move_joint(joint, raw).map(|d| {
            arm.settle_after(d);
            status.max_duration_ms = Some(d);
        }),
        ArmCommand::Pick { x, y, z, bin } => arm.pick_and_place(x, y, z, bin).map(|report| {
            status.position_error = Some(report.worst_position_error);
        }),
        ArmCommand::PickDetection { cx, cy, bin } => fov.to_arm_plane(cx, cy).and_then(|(x, y)| {
            let z = arm.pick_config().surface_height;
            info!("Detection ({:.3}, {:.3}) -> ({:.2}, {:.2})", cx, cy, x, y);
            arm.pick_and_place(x, y, z, bin).map(|report| {
                status.position_error = Some(report.worst_position_error);
            })
        }),
        ArmCommand::Gripper { action } => arm.set_gripper(action).map(|d| {
            arm.settle_after(d);
            status.max_duration_ms = Some(d);
        }),
        ArmCommand::Orient { orientation } => arm.orient_gripper(orientation).map(|d| {
            arm.settle_after(d);
            status.max_duration_ms = Some(d);
        }),
        ArmCommand::Default { include_gripper } => arm.move_to_default(include_gripper).map(|d| {
            arm.settle_after(d);
            status.max_duration_ms = Some(d);
        }),
        ArmCommand::Stop => {
            let released = arm.stop_all();
            arm.stop_signal().clear();
            released
        }
        ArmCommand::Battery => arm.battery_voltage().map(|volts| {
            status.battery_volts = Some(volts);
        }),
    };

    match outcome {
        Ok(()) => status,
        Err(e) => ArmStatus::failed(cmd, e),
    }
}

/// Worker loop: owns the arm until the command channel closes, then
/// releases the servos and hands the arm back
fn serve<P: ActuatorPort>(
    mut arm: MotionExecutor<P>,
    fov: FieldOfView,
    commands: mpsc::Receiver<ArmCommand>,
    statuses: UnboundedSender<ArmStatus>,
) -> MotionExecutor<P> {
    for cmd in commands {
        let status = execute(&mut arm, &cmd, &fov);
        if statuses.send(status).is_err() {
            break;
        }
    }
    if let Err(e) = arm.stop_all() {
        warn!("Failed to release servos on shutdown: {}", e);
    }
    info!("Arm worker stopped");
    arm
}

pub async fn run(
    profile: ArmProfile,
    port: Box<dyn ActuatorPort + Send>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fov = profile.field_of_view;
    let stop = StopSignal::new();
    let arm = MotionExecutor::new(&profile, port)?.with_stop_signal(stop.clone());

    let (cmd_tx, cmd_rx) = mpsc::channel::<ArmCommand>();
    let (status_tx, mut status_rx) = unbounded_channel::<ArmStatus>();
    let worker = thread::Builder::new()
        .name("arm-worker".into())
        .spawn(move || serve(arm, fov, cmd_rx, status_tx))?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_ARM).await?;
    let pub_status = session.declare_publisher(TOPIC_STATE_ARM).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Runtime started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD_ARM);
    info!("Publishing to: {}, {}", TOPIC_STATE_ARM, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Forward pending commands to the worker, in arrival order
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ArmCommand>(&payload) {
                Ok(cmd) => {
                    runtime.on_command(&cmd);
                    if cmd == ArmCommand::Stop {
                        stop.raise();
                    }
                    if cmd_tx.send(cmd).is_err() {
                        error!("Arm worker is gone");
                        return Err("arm worker exited".into());
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Publish finished commands
        while let Ok(status) = status_rx.try_recv() {
            runtime.on_status(&status);
            let status_json = serde_json::to_string(&status)?;
            pub_status.put(status_json).await?;
        }

        if worker.is_finished() {
            error!("Arm worker exited unexpectedly");
            return Err("arm worker exited".into());
        }

        // 3. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{BusError, GripperAction, Joint, PortEvent, SimulatedPort};

    /// Simulated bus that raises a stop during its n-th pause, the way the
    /// command loop does while the worker is mid-motion
    struct StopDuringPause {
        inner: SimulatedPort,
        stop: StopSignal,
        pauses_left: usize,
    }

    impl ActuatorPort for StopDuringPause {
        fn set_position(
            &mut self,
            joint_id: u8,
            raw: u16,
            duration_ms: u32,
            wait: bool,
        ) -> Result<(), BusError> {
            self.inner.set_position(joint_id, raw, duration_ms, wait)
        }

        fn get_battery_voltage(&mut self) -> Result<f32, BusError> {
            self.inner.get_battery_voltage()
        }

        fn stop(&mut self, joint_ids: &[u8]) -> Result<(), BusError> {
            self.inner.stop(joint_ids)
        }

        fn pause(&mut self, duration: Duration) {
            self.inner.pause(duration);
            if self.pauses_left == 1 {
                self.stop.raise();
            }
            self.pauses_left = self.pauses_left.saturating_sub(1);
        }
    }

    fn arm() -> (MotionExecutor<SimulatedPort>, FieldOfView) {
        let profile = ArmProfile::default();
        let arm = MotionExecutor::new(&profile, SimulatedPort::new()).unwrap();
        (arm, profile.field_of_view)
    }

    #[test]
    fn test_health_follows_queue() {
        let mut runtime = Runtime::new();
        assert_eq!(runtime.health(), RuntimeHealth::Idle);

        let cmd = ArmCommand::Stop;
        runtime.on_command(&cmd);
        runtime.on_command(&cmd);
        assert_eq!(runtime.health(), RuntimeHealth::Busy);

        runtime.on_status(&ArmStatus::failed(&cmd, "bus unplugged"));
        assert_eq!(runtime.health(), RuntimeHealth::Busy);
        runtime.on_status(&ArmStatus::failed(&cmd, "bus unplugged"));
        assert_eq!(runtime.health(), RuntimeHealth::Fault);

        runtime.on_command(&cmd);
        runtime.on_status(&ArmStatus::done(&cmd));
        assert_eq!(runtime.health(), RuntimeHealth::Idle);
    }

    #[test]
    fn test_move_to_waits_for_slowest_joint() {
        let (mut arm, fov) = arm();
        let status = execute(&mut arm, &ArmCommand::MoveTo { x: 20.0, y: 0.0, z: 15.0 }, &fov);
        assert!(status.ok, "{:?}", status);

        let max = status.max_duration_ms.unwrap();
        let margin = arm.limits().settle_margin_ms;
        let events = arm.port().events();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[4],
            PortEvent::Pause(Duration::from_millis((max + margin) as u64))
        );
        assert!(status.position_error.unwrap() < 0.5);
    }

    #[test]
    fn test_bad_detection_reports_failure_without_moving() {
        let (mut arm, fov) = arm();
        let cmd = ArmCommand::PickDetection { cx: 1.5, cy: 0.2, bin: 0 };
        let status = execute(&mut arm, &cmd, &fov);
        assert!(!status.ok);
        assert_eq!(status.command, "pick_detection");
        assert!(status.error.unwrap().contains("outside"));
        assert!(arm.port().events().is_empty());
    }

    #[test]
    fn test_rejected_dispatch_surfaces_error() {
        let (mut arm, fov) = arm();
        arm.port_mut().fail_next("servo overheated");
        let status = execute(
            &mut arm,
            &ArmCommand::Gripper { action: GripperAction::Open },
            &fov,
        );
        assert!(!status.ok);
        assert!(status.error.unwrap().contains("servo overheated"));
        assert_eq!(arm.state().get(Joint::GripperClose), None);
    }

    #[test]
    fn test_battery_reading() {
        let profile = ArmProfile::default();
        let mut arm =
            MotionExecutor::new(&profile, SimulatedPort::new().with_battery(7.9)).unwrap();
        let status = execute(&mut arm, &ArmCommand::Battery, &profile.field_of_view);
        assert_eq!(status.battery_volts, Some(7.9));
    }

    #[test]
    fn test_worker_drains_commands_in_order() {
        let (arm, fov) = arm();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (status_tx, mut status_rx) = unbounded_channel();

        cmd_tx.send(ArmCommand::Default { include_gripper: true }).unwrap();
        cmd_tx.send(ArmCommand::MoveJoint { joint: Joint::BaseRotate, raw: 9000 }).unwrap();
        cmd_tx.send(ArmCommand::Battery).unwrap();
        drop(cmd_tx);

        serve(arm, fov, cmd_rx, status_tx);

        let statuses: Vec<ArmStatus> = std::iter::from_fn(|| status_rx.try_recv().ok()).collect();
        let kinds: Vec<&str> = statuses.iter().map(|s| s.command.as_str()).collect();
        assert_eq!(kinds, vec!["default", "move_joint", "battery"]);
        assert!(statuses[0].ok);
        assert!(!statuses[1].ok, "raw 9000 is outside base travel");
        assert!(statuses[2].ok);
    }

    #[test]
    fn test_stop_interrupts_running_pick() {
        let profile = ArmProfile::default();
        let stop = StopSignal::new();
        let port = StopDuringPause {
            inner: SimulatedPort::new(),
            stop: stop.clone(),
            pauses_left: 2,
        };
        let arm = MotionExecutor::new(&profile, port)
            .unwrap()
            .with_stop_signal(stop.clone());

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (status_tx, mut status_rx) = unbounded_channel();
        cmd_tx.send(ArmCommand::Pick { x: 20.0, y: 0.0, z: 5.0, bin: 0 }).unwrap();
        cmd_tx.send(ArmCommand::MoveTo { x: 20.0, y: 0.0, z: 15.0 }).unwrap();
        cmd_tx.send(ArmCommand::Stop).unwrap();
        cmd_tx.send(ArmCommand::Battery).unwrap();
        drop(cmd_tx);

        let arm = serve(arm, profile.field_of_view, cmd_rx, status_tx);

        let statuses: Vec<ArmStatus> = std::iter::from_fn(|| status_rx.try_recv().ok()).collect();
        let outcome: Vec<(&str, bool)> =
            statuses.iter().map(|s| (s.command.as_str(), s.ok)).collect();
        assert_eq!(
            outcome,
            vec![("pick", false), ("move_to", false), ("stop", true), ("battery", true)]
        );
        assert!(statuses[0].error.as_deref().unwrap().contains("stopped"));
        assert!(!stop.is_raised());

        let events = arm.port().inner.events();
        let first_stop = events
            .iter()
            .position(|e| matches!(e, PortEvent::Stop(_)))
            .unwrap();
        // Open + hover (5) and descend (4) went out, the grip never did
        assert_eq!(
            events[..first_stop]
                .iter()
                .filter(|e| matches!(e, PortEvent::Move { .. }))
                .count(),
            9
        );
        assert!(
            events[first_stop..]
                .iter()
                .all(|e| !matches!(e, PortEvent::Move { .. })),
            "moves after the stop: {:?}",
            &events[first_stop..]
        );
    }

    #[test]
    fn test_pending_stop_skips_queued_motion() {
        let (mut arm, fov) = arm();
        arm.stop_signal().raise();

        let status = execute(&mut arm, &ArmCommand::Default { include_gripper: true }, &fov);
        assert!(!status.ok);
        assert!(arm.port().events().is_empty());

        let status = execute(&mut arm, &ArmCommand::Stop, &fov);
        assert!(status.ok);
        assert!(!arm.stop_signal().is_raised());
        assert_eq!(arm.port().events(), &[PortEvent::Stop(vec![1, 2, 3, 4, 5, 6])]);
    }
}
