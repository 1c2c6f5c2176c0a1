// Keyboard jog: nudge a Cartesian target and publish move_to commands
//
// WASD moves in x/y, R/F raises and lowers, SPACE toggles the gripper,
// H homes the arm, 1-3 changes step size, Q quits.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;

use xarm_pick_runtime::config::TOPIC_CMD_ARM;
use xarm_pick_runtime::messages::ArmCommand;
use xarm_pick_runtime::motor::GripperAction;

const STEPS: [f64; 3] = [0.5, 1.0, 3.0]; // arm length units per key press
const START: (f64, f64, f64) = (20.0, 0.0, 15.0);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_ARM).await?;

    info!("Controls: WASD=x/y, R/F=z, SPACE=gripper, H=home, 1-3=step, Q=quit");

    enable_raw_mode()?;
    let result = run_jog(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: &ArmCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

async fn run_jog(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut x, mut y, mut z) = START;
    let mut step_idx: usize = 1;
    let mut gripper_open = true;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        let step = STEPS[step_idx];
        let cmd = match code {
            KeyCode::Char('w') => {
                x += step;
                ArmCommand::MoveTo { x, y, z }
            }
            KeyCode::Char('s') => {
                x -= step;
                ArmCommand::MoveTo { x, y, z }
            }
            KeyCode::Char('a') => {
                y += step;
                ArmCommand::MoveTo { x, y, z }
            }
            KeyCode::Char('d') => {
                y -= step;
                ArmCommand::MoveTo { x, y, z }
            }
            KeyCode::Char('r') => {
                z += step;
                ArmCommand::MoveTo { x, y, z }
            }
            KeyCode::Char('f') => {
                z -= step;
                ArmCommand::MoveTo { x, y, z }
            }
            KeyCode::Char(' ') => {
                gripper_open = !gripper_open;
                let action = if gripper_open {
                    GripperAction::Open
                } else {
                    GripperAction::Close
                };
                ArmCommand::Gripper { action }
            }
            KeyCode::Char('h') => {
                (x, y, z) = START;
                gripper_open = true;
                ArmCommand::Default { include_gripper: true }
            }
            KeyCode::Char(c @ '1'..='3') => {
                step_idx = (c as u8 - b'1') as usize;
                info!("Step: {}", STEPS[step_idx]);
                continue;
            }
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        };

        info!("{:?}", cmd);
        publish(publisher, &cmd).await?;
    }

    Ok(())
}
