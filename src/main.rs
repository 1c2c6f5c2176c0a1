use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xarm_pick_runtime::ArmProfile;
use xarm_pick_runtime::config::SERIAL_PORT;
use xarm_pick_runtime::motor::{ActuatorPort, HiwonderBus, SimulatedPort};

/// Pick-and-place runtime for the xArm
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Arm profile (JSON); the built-in profile is used when omitted
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Serial port of the controller board
    #[arg(long, default_value = SERIAL_PORT)]
    port: String,

    /// Record commands instead of driving hardware
    #[arg(long)]
    simulate: bool,

    /// Write the active profile to this path and exit
    #[arg(long)]
    write_profile: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = start(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let profile = match &args.profile {
        Some(path) => ArmProfile::load(path)?,
        None => {
            info!("Using built-in arm profile");
            ArmProfile::default()
        }
    };

    if let Some(path) = &args.write_profile {
        profile.save(path)?;
        info!("Profile written to {}", path.display());
        return Ok(());
    }

    let port: Box<dyn ActuatorPort + Send> = if args.simulate {
        info!("Simulated bus, no hardware will move");
        Box::new(SimulatedPort::new())
    } else {
        info!("Opening controller on {}", args.port);
        Box::new(HiwonderBus::open(&args.port)?)
    };

    xarm_pick_runtime::runtime::run(profile, port).await
}
