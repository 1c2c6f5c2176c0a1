// Bus diagnostic: READ-ONLY check of the xArm controller connection
//
// Reads the battery voltage and every servo position. Nothing is written
// to the servos.
//
// Usage: cargo run --example bus_diagnostic -- [port]
// Example: cargo run --example bus_diagnostic -- /dev/ttyUSB0

use std::io::{self, Write};
use xarm_pick_runtime::ArmProfile;
use xarm_pick_runtime::config::SERIAL_PORT;
use xarm_pick_runtime::motor::{ActuatorPort, CalibrationModel, HiwonderBus, Joint};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| SERIAL_PORT.to_string());

    println!("xArm bus diagnostic (read-only)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match HiwonderBus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the controller is powered and the USB cable is connected");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Battery...");
    match bus.get_battery_voltage() {
        Ok(volts) => println!("  {:.2} V", volts),
        Err(e) => println!("  ✗ ERROR: {}", e),
    }
    println!();

    // Built-in calibration, to show positions in degrees as well
    let profile = ArmProfile::default();
    let calibration = CalibrationModel::fit(&profile.joints)?;

    println!("Step 3: Servo positions...");
    let mut all_found = true;
    for joint in Joint::ALL {
        print!("  {:<15} (ID {}): ", joint, joint.bus_id());
        io::stdout().flush()?;
        match bus.get_position(joint.bus_id()) {
            Ok(raw) => println!(
                "{:>5} raw  ~{:>7.1}°",
                raw,
                calibration.raw_to_angle(joint, raw as i32)
            ),
            Err(e) => {
                println!("✗ ERROR: {}", e);
                all_found = false;
            }
        }
    }
    println!();

    if all_found {
        println!("✓ All servos responded");
    } else {
        println!("⚠ WARNING: Not all servos responded!");
    }
    Ok(())
}
