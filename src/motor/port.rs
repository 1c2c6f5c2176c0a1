// Actuator port: the capability contract the core needs from the servo bus
//
// Framing, baud rates and id schemes belong to the adapters (see
// `hiwonder` and `sim`). The core only speaks in joint ids, raw positions
// and durations.

use std::time::Duration;

/// Failure to deliver a command or parse a response
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response to command 0x{command:02X}: {reason}")]
    InvalidResponse { command: u8, reason: String },

    #[error("Timeout waiting for response to command 0x{command:02X}")]
    Timeout { command: u8 },

    #[error("Operation not supported by this bus: {0}")]
    Unsupported(&'static str),

    #[error("Bus rejected command: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Commands the physical bus adapter must accept
pub trait ActuatorPort {
    /// Move one servo to `raw` over `duration_ms`. With `wait` the call
    /// blocks for the duration of the motion.
    fn set_position(&mut self, joint_id: u8, raw: u16, duration_ms: u32, wait: bool) -> Result<()>;

    /// Read back a servo position. Optional; not every bus supports it.
    fn get_position(&mut self, _joint_id: u8) -> Result<u16> {
        Err(BusError::Unsupported("get_position"))
    }

    fn get_battery_voltage(&mut self) -> Result<f32>;

    /// Release the given servos
    fn stop(&mut self, joint_ids: &[u8]) -> Result<()>;

    /// Let time pass while motions complete
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<P: ActuatorPort + ?Sized> ActuatorPort for Box<P> {
    fn set_position(&mut self, joint_id: u8, raw: u16, duration_ms: u32, wait: bool) -> Result<()> {
        (**self).set_position(joint_id, raw, duration_ms, wait)
    }

    fn get_position(&mut self, joint_id: u8) -> Result<u16> {
        (**self).get_position(joint_id)
    }

    fn get_battery_voltage(&mut self) -> Result<f32> {
        (**self).get_battery_voltage()
    }

    fn stop(&mut self, joint_ids: &[u8]) -> Result<()> {
        (**self).stop(joint_ids)
    }

    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration)
    }
}
