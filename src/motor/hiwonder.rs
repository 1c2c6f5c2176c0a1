// Hiwonder / LewanSoul xArm controller serial protocol
//
// Packet format: [0x55, 0x55, Length, Command, Params...]
// Length counts itself, the command byte and the params. There is no
// checksum. Multi-byte values are little-endian.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::port::{ActuatorPort, BusError, Result};

/// Default serial configuration for the xArm controller board
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Packet header bytes
const SIGNATURE: [u8; 2] = [0x55, 0x55];

/// Command set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    ServoMove = 0x03,
    GetBatteryVoltage = 0x0F,
    ServoStop = 0x14,
    GetServoPosition = 0x15,
}

/// Serial connection to the xArm controller
pub struct HiwonderBus {
    port: Box<dyn SerialPort>,
}

impl HiwonderBus {
    /// Open a new connection to the controller
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Build a packet with signature and length
    fn build_packet(command: Command, params: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(4 + params.len());
        packet.extend_from_slice(&SIGNATURE);
        packet.push((params.len() + 2) as u8); // params + length + command
        packet.push(command as u8);
        packet.extend_from_slice(params);
        packet
    }

    /// Params for a timed move of several servos
    fn move_params(duration_ms: u16, targets: &[(u8, u16)]) -> Vec<u8> {
        let [dur_lo, dur_hi] = duration_ms.to_le_bytes();
        let mut params = Vec::with_capacity(3 + 3 * targets.len());
        params.extend_from_slice(&[targets.len() as u8, dur_lo, dur_hi]);
        for &(id, position) in targets {
            let [lo, hi] = position.to_le_bytes();
            params.extend_from_slice(&[id, lo, hi]);
        }
        params
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read a response packet and return its params
    fn read_response(&mut self, expected: Command) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BusError::Timeout {
                    command: expected as u8,
                }
            } else {
                BusError::Io(e)
            }
        })?;

        if header[..2] != SIGNATURE {
            return Err(BusError::InvalidResponse {
                command: expected as u8,
                reason: format!("Invalid signature: {:02X?}", &header[..2]),
            });
        }
        if header[3] != expected as u8 {
            return Err(BusError::InvalidResponse {
                command: expected as u8,
                reason: format!("Command mismatch: got 0x{:02X}", header[3]),
            });
        }
        let length = header[2] as usize;
        if length < 2 {
            return Err(BusError::InvalidResponse {
                command: expected as u8,
                reason: format!("Length {} too short", length),
            });
        }

        let mut params = vec![0u8; length - 2];
        self.port.read_exact(&mut params)?;
        debug!("Recv cmd 0x{:02X}: {:02X?}", expected as u8, params);
        Ok(params)
    }

    /// Move several servos together
    pub fn set_positions(&mut self, targets: &[(u8, u16)], duration_ms: u32, wait: bool) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let duration = duration_ms.min(u16::MAX as u32) as u16;
        let packet = Self::build_packet(Command::ServoMove, &Self::move_params(duration, targets));
        debug!("Move {:?} over {}ms", targets, duration);
        self.send_packet(&packet)?;

        if wait {
            std::thread::sleep(Duration::from_millis(duration as u64));
        }
        Ok(())
    }
}

/// Decode a position reply: [count, (id, lo, hi)...]
fn decode_positions(params: &[u8]) -> Result<Vec<(u8, u16)>> {
    let invalid = |reason: String| BusError::InvalidResponse {
        command: Command::GetServoPosition as u8,
        reason,
    };
    let (&count, body) = params
        .split_first()
        .ok_or_else(|| invalid("Empty response".to_string()))?;
    if body.len() < count as usize * 3 {
        return Err(invalid(format!(
            "Expected {} servo entries, got {} bytes",
            count,
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(3)
        .take(count as usize)
        .map(|c| (c[0], u16::from_le_bytes([c[1], c[2]])))
        .collect())
}

/// Decode a battery reply: millivolts, little-endian
fn decode_battery(params: &[u8]) -> Result<f32> {
    match params {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi]) as f32 / 1000.0),
        _ => Err(BusError::InvalidResponse {
            command: Command::GetBatteryVoltage as u8,
            reason: format!("Expected 2 bytes, got {}", params.len()),
        }),
    }
}

impl ActuatorPort for HiwonderBus {
    fn set_position(&mut self, joint_id: u8, raw: u16, duration_ms: u32, wait: bool) -> Result<()> {
        self.set_positions(&[(joint_id, raw)], duration_ms, wait)
    }

    fn get_position(&mut self, joint_id: u8) -> Result<u16> {
        let packet = Self::build_packet(Command::GetServoPosition, &[1, joint_id]);
        self.send_packet(&packet)?;

        let params = self.read_response(Command::GetServoPosition)?;
        decode_positions(&params)?
            .into_iter()
            .find(|&(id, _)| id == joint_id)
            .map(|(_, position)| position)
            .ok_or_else(|| BusError::InvalidResponse {
                command: Command::GetServoPosition as u8,
                reason: format!("No entry for servo {}", joint_id),
            })
    }

    fn get_battery_voltage(&mut self) -> Result<f32> {
        let packet = Self::build_packet(Command::GetBatteryVoltage, &[]);
        self.send_packet(&packet)?;
        let params = self.read_response(Command::GetBatteryVoltage)?;
        decode_battery(&params)
    }

    fn stop(&mut self, joint_ids: &[u8]) -> Result<()> {
        let mut params = Vec::with_capacity(1 + joint_ids.len());
        params.push(joint_ids.len() as u8);
        params.extend_from_slice(joint_ids);
        let packet = Self::build_packet(Command::ServoStop, &params);
        debug!("Stop servos {:?}", joint_ids);
        self.send_packet(&packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_move_packet() {
        let params = HiwonderBus::move_params(1000, &[(3, 1500)]);
        let packet = HiwonderBus::build_packet(Command::ServoMove, &params);
        // count=1, duration 1000 = 0x03E8, servo 3 to 1500 = 0x05DC
        assert_eq!(
            packet,
            vec![0x55, 0x55, 8, 0x03, 1, 0xE8, 0x03, 3, 0xDC, 0x05]
        );
    }

    #[test]
    fn test_build_empty_packet() {
        let packet = HiwonderBus::build_packet(Command::GetBatteryVoltage, &[]);
        // Signature (2) + Length (1) + Command (1)
        assert_eq!(packet, vec![0x55, 0x55, 2, 0x0F]);
    }

    #[test]
    fn test_move_params_multiple_servos() {
        let params = HiwonderBus::move_params(500, &[(1, 1150), (6, 1900)]);
        assert_eq!(params[0], 2);
        assert_eq!(params.len(), 3 + 6);
        assert_eq!(&params[3..6], &[1, 0x7E, 0x04]);
        assert_eq!(&params[6..9], &[6, 0x6C, 0x07]);
    }

    #[test]
    fn test_decode_positions() {
        let positions = decode_positions(&[2, 3, 0xDC, 0x05, 4, 0x00, 0x01]).unwrap();
        assert_eq!(positions, vec![(3, 1500), (4, 256)]);

        assert!(decode_positions(&[]).is_err());
        assert!(decode_positions(&[2, 3, 0xDC, 0x05]).is_err());
    }

    #[test]
    fn test_decode_battery() {
        // 7400 mV = 0x1CE8
        let volts = decode_battery(&[0xE8, 0x1C]).unwrap();
        assert!((volts - 7.4).abs() < 1e-6);
        assert!(decode_battery(&[0x01]).is_err());
    }
}
