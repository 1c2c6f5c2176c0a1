// In-memory actuator port for dry runs and tests
//
// Records every command instead of moving hardware. Pauses are recorded,
// not slept.

use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::port::{ActuatorPort, BusError, Result};

/// Something the simulated bus was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    Move {
        joint_id: u8,
        raw: u16,
        duration_ms: u32,
        wait: bool,
    },
    Stop(Vec<u8>),
    Pause(Duration),
}

#[derive(Debug, Clone)]
pub struct SimulatedPort {
    events: Vec<PortEvent>,
    positions: HashMap<u8, u16>,
    battery_volts: f32,
    readback: bool,
    fail_next: Option<String>,
}

impl Default for SimulatedPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPort {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            positions: HashMap::new(),
            battery_volts: 7.4,
            readback: false,
            fail_next: None,
        }
    }

    /// Answer `get_position` with the last commanded (or seeded) position
    pub fn with_readback(mut self, positions: &[(u8, u16)]) -> Self {
        self.readback = true;
        self.positions.extend(positions.iter().copied());
        self
    }

    pub fn with_battery(mut self, volts: f32) -> Self {
        self.battery_volts = volts;
        self
    }

    /// Make the next `set_position` fail
    pub fn fail_next(&mut self, reason: impl Into<String>) {
        self.fail_next = Some(reason.into());
    }

    pub fn events(&self) -> &[PortEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Moves only, in dispatch order
    pub fn moves(&self) -> Vec<(u8, u16, u32)> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                PortEvent::Move {
                    joint_id,
                    raw,
                    duration_ms,
                    ..
                } => Some((joint_id, raw, duration_ms)),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, joint_id: u8) -> Option<u16> {
        self.positions.get(&joint_id).copied()
    }
}

impl ActuatorPort for SimulatedPort {
    fn set_position(&mut self, joint_id: u8, raw: u16, duration_ms: u32, wait: bool) -> Result<()> {
        if let Some(reason) = self.fail_next.take() {
            return Err(BusError::Rejected(reason));
        }
        debug!(
            "Sim move servo {} -> {} over {}ms (wait={})",
            joint_id, raw, duration_ms, wait
        );
        self.positions.insert(joint_id, raw);
        self.events.push(PortEvent::Move {
            joint_id,
            raw,
            duration_ms,
            wait,
        });
        if wait {
            self.events
                .push(PortEvent::Pause(Duration::from_millis(duration_ms as u64)));
        }
        Ok(())
    }

    fn get_position(&mut self, joint_id: u8) -> Result<u16> {
        if !self.readback {
            return Err(BusError::Unsupported("get_position"));
        }
        self.positions
            .get(&joint_id)
            .copied()
            .ok_or_else(|| BusError::InvalidResponse {
                command: 0x15,
                reason: format!("servo {} has never been positioned", joint_id),
            })
    }

    fn get_battery_voltage(&mut self) -> Result<f32> {
        Ok(self.battery_volts)
    }

    fn stop(&mut self, joint_ids: &[u8]) -> Result<()> {
        self.events.push(PortEvent::Stop(joint_ids.to_vec()));
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        self.events.push(PortEvent::Pause(duration));
    }
}
