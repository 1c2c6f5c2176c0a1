// Loop rate, topics, serial defaults
//
// Arm constants (geometry, calibration, timing) live in the profile; this
// file only holds runtime plumbing.

// Runtime loop frequency
pub const LOOP_HZ: u64 = 20;

// Zenoh topics
pub const TOPIC_CMD_ARM: &str = "xarm/cmd/arm"; // commands
pub const TOPIC_STATE_ARM: &str = "xarm/state/arm"; // command outcomes
pub const TOPIC_HEALTH: &str = "xarm/state/health"; // health status

// Serial port for the xArm controller board
pub const SERIAL_PORT: &str = "/dev/ttyUSB0";
