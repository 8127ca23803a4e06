//! Board-fixed constants for the application binary: port/LED counts and
//! the wire values the application reports back over the transport.
//!
//! Grounded on `mcu-firmware/rrrc/` component headers (`MOTOR_PORT_COUNT`,
//! `SENSOR_PORT_COUNT`, `RING_LED_COUNT`) the way `board.rs` in the
//! bootloader mirrors `flash_mapping.c`'s constants.

pub const MOTOR_PORT_COUNT: usize = 6;
pub const SENSOR_PORT_COUNT: usize = 4;
pub const RING_LEDS: usize = 12;

pub const HARDWARE_VERSION: &str = "botbrain-2.0";

/// Wire value `GetOperationMode` reports while running the application.
pub const OPERATION_MODE_APPLICATION: u8 = 0xAA;

/// Startup-indicator budget: how long the indication engine runs its own
/// animation before falling back to whatever scenario is requested, if
/// the master status never reaches `Operational` first.
pub const EXPECTED_STARTUP_TIME_MS: u32 = 3_000;
