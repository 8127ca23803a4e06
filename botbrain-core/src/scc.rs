//! Sensor Control Core: the passive, non-motor sensor-port libraries.
//!
//! Only the two simplest port libraries are carried over: an unconfigured
//! port (`Dummy`, reports itself as not present) and a digital bumper
//! switch read through the analog threshold comparator all sensor ports
//! share. The EV3/NXT slot-protocol sensor libraries from the same
//! directory are out of scope here — see `DESIGN.md`.

/// Half of the 0..5V ADC range a bumper switch's 3V signal sits above
/// when pressed.
const BUMPER_THRESHOLD: u8 = 75;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum SensorOnPortStatus {
    Unknown,
    NotPresent,
}

/// A bumper switch read through the port's analog comparator: pressed
/// whenever the last sampled value clears the threshold.
#[derive(Clone, Copy, Debug, Default)]
pub struct BumperSwitch {
    analog_value: u8,
    was_pressed: bool,
}

impl BumperSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new raw ADC sample; returns the 2-byte status frame
    /// (`pressed: u8, raw: u8`) to report over the transport.
    pub fn update_analog_data(&mut self, raw_value: u8) -> [u8; 2] {
        self.analog_value = raw_value;
        let pressed = raw_value > BUMPER_THRESHOLD;
        if pressed {
            self.was_pressed = true;
        }
        [pressed as u8, raw_value]
    }

    pub fn is_pressed(&self) -> bool {
        self.analog_value > BUMPER_THRESHOLD
    }

    pub fn was_ever_pressed(&self) -> bool {
        self.was_pressed
    }

    pub fn test_sensor_on_port(&self) -> SensorOnPortStatus {
        SensorOnPortStatus::Unknown
    }
}

/// An unconfigured sensor port: does nothing, reports itself absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dummy;

impl Dummy {
    pub fn test_sensor_on_port(&self) -> SensorOnPortStatus {
        SensorOnPortStatus::NotPresent
    }
}

/// Which passive library a sensor port is currently running.
pub enum SensorLibrary {
    Dummy(Dummy),
    BumperSwitch(BumperSwitch),
}

impl SensorLibrary {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dummy(_) => "NotConfigured",
            Self::BumperSwitch(_) => "BumperSwitch",
        }
    }

    pub fn test_sensor_on_port(&self) -> SensorOnPortStatus {
        match self {
            Self::Dummy(d) => d.test_sensor_on_port(),
            Self::BumperSwitch(b) => b.test_sensor_on_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumper_switch_reports_pressed_above_threshold() {
        let mut bumper = BumperSwitch::new();
        let frame = bumper.update_analog_data(200);
        assert_eq!(frame, [1, 200]);
        assert!(bumper.is_pressed());
        assert!(bumper.was_ever_pressed());
    }

    #[test]
    fn bumper_switch_reports_released_below_threshold() {
        let mut bumper = BumperSwitch::new();
        let frame = bumper.update_analog_data(10);
        assert_eq!(frame, [0, 10]);
        assert!(!bumper.is_pressed());
    }

    #[test]
    fn bumper_switch_latches_was_pressed_across_releases() {
        let mut bumper = BumperSwitch::new();
        bumper.update_analog_data(200);
        bumper.update_analog_data(0);
        assert!(!bumper.is_pressed());
        assert!(bumper.was_ever_pressed());
    }

    #[test]
    fn dummy_reports_not_present() {
        let sensor = SensorLibrary::Dummy(Dummy);
        assert_eq!(sensor.test_sensor_on_port(), SensorOnPortStatus::NotPresent);
    }

    #[test]
    fn bumper_switch_library_reports_unknown() {
        let sensor = SensorLibrary::BumperSwitch(BumperSwitch::new());
        assert_eq!(sensor.test_sensor_on_port(), SensorOnPortStatus::Unknown);
    }
}
