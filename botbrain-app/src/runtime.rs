//! The process-wide state components borrow from rather than reaching
//! into globals: the motor port array, the sensor port array, and the
//! indication engine. Built once in `init` and handed to tasks as one
//! RTIC `#[shared]` resource.

use hal::pac::{TIM1, TIM8};
use hal::rtc::Rtc;
use hal::timer::Timer;

use botbrain_core::ie;
use botbrain_core::scc::SensorLibrary;

use crate::board;
use crate::motor_port::MotorPort;

pub struct Runtime {
    pub motor_ports: [MotorPort; board::MOTOR_PORT_COUNT],
    pub motor_timer_a: Timer<TIM1>,
    pub motor_timer_b: Timer<TIM8>,
    pub sensor_ports: [SensorLibrary; board::SENSOR_PORT_COUNT],
    pub ie_engine: ie::Engine,
    pub requested_scenario: ie::Scenario,
    pub master_ready: bool,
    pub rtc: Rtc,
}

impl Runtime {
    /// Ends the indication engine's startup animation the first time the
    /// host transport answers a frame, mirroring the original firmware
    /// treating any successful exchange with the master as a readiness
    /// signal.
    pub fn mark_master_ready(&mut self) {
        if !self.master_ready {
            self.master_ready = true;
            self.ie_engine.set_master_ready();
        }
    }

    /// The first four ports share `motor_timer_a`'s channels, the
    /// remaining two `motor_timer_b`'s.
    pub fn tick_motors(&mut self) {
        for (i, port) in self.motor_ports.iter_mut().enumerate() {
            if i < 4 {
                port.tick(&mut self.motor_timer_a);
            } else {
                port.tick(&mut self.motor_timer_b);
            }
        }
    }

    pub fn tick_indication(&mut self, out: &mut ie::Pixels) {
        let master_status = if self.master_ready {
            ie::MasterStatus::Operational
        } else {
            ie::MasterStatus::Unknown
        };
        self.ie_engine
            .tick(self.master_ready, master_status, self.requested_scenario, out);
    }
}
