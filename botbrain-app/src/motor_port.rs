//! One physical motor port: the host-selectable port library, its
//! host-exposed drive-request slot, and the PWM/direction hardware it
//! drives.
//!
//! `DcMotor` itself is concrete rather than a trait object (it's the only
//! library `botbrain_core::mcc` implements), but the port still needs the
//! `Dummy`/`Dc` library switch the transport exposes
//! (`MotorPortHandler_Run_SetPortType`) — that dispatch lives here, one
//! layer up, mirroring `botbrain_core::scc::SensorLibrary`'s tagged-enum
//! shape for the analogous sensor-port switch.
//!
//! PWM output setup is grounded on the teacher's rotor drive in
//! `firmware/src/main.rs`/`flight_ctrls.rs` (`enable_pwm_output`,
//! `set_duty`), adapted from bidirectional ESC throttle to brushed-DC
//! magnitude + direction. Several ports share one hardware timer (four
//! capture/compare channels each), so a port only owns its channel and
//! direction pin; the timer itself is passed in at tick time.

use hal::gpio::Pin;
use hal::timer::{TimChannel, Timer};

use botbrain_core::mcc::{ConfigError, DcMotor, DriveRequest, RequestError, StatusFrame};

/// Timer auto-reload value the PWM channels are configured with; duty is
/// expressed as a fraction of this count, matching the teacher's
/// `arr_portion = power * PWM_ARR`.
const PWM_ARR: u32 = 2_000;

/// One H-bridge channel: `channel` picks the PWM magnitude, `direction`
/// the forward/reverse GPIO level.
pub struct PwmOutput {
    channel: TimChannel,
    direction: Pin,
}

impl PwmOutput {
    pub fn new(channel: TimChannel, direction: Pin) -> Self {
        Self { channel, direction }
    }

    /// `pwm` is the signed `[-200, 200]` value `DcMotor::tick` produces.
    fn apply<TIM>(&mut self, timer: &mut Timer<TIM>, pwm: i16) {
        if pwm >= 0 {
            self.direction.set_high();
        } else {
            self.direction.set_low();
        }
        let magnitude = pwm.unsigned_abs().min(200) as f32 / 200.0;
        timer.set_duty(self.channel, (magnitude * PWM_ARR as f32) as u32);
    }

    fn idle<TIM>(&mut self, timer: &mut Timer<TIM>) {
        timer.set_duty(self.channel, 0);
    }
}

/// Which library is installed on a motor port right now: an unconfigured
/// port reporting itself absent, or an active DC-motor control loop.
enum MotorLibrary {
    Dummy,
    Dc(DcMotor, DriveRequest),
}

pub struct MotorPort {
    library: MotorLibrary,
    output: PwmOutput,
    last_status: StatusFrame,
}

impl MotorPort {
    pub fn new(output: PwmOutput) -> Self {
        Self {
            library: MotorLibrary::Dummy,
            output,
            last_status: StatusFrame {
                status: botbrain_core::mcc::MotorStatus::Normal,
                pwm_percent: 0,
                position_degrees: 0,
                current_speed: 0.0,
                version: 0,
            },
        }
    }

    pub fn library_name(&self) -> &'static str {
        match self.library {
            MotorLibrary::Dummy => "Dummy",
            MotorLibrary::Dc(..) => "Dc",
        }
    }

    /// Switches the installed library, matching `MotorPortHandler_Run_SetPortType`'s
    /// teardown-then-init: the outgoing library simply has no further
    /// say once replaced.
    pub fn set_port_type(&mut self, dc: bool) {
        self.library = if dc {
            MotorLibrary::Dc(DcMotor::new(), DriveRequest::default())
        } else {
            MotorLibrary::Dummy
        };
    }

    pub fn configure(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        match &mut self.library {
            MotorLibrary::Dummy => Ok(()),
            MotorLibrary::Dc(motor, _) => motor.configure(data),
        }
    }

    pub fn create_drive_request(&self, data: &[u8]) -> Result<DriveRequest, RequestError> {
        match &self.library {
            MotorLibrary::Dummy => Err(RequestError::UnknownControlMode),
            MotorLibrary::Dc(motor, _) => motor.create_drive_request(data),
        }
    }

    /// Replaces the host-exposed request slot; superseded by the next
    /// one before any control tick observes it.
    pub fn set_pending_request(&mut self, request: DriveRequest) {
        if let MotorLibrary::Dc(_, pending) = &mut self.library {
            *pending = request;
        }
    }

    pub fn on_encoder_a_edge(&mut self, enc0: bool, enc1: bool) {
        if let MotorLibrary::Dc(motor, _) = &mut self.library {
            motor.on_gpio0_edge(enc0, enc1);
        }
    }

    pub fn on_encoder_b_edge(&mut self, enc0: bool, enc1: bool) {
        if let MotorLibrary::Dc(motor, _) = &mut self.library {
            motor.on_gpio1_edge(enc0, enc1);
        }
    }

    /// Runs one 10ms control tick against the latest request and drives
    /// the PWM output accordingly. `timer` is whichever shared timer
    /// this port's channel lives on. A `Dummy` port just idles its
    /// output.
    pub fn tick<TIM>(&mut self, timer: &mut Timer<TIM>) {
        match &mut self.library {
            MotorLibrary::Dummy => self.output.idle(timer),
            MotorLibrary::Dc(motor, pending) => {
                let tick = motor.tick(*pending);
                self.output.apply(timer, tick.pwm);
                self.last_status = tick.status;
            }
        }
    }

    pub fn status_bytes(&self) -> [u8; 11] {
        self.last_status.to_bytes()
    }
}
