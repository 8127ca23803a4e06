//! Motor Control Core: per-port DC motor drive logic — quadrature
//! position tracking, a cascaded speed/position PID, stall detection and
//! acceleration-limited drive requests.
//!
//! A sensor port can instead host a passive library (see `scc`); motor
//! ports only ever run `DcMotor`, so unlike the original firmware's
//! per-port vtable this is a concrete type, not a trait object.

use libm::fabsf;

use crate::bytes::{get_f32, get_i32};
use crate::interpolate::{linear_interpolate, linear_interpolate_symmetrical, map, Lut};
use crate::pid::{Pid, PidConfig};

pub const MOTOR_TIMEOUT_THRESHOLD: u16 = 10; // 100ms at a 10ms tick
const PULSES_PER_ENCODER_SLIT: f32 = 2.0;
const CONFIG_HEADER_SIZE: usize = 81;
const MAX_NONLINEARITY_POINTS: usize = 10; // includes the fixed (0, 0) point

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum PositionBreakpointKind {
    Degrees,
    Relative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum MotorStatus {
    Normal,
    Blocked,
    GoalReached,
}

#[derive(Clone, Copy, Debug, PartialEq, defmt::Format)]
pub enum RequestKind {
    Power(i16),
    Speed {
        speed: f32,
        power_limit: f32,
    },
    Position {
        position: i32,
        speed_limit: f32,
        power_limit: f32,
        breakpoint_ticks: i32,
    },
}

/// A drive command plus the version counter used to detect whether it
/// has already been applied and to invalidate stale commands after a
/// reconfiguration or a stall.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct DriveRequest {
    pub version: u8,
    pub kind: RequestKind,
}

impl DriveRequest {
    pub const fn zero_power(version: u8) -> Self {
        Self {
            version,
            kind: RequestKind::Power(0),
        }
    }
}

impl Default for DriveRequest {
    fn default() -> Self {
        Self::zero_power(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ConfigError {
    TooShort,
    BadLinearityTableSize,
    TooManyLinearityPoints,
    InvalidPositionBreakpointKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum RequestError {
    Empty,
    UnknownControlMode,
    WrongLength,
    InvalidPwm,
    UnknownLimitType,
}

#[derive(Clone, Copy)]
struct Nonlinearity {
    xs: [f32; MAX_NONLINEARITY_POINTS],
    ys: [f32; MAX_NONLINEARITY_POINTS],
    len: usize,
}

impl Nonlinearity {
    fn linear() -> Self {
        let mut xs = [0.0f32; MAX_NONLINEARITY_POINTS];
        let mut ys = [0.0f32; MAX_NONLINEARITY_POINTS];
        xs[1] = 100.0;
        ys[1] = 100.0;
        Self { xs, ys, len: 2 }
    }

    fn lut(&self) -> Lut {
        Lut::new(&self.xs[..self.len], &self.ys[..self.len])
    }
}

/// Output produced once per 10ms control tick: the new PWM drive value
/// plus the 11-byte status frame reported over the transport.
pub struct MotorTick {
    pub pwm: i16,
    pub status: StatusFrame,
}

#[derive(Clone, Copy)]
pub struct StatusFrame {
    pub status: MotorStatus,
    pub pwm_percent: i8,
    pub position_degrees: i32,
    pub current_speed: f32,
    pub version: u8,
}

impl StatusFrame {
    pub fn to_bytes(&self) -> [u8; 11] {
        let mut out = [0u8; 11];
        out[0] = self.status as u8;
        out[1] = self.pwm_percent as u8;
        out[2..6].copy_from_slice(&self.position_degrees.to_le_bytes());
        out[6..10].copy_from_slice(&self.current_speed.to_le_bytes());
        out[10] = self.version;
        out
    }
}

fn sign(x: f32) -> f32 {
    if x < 0.0 {
        -1.0
    } else {
        1.0
    }
}

fn sign_i32(x: f32) -> i32 {
    if x < 0.0 {
        -1
    } else {
        1
    }
}

fn degrees_to_ticks(resolution: f32, degrees: f32) -> i32 {
    map(degrees, 0.0, 360.0, 0.0, fabsf(resolution)).round() as i32
}

fn ticks_to_degrees(resolution: f32, value: f32) -> f32 {
    map(value, 0.0, fabsf(resolution), 0.0, 360.0)
}

fn select_pid(controller: &mut Pid, coefficients: &PidConfig) {
    controller.config.p = coefficients.p;
    controller.config.i = coefficients.i;
    controller.config.d = coefficients.d;
}

/// State and configuration for one DC motor port.
pub struct DcMotor {
    slow_position_config: PidConfig,
    fast_position_config: PidConfig,
    position_breakpoint: f32,
    position_breakpoint_kind: PositionBreakpointKind,
    position_controller: Pid,
    speed_controller: Pid,
    resolution: f32,
    at_least_one_degree: i32,
    nonlinearity: Nonlinearity,

    position_controller_lower_limit: f32,
    position_controller_upper_limit: f32,
    speed_controller_lower_limit: f32,
    speed_controller_upper_limit: f32,

    max_acceleration: f32,
    max_deceleration: f32,

    current_request: DriveRequest,
    position_request_breakpoint: i32,

    motor_status: MotorStatus,
    last_position: i32,
    prev_pos_diff: i32,
    current_speed: f32,
    motor_timeout: u16,

    position: i32,
}

impl Default for DcMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl DcMotor {
    pub fn new() -> Self {
        Self {
            slow_position_config: PidConfig::default(),
            fast_position_config: PidConfig::default(),
            position_breakpoint: 0.0,
            position_breakpoint_kind: PositionBreakpointKind::Degrees,
            position_controller: Pid::default(),
            speed_controller: Pid::default(),
            resolution: 360.0,
            at_least_one_degree: 1,
            nonlinearity: Nonlinearity::linear(),
            position_controller_lower_limit: 0.0,
            position_controller_upper_limit: 0.0,
            speed_controller_lower_limit: 0.0,
            speed_controller_upper_limit: 0.0,
            max_acceleration: 0.0,
            max_deceleration: 0.0,
            current_request: DriveRequest::default(),
            position_request_breakpoint: 0,
            motor_status: MotorStatus::Normal,
            last_position: 0,
            prev_pos_diff: 0,
            current_speed: 0.0,
            motor_timeout: 0,
            position: 0,
        }
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn current_request_version(&self) -> u8 {
        self.current_request.version
    }

    /// Quadrature edge on the first encoder channel. Truth table is
    /// intentionally asymmetric with `on_gpio1_edge` below — the two
    /// channels are wired in quadrature, not mirrored.
    pub fn on_gpio0_edge(&mut self, enc0: bool, enc1: bool) {
        if enc0 == enc1 {
            self.position += 1;
        } else {
            self.position -= 1;
        }
    }

    pub fn on_gpio1_edge(&mut self, enc0: bool, enc1: bool) {
        if enc0 == enc1 {
            self.position -= 1;
        } else {
            self.position += 1;
        }
    }

    /// Parse an 81-byte (+ up to 9 optional 8-byte nonlinearity points)
    /// configuration frame and reset the port to the configured state.
    pub fn configure(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        if data.len() < CONFIG_HEADER_SIZE {
            return Err(ConfigError::TooShort);
        }
        let extra = data.len() - CONFIG_HEADER_SIZE;
        if extra % 8 != 0 {
            return Err(ConfigError::BadLinearityTableSize);
        }
        let n_points = extra / 8;
        if n_points > MAX_NONLINEARITY_POINTS - 1 {
            return Err(ConfigError::TooManyLinearityPoints);
        }

        self.position_controller = Pid::default();
        self.speed_controller = Pid::default();

        let encoder_slits = get_f32(&data[0..4]);
        self.slow_position_config = read_pid_config(&data[4..24]);
        self.fast_position_config = read_pid_config(&data[24..44]);

        self.position_breakpoint_kind = match data[44] {
            0 => PositionBreakpointKind::Degrees,
            1 => PositionBreakpointKind::Relative,
            _ => return Err(ConfigError::InvalidPositionBreakpointKind),
        };
        self.position_breakpoint = get_f32(&data[45..49]);
        self.speed_controller.config = read_pid_config(&data[49..69]);

        self.max_deceleration = get_f32(&data[69..73]);
        self.max_acceleration = get_f32(&data[73..77]);
        let _max_current = get_f32(&data[77..81]);

        self.resolution = PULSES_PER_ENCODER_SLIT * encoder_slits;
        self.at_least_one_degree = (fabsf(self.resolution) / 360.0).round() as i32;
        if self.at_least_one_degree == 0 {
            self.at_least_one_degree = 1;
        }

        self.position_controller_lower_limit = self.slow_position_config.lower_limit;
        self.position_controller_upper_limit = self.slow_position_config.upper_limit;
        self.speed_controller_lower_limit = self.speed_controller.config.lower_limit;
        self.speed_controller_upper_limit = self.speed_controller.config.upper_limit;

        self.nonlinearity.xs[0] = 0.0;
        self.nonlinearity.ys[0] = 0.0;
        if n_points == 0 {
            self.nonlinearity.xs[1] = 1.0;
            self.nonlinearity.ys[1] = 1.0;
            self.nonlinearity.len = 2;
        } else {
            for i in 0..n_points {
                let base = CONFIG_HEADER_SIZE + i * 8;
                self.nonlinearity.xs[i + 1] = get_f32(&data[base..base + 4]);
                self.nonlinearity.ys[i + 1] = get_f32(&data[base + 4..base + 8]) * sign(self.resolution);
            }
            self.nonlinearity.len = n_points + 1;
        }

        self.last_position = 0;
        self.position = 0;
        self.current_speed = 0.0;
        self.motor_status = MotorStatus::Normal;
        self.motor_timeout = 0;
        self.current_request = DriveRequest::zero_power(self.current_request.version);

        Ok(())
    }

    /// Parse a drive-request wire frame for this port's current
    /// configuration. `data[0]` selects power/speed/position mode; the
    /// returned request is versioned one past whatever is currently
    /// applied, so applying it always counts as a new command.
    pub fn create_drive_request(&self, data: &[u8]) -> Result<DriveRequest, RequestError> {
        if data.is_empty() {
            return Err(RequestError::Empty);
        }
        let version = self.current_request.version.wrapping_add(1);

        let kind = match data[0] {
            0 => self.create_pwm_request(data)?,
            1 => self.create_speed_request(data)?,
            2 | 3 => self.create_position_request(data)?,
            _ => return Err(RequestError::UnknownControlMode),
        };

        Ok(DriveRequest { version, kind })
    }

    fn create_pwm_request(&self, data: &[u8]) -> Result<RequestKind, RequestError> {
        if data.len() != 2 {
            return Err(RequestError::WrongLength);
        }
        let pwm = data[1] as i8;
        if !(-100..=100).contains(&pwm) {
            return Err(RequestError::InvalidPwm);
        }
        Ok(RequestKind::Power(2 * pwm as i16))
    }

    fn create_speed_request(&self, data: &[u8]) -> Result<RequestKind, RequestError> {
        let power_limit = match data.len() {
            5 => 0.0,
            9 => get_f32(&data[5..9]),
            _ => return Err(RequestError::WrongLength),
        };
        let speed = get_f32(&data[1..5]);
        Ok(RequestKind::Speed { speed, power_limit })
    }

    fn create_position_request(&self, data: &[u8]) -> Result<RequestKind, RequestError> {
        let (speed_limit, power_limit) = match data.len() {
            5 => (0.0, 0.0),
            10 => match data[5] {
                0 => (0.0, get_f32(&data[6..10])),
                1 => (get_f32(&data[6..10]), 0.0),
                _ => return Err(RequestError::UnknownLimitType),
            },
            13 => (get_f32(&data[5..9]), get_f32(&data[9..13])),
            _ => return Err(RequestError::WrongLength),
        };

        let mut requested_position = degrees_to_ticks(self.resolution, get_i32(&data[1..5]) as f32);
        if data[0] == 3 {
            requested_position += self.last_position;
        }

        let breakpoint_ticks = match self.position_breakpoint_kind {
            PositionBreakpointKind::Degrees => degrees_to_ticks(self.resolution, self.position_breakpoint),
            PositionBreakpointKind::Relative => {
                let distance = fabsf((self.last_position - requested_position) as f32);
                (self.position_breakpoint * distance).round() as i32
            }
        };

        Ok(RequestKind::Position {
            position: requested_position,
            speed_limit,
            power_limit,
            breakpoint_ticks,
        })
    }

    fn power_limit_to_drive_limit(&self, power_limit: f32) -> f32 {
        let mut xs = [0.0f32; MAX_NONLINEARITY_POINTS];
        for i in 0..self.nonlinearity.len {
            xs[i] = fabsf(self.nonlinearity.ys[i]);
        }
        let inverse = Lut::new(&xs[..self.nonlinearity.len], &self.nonlinearity.xs[..self.nonlinearity.len]);
        // rescale power_limit from -100..100 to -200..200 before lookup
        linear_interpolate(inverse, 2.0 * power_limit)
    }

    fn process_new_request(&mut self, request: DriveRequest) {
        if core::mem::discriminant(&self.current_request.kind) != core::mem::discriminant(&request.kind) {
            self.speed_controller.reset();
            self.position_controller.reset();
        }

        self.current_request = request;
        self.motor_status = MotorStatus::Normal;
        self.motor_timeout = 0;

        let (speed_limit, power_limit, breakpoint_ticks) = match request.kind {
            RequestKind::Power(_) => return,
            RequestKind::Speed { power_limit, .. } => (0.0, power_limit, None),
            RequestKind::Position {
                speed_limit,
                power_limit,
                breakpoint_ticks,
                ..
            } => (speed_limit, power_limit, Some(breakpoint_ticks)),
        };

        if let Some(breakpoint) = breakpoint_ticks {
            self.position_request_breakpoint = breakpoint;
        }

        if speed_limit == 0.0 {
            self.position_controller.config.lower_limit = self.position_controller_lower_limit;
            self.position_controller.config.upper_limit = self.position_controller_upper_limit;
        } else {
            self.position_controller.config.lower_limit = -speed_limit;
            self.position_controller.config.upper_limit = speed_limit;
        }

        if power_limit == 0.0 {
            self.speed_controller.config.lower_limit = self.speed_controller_lower_limit;
            self.speed_controller.config.upper_limit = self.speed_controller_upper_limit;
        } else {
            let limit = self.power_limit_to_drive_limit(power_limit);
            self.speed_controller.config.lower_limit = -limit;
            self.speed_controller.config.upper_limit = limit;
        }
    }

    fn update_current_speed(&mut self) {
        let current_position = self.position * sign_i32(self.resolution);
        let pos_diff = current_position - self.last_position;
        let last_pos_diff = self.prev_pos_diff;
        self.prev_pos_diff = pos_diff;
        self.last_position = current_position;

        // 10ms tick, two consecutive samples averaged
        self.current_speed = map(
            (pos_diff + last_pos_diff) as f32,
            0.0,
            fabsf(self.resolution),
            0.0,
            3000.0,
        );
    }

    fn is_motor_blocked(&self, u: f32) -> bool {
        if self.current_speed != 0.0 {
            return false;
        }
        !(self.speed_controller.config.lower_limit < u && u < self.speed_controller.config.upper_limit)
    }

    fn run_motor_control(&mut self) -> i16 {
        let req_speed = match self.current_request.kind {
            RequestKind::Power(power) => return power,
            RequestKind::Speed { speed, .. } => {
                if self.current_speed > 0.0 {
                    speed.clamp(
                        self.current_speed - self.max_deceleration,
                        self.current_speed + self.max_acceleration,
                    )
                } else {
                    speed.clamp(
                        self.current_speed - self.max_acceleration,
                        self.current_speed + self.max_deceleration,
                    )
                }
            }
            RequestKind::Position { position, .. } => {
                let distance = fabsf((self.last_position - position) as f32);
                if (distance as i32) < self.position_request_breakpoint {
                    let coefficients = self.slow_position_config;
                    select_pid(&mut self.position_controller, &coefficients);
                } else {
                    let coefficients = self.fast_position_config;
                    select_pid(&mut self.position_controller, &coefficients);
                }

                if (distance as i32) < self.at_least_one_degree {
                    self.motor_status = MotorStatus::GoalReached;
                }

                self.position_controller.update(position as f32, self.last_position as f32)
            }
        };

        let u = self.speed_controller.update(req_speed, self.current_speed);

        if self.is_motor_blocked(u) {
            if self.motor_timeout < MOTOR_TIMEOUT_THRESHOLD {
                self.motor_timeout += 1;
                if self.motor_timeout >= MOTOR_TIMEOUT_THRESHOLD {
                    self.motor_status = MotorStatus::Blocked;
                    self.current_request = DriveRequest::zero_power(self.current_request.version);
                    return 0;
                }
            }
        } else {
            self.motor_timeout = 0;
        }

        let pwm = linear_interpolate_symmetrical(self.nonlinearity.lut(), u).round() as i16;
        pwm.clamp(-200, 200)
    }

    fn status_frame(&self, pwm: i16) -> StatusFrame {
        StatusFrame {
            status: self.motor_status,
            pwm_percent: (pwm / 2) as i8,
            position_degrees: ticks_to_degrees(self.resolution, self.last_position as f32) as i32,
            current_speed: self.current_speed,
            version: self.current_request.version,
        }
    }

    /// Advance one 10ms control tick with the latest stored drive
    /// request, driving the PID cascade and returning the new PWM value
    /// plus a status frame to report over the transport.
    pub fn tick(&mut self, drive_request: DriveRequest) -> MotorTick {
        self.update_current_speed();

        if drive_request.version != self.current_request.version {
            self.process_new_request(drive_request);
        }

        let pwm = self.run_motor_control();
        let status = self.status_frame(pwm);
        MotorTick { pwm, status }
    }
}

fn read_pid_config(data: &[u8]) -> PidConfig {
    PidConfig {
        p: get_f32(&data[0..4]),
        i: get_f32(&data[4..8]),
        d: get_f32(&data[8..12]),
        lower_limit: get_f32(&data[12..16]),
        upper_limit: get_f32(&data[16..20]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_frame() -> std::vec::Vec<u8> {
        let mut data = std::vec![0u8; CONFIG_HEADER_SIZE];
        data[0..4].copy_from_slice(&180.0f32.to_le_bytes()); // encoder_slits
        // slow position PID: P=1, rest 0, limits -1000..1000
        data[4..8].copy_from_slice(&1.0f32.to_le_bytes());
        data[16..20].copy_from_slice(&(-1000.0f32).to_le_bytes());
        data[20..24].copy_from_slice(&1000.0f32.to_le_bytes());
        // fast position PID: same as slow for this test
        data[24..28].copy_from_slice(&1.0f32.to_le_bytes());
        data[36..40].copy_from_slice(&(-1000.0f32).to_le_bytes());
        data[40..44].copy_from_slice(&1000.0f32.to_le_bytes());
        data[44] = 0; // breakpoint kind: degrees
        data[45..49].copy_from_slice(&10.0f32.to_le_bytes()); // breakpoint
        // speed controller PID: P=1, limits -200..200
        data[49..53].copy_from_slice(&1.0f32.to_le_bytes());
        data[61..65].copy_from_slice(&(-200.0f32).to_le_bytes());
        data[65..69].copy_from_slice(&200.0f32.to_le_bytes());
        data[69..73].copy_from_slice(&1000.0f32.to_le_bytes()); // maxDeceleration
        data[73..77].copy_from_slice(&1000.0f32.to_le_bytes()); // maxAcceleration
        data[77..81].copy_from_slice(&1000.0f32.to_le_bytes()); // maxCurrent
        data
    }

    #[test]
    fn configure_accepts_minimal_frame() {
        let mut motor = DcMotor::new();
        assert!(motor.configure(&config_frame()).is_ok());
        assert_eq!(motor.resolution, 360.0); // 2.0 * 180.0
    }

    #[test]
    fn configure_rejects_short_frame() {
        let mut motor = DcMotor::new();
        assert_eq!(motor.configure(&[0u8; 10]), Err(ConfigError::TooShort));
    }

    #[test]
    fn configure_rejects_misaligned_linearity_table() {
        let mut motor = DcMotor::new();
        let mut data = config_frame();
        data.extend_from_slice(&[0u8; 5]);
        assert_eq!(motor.configure(&data), Err(ConfigError::BadLinearityTableSize));
    }

    #[test]
    fn pwm_request_round_trips() {
        let mut motor = DcMotor::new();
        motor.configure(&config_frame()).unwrap();
        let req = motor.create_drive_request(&[0, 50]).unwrap();
        assert_eq!(req.kind, RequestKind::Power(100));

        let tick = motor.tick(req);
        assert_eq!(tick.pwm, 100);
        assert_eq!(tick.status.version, req.version);
    }

    #[test]
    fn pwm_request_rejects_out_of_range_value() {
        let motor = DcMotor::new();
        let pwm_byte = 101i8 as u8;
        assert_eq!(
            motor.create_drive_request(&[0, pwm_byte]),
            Err(RequestError::InvalidPwm)
        );
    }

    #[test]
    fn quadrature_edges_move_position_in_opposite_senses() {
        let mut motor = DcMotor::new();
        motor.on_gpio0_edge(false, false);
        motor.on_gpio0_edge(false, false);
        assert_eq!(motor.position(), 2);

        let mut motor2 = DcMotor::new();
        motor2.on_gpio1_edge(false, false);
        assert_eq!(motor2.position(), -1);
    }

    #[test]
    fn stall_is_detected_after_timeout_and_zeroes_the_request() {
        let mut motor = DcMotor::new();
        motor.configure(&config_frame()).unwrap();

        let speed_req = {
            let mut data = std::vec![0u8; 5];
            data[0] = 1;
            data[1..5].copy_from_slice(&100.0f32.to_le_bytes());
            motor.create_drive_request(&data).unwrap()
        };

        let mut last_status = motor.tick(speed_req).status;
        for _ in 0..(MOTOR_TIMEOUT_THRESHOLD + 1) {
            last_status = motor.tick(speed_req).status;
        }
        assert_eq!(last_status.status, MotorStatus::Blocked);
    }
}
