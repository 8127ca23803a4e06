//! Application command table: motor-port, sensor-port, and ring-LED
//! operations layered over the shared `Runtime`.
//!
//! Grounded on `mcu-firmware/rrrc/components/MotorPortHandler.c` (port
//! configure/drive/status/library-switch), `SensorPortHandler.c` (sensor
//! read), and `RingLedHandler.c` (scenario select / user frame). Every
//! handler here is rebuilt fresh per incoming frame and shares one
//! `RefCell`-wrapped borrow of `Runtime` for the dispatch — the same
//! shape the bootloader's handlers use to share its `UpdateState`, since
//! a fixed `[&mut dyn CommandHandler; N]` table can't otherwise hold more
//! than one handler with exclusive access to the same state at once.

use core::cell::RefCell;

use botbrain_core::color::Rgb;
use botbrain_core::fct::{CommandHandler, Status};
use botbrain_core::ie::{self, Scenario};

use crate::board;
use crate::rtc::McuRtcGp;
use crate::runtime::Runtime;

pub struct GetOperationModeHandler;

impl CommandHandler for GetOperationModeHandler {
    fn start(&mut self, _payload: &[u8], response: &mut [u8]) -> (Status, usize) {
        response[0] = board::OPERATION_MODE_APPLICATION;
        (Status::Ok, 1)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

/// `RebootToBootloader` for the application binary. Unlike the
/// bootloader's own handler (which owns its `McuRtcGp` outright), this
/// one borrows `Runtime`'s RTC only for the instant of the RTC-GP
/// write, so it can share the table's `RefCell` with every other
/// handler instead of holding it locked for the whole dispatch.
pub struct RebootToBootloaderHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
    pending: bool,
}

impl<'a> RebootToBootloaderHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self {
            runtime,
            pending: false,
        }
    }

    pub fn take_pending_reset(&mut self) -> bool {
        core::mem::replace(&mut self.pending, false)
    }
}

impl<'a> CommandHandler for RebootToBootloaderHandler<'a> {
    fn start(&mut self, _payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        let mut runtime = self.runtime.borrow_mut();
        McuRtcGp::new(&mut runtime.rtc).request_bootloader_on_next_boot();
        self.pending = true;
        (Status::Ok, 0)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {
        self.pending = false;
    }
}

pub struct MotorConfigureHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> MotorConfigureHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for MotorConfigureHandler<'a> {
    fn start(&mut self, payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        let Some((&port_idx, data)) = payload.split_first() else {
            return (Status::ErrorCommandError, 0);
        };
        let mut runtime = self.runtime.borrow_mut();
        let Some(port) = runtime.motor_ports.get_mut(port_idx as usize) else {
            return (Status::ErrorCommandError, 0);
        };
        match port.configure(data) {
            Ok(()) => (Status::Ok, 0),
            Err(_) => (Status::ErrorCommandError, 0),
        }
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct MotorDriveRequestHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> MotorDriveRequestHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for MotorDriveRequestHandler<'a> {
    fn start(&mut self, payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        let Some((&port_idx, data)) = payload.split_first() else {
            return (Status::ErrorCommandError, 0);
        };
        let mut runtime = self.runtime.borrow_mut();
        let Some(port) = runtime.motor_ports.get_mut(port_idx as usize) else {
            return (Status::ErrorCommandError, 0);
        };
        match port.create_drive_request(data) {
            Ok(request) => {
                port.set_pending_request(request);
                (Status::Ok, 0)
            }
            Err(_) => (Status::ErrorCommandError, 0),
        }
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct MotorReadStatusHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> MotorReadStatusHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for MotorReadStatusHandler<'a> {
    fn start(&mut self, payload: &[u8], response: &mut [u8]) -> (Status, usize) {
        let Some(&port_idx) = payload.first() else {
            return (Status::ErrorCommandError, 0);
        };
        let runtime = self.runtime.borrow();
        let Some(port) = runtime.motor_ports.get(port_idx as usize) else {
            return (Status::ErrorCommandError, 0);
        };
        let bytes = port.status_bytes();
        response[..bytes.len()].copy_from_slice(&bytes);
        (Status::Ok, bytes.len())
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct MotorSetPortTypeHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> MotorSetPortTypeHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for MotorSetPortTypeHandler<'a> {
    fn start(&mut self, payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        if payload.len() != 2 {
            return (Status::ErrorCommandError, 0);
        }
        let port_idx = payload[0];
        let mut runtime = self.runtime.borrow_mut();
        let Some(port) = runtime.motor_ports.get_mut(port_idx as usize) else {
            return (Status::ErrorCommandError, 0);
        };
        let dc = match payload[1] {
            0 => false,
            1 => true,
            _ => return (Status::ErrorCommandError, 0),
        };
        port.set_port_type(dc);
        (Status::Ok, 0)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct MotorReadPortTypesHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> MotorReadPortTypesHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for MotorReadPortTypesHandler<'a> {
    /// Wire format: repeated `{index: u8, length: u8, name: [u8; length]}`,
    /// one entry per port, matching `MotorPortHandler_Run_ReadPortTypes`.
    fn start(&mut self, _payload: &[u8], response: &mut [u8]) -> (Status, usize) {
        let runtime = self.runtime.borrow();
        let mut cursor = 0;
        for (idx, port) in runtime.motor_ports.iter().enumerate() {
            let name = port.library_name().as_bytes();
            if cursor + 2 + name.len() > response.len() {
                return (Status::ErrorInternal, 0);
            }
            response[cursor] = idx as u8;
            response[cursor + 1] = name.len() as u8;
            response[cursor + 2..cursor + 2 + name.len()].copy_from_slice(name);
            cursor += 2 + name.len();
        }
        (Status::Ok, cursor)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct SensorReadStatusHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> SensorReadStatusHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for SensorReadStatusHandler<'a> {
    fn start(&mut self, payload: &[u8], response: &mut [u8]) -> (Status, usize) {
        let Some(&port_idx) = payload.first() else {
            return (Status::ErrorCommandError, 0);
        };
        let runtime = self.runtime.borrow();
        let Some(sensor) = runtime.sensor_ports.get(port_idx as usize) else {
            return (Status::ErrorCommandError, 0);
        };
        response[0] = sensor.test_sensor_on_port() as u8;
        (Status::Ok, 1)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct IndicationSetScenarioHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> IndicationSetScenarioHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for IndicationSetScenarioHandler<'a> {
    fn start(&mut self, payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        let scenario = match payload.first() {
            Some(0) => Scenario::Off,
            Some(1) => Scenario::UserFrame,
            Some(2) => Scenario::ColorWheel,
            Some(3) => Scenario::RainbowFade,
            Some(4) => Scenario::BusyIndicator,
            Some(5) => Scenario::BreathingGreen,
            Some(6) => Scenario::Siren,
            Some(7) => Scenario::TrafficLight,
            Some(8) => Scenario::BugIndicator,
            _ => return (Status::ErrorCommandError, 0),
        };
        self.runtime.borrow_mut().requested_scenario = scenario;
        (Status::Ok, 0)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct IndicationSetUserFrameHandler<'a> {
    runtime: &'a RefCell<&'a mut Runtime>,
}

impl<'a> IndicationSetUserFrameHandler<'a> {
    pub fn new(runtime: &'a RefCell<&'a mut Runtime>) -> Self {
        Self { runtime }
    }
}

impl<'a> CommandHandler for IndicationSetUserFrameHandler<'a> {
    fn start(&mut self, payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        if payload.len() != board::RING_LEDS * 3 {
            return (Status::ErrorCommandError, 0);
        }
        let mut colors: ie::Pixels = [Rgb::new(0, 0, 0); board::RING_LEDS];
        for (i, color) in colors.iter_mut().enumerate() {
            let base = i * 3;
            *color = Rgb::new(payload[base], payload[base + 1], payload[base + 2]);
        }
        self.runtime.borrow_mut().ie_engine.set_user_colors(colors);
        (Status::Ok, 0)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}
