//! Framed Command Transport: a checksum-protected request/response
//! protocol, dispatching into a fixed table of command handlers through a
//! single shared response buffer.

use crate::crc::{crc16, crc7};

pub const MAX_PAYLOAD: usize = 250;
const COMMAND_HEADER_SIZE: usize = 6;
const RESPONSE_HEADER_SIZE: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum Operation {
    Start = 0,
    Restart = 1,
    GetResult = 2,
    Cancel = 3,
}

impl Operation {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Start),
            1 => Some(Self::Restart),
            2 => Some(Self::GetResult),
            3 => Some(Self::Cancel),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Busy = 1,
    Pending = 2,
    ErrorUnknownOperation = 3,
    ErrorInvalidOperation = 4,
    ErrorCommandIntegrity = 5,
    ErrorPayloadIntegrity = 6,
    ErrorPayloadLength = 7,
    ErrorUnknownCommand = 8,
    ErrorCommandError = 9,
    ErrorInternal = 10,
}

/// A parsed, not-yet-validated command frame: `operation, command_id,
/// payload_length, payload_checksum(u16), header_checksum(u8)` followed
/// by `payload_length` bytes of payload.
///
/// `operation` is `None` for a byte the wire enum doesn't define — that's
/// still a well-formed frame for CRC purposes, so parsing keeps going
/// rather than failing outright; only `Dispatcher::handle`, once the
/// checksums are confirmed good, turns an unrecognized operation into a
/// status.
pub struct CommandFrame<'a> {
    pub operation: Option<Operation>,
    pub command_id: u8,
    pub payload: &'a [u8],
    header_checksum: u8,
    payload_checksum: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    TooShort,
    LengthMismatch,
}

impl<'a> CommandFrame<'a> {
    /// Parse a raw message into a frame. Does not validate checksums or
    /// the operation byte — that happens in `Dispatcher::handle`, which
    /// needs the raw header bytes for the CRC-7 computation and must
    /// check CRCs before an unrecognized operation is reported.
    pub fn parse(message: &'a [u8]) -> Result<Self, FrameError> {
        if message.len() < COMMAND_HEADER_SIZE {
            return Err(FrameError::TooShort);
        }
        let operation = Operation::from_u8(message[0]);
        let command_id = message[1];
        let payload_length = message[2] as usize;
        let payload_checksum = crate::bytes::get_u16(&message[3..5]);
        let header_checksum = message[5];

        if message.len() != COMMAND_HEADER_SIZE + payload_length {
            return Err(FrameError::LengthMismatch);
        }

        Ok(Self {
            operation,
            command_id,
            payload: &message[COMMAND_HEADER_SIZE..],
            header_checksum,
            payload_checksum,
        })
    }

    fn header_valid(&self, raw_header_minus_checksum: &[u8]) -> bool {
        crc7(0xFF, raw_header_minus_checksum) == self.header_checksum
    }

    fn payload_valid(&self) -> bool {
        crc16(0xFFFF, self.payload) == self.payload_checksum
    }
}

/// One slot in the command-handler table. `start` begins (or completes
/// synchronously) an operation; `get_result` is polled while `start`
/// returned `Pending`; `cancel` aborts an in-flight operation and is also
/// invoked on every handler when the table is (re)installed.
pub trait CommandHandler {
    fn start(&mut self, payload: &[u8], response: &mut [u8]) -> (Status, usize);
    fn get_result(&mut self, response: &mut [u8]) -> (Status, usize);
    fn cancel(&mut self);
}

/// Dispatches validated command frames into a fixed-size handler table
/// and fills a single shared response buffer.
pub struct Dispatcher<'h> {
    handlers: &'h mut [&'h mut dyn CommandHandler],
    last_payload_len: usize,
}

impl<'h> Dispatcher<'h> {
    /// Install a handler table, cancelling every handler first (matches
    /// re-installing a table mid-run on the original firmware).
    pub fn new(handlers: &'h mut [&'h mut dyn CommandHandler]) -> Self {
        for handler in handlers.iter_mut() {
            handler.cancel();
        }
        Self {
            handlers,
            last_payload_len: 0,
        }
    }

    /// Validate and dispatch one command frame, writing the response
    /// header + payload into `response_buf` (which must be larger than
    /// `RESPONSE_HEADER_SIZE`). Returns the total response length.
    pub fn handle(&mut self, message: &[u8], response_buf: &mut [u8]) -> usize {
        debug_assert!(response_buf.len() > RESPONSE_HEADER_SIZE);
        let payload_buf_len = (response_buf.len() - RESPONSE_HEADER_SIZE).min(MAX_PAYLOAD);

        let frame = match CommandFrame::parse(message) {
            Ok(frame) => frame,
            Err(_) => {
                self.last_payload_len = 0;
                return self.finish_response(response_buf, Status::ErrorPayloadLength);
            }
        };

        // CRC checks take priority over everything else, including an
        // unrecognized operation byte: a frame with a bad CRC and a bad
        // operation code is still reported as a CRC error.
        let header_bytes = &message[0..5];
        let status = if !frame.header_valid(header_bytes) {
            Status::ErrorCommandIntegrity
        } else if !frame.payload_valid() {
            Status::ErrorPayloadIntegrity
        } else if let Some(operation) = frame.operation {
            if frame.command_id as usize >= self.handlers.len() {
                Status::ErrorUnknownCommand
            } else {
                self.dispatch(operation, &frame, response_buf, payload_buf_len)
            }
        } else {
            Status::ErrorUnknownOperation
        };

        self.finish_response(response_buf, status)
    }

    fn dispatch(
        &mut self,
        operation: Operation,
        frame: &CommandFrame,
        response_buf: &mut [u8],
        payload_buf_len: usize,
    ) -> Status {
        let handler: &mut dyn CommandHandler = &mut *self.handlers[frame.command_id as usize];
        let payload_out = &mut response_buf[RESPONSE_HEADER_SIZE..RESPONSE_HEADER_SIZE + payload_buf_len];

        let (status, len) = match operation {
            Operation::Start => start(handler, frame.payload, payload_out),
            Operation::Restart => {
                handler.cancel();
                start(handler, frame.payload, payload_out)
            }
            Operation::GetResult => handler.get_result(payload_out),
            Operation::Cancel => {
                handler.cancel();
                (Status::Ok, 0)
            }
        };

        if len > payload_buf_len {
            self.last_payload_len = 0;
            return Status::ErrorInternal;
        }

        self.last_payload_len = len;
        status
    }

    fn finish_response(&mut self, response_buf: &mut [u8], status: Status) -> usize {
        let payload_len = if matches!(status, Status::Ok | Status::ErrorCommandError) {
            self.last_payload_len
        } else {
            0
        };

        response_buf[0] = status as u8;
        response_buf[1] = payload_len as u8;

        let checksum = crc16(0xFFFF, &response_buf[RESPONSE_HEADER_SIZE..RESPONSE_HEADER_SIZE + payload_len]);
        crate::bytes::put_u16(&mut response_buf[2..4], checksum);

        let header_checksum = crc7(0xFF, &response_buf[0..4]);
        response_buf[4] = header_checksum;

        RESPONSE_HEADER_SIZE + payload_len
    }
}

fn start(
    handler: &mut dyn CommandHandler,
    payload: &[u8],
    response: &mut [u8],
) -> (Status, usize) {
    let (status, len) = handler.start(payload, response);
    if status == Status::Pending {
        handler.get_result(response)
    } else {
        (status, len)
    }
}

/// Returns the board's hardware version string, to answer a
/// `GetHardwareVersion` request.
pub trait HardwareVersionProvider {
    fn hardware_version(&self) -> &str;
}

/// Handler for the command that reports the board's hardware revision as
/// an ASCII string.
pub struct GetHardwareVersionHandler<P: HardwareVersionProvider> {
    provider: P,
}

impl<P: HardwareVersionProvider> GetHardwareVersionHandler<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: HardwareVersionProvider> CommandHandler for GetHardwareVersionHandler<P> {
    fn start(&mut self, _payload: &[u8], response: &mut [u8]) -> (Status, usize) {
        let version = self.provider.hardware_version().as_bytes();
        if version.len() > response.len() {
            return (Status::ErrorInternal, 0);
        }
        response[..version.len()].copy_from_slice(version);
        (Status::Ok, version.len())
    }

    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }

    fn cancel(&mut self) {}
}

/// Fills an otherwise-empty slot in a command-handler table. Any command
/// ID the product doesn't define routes here and reports
/// `ErrorUnknownCommand`, matching "any hole is `UnknownCommand`".
pub struct UnknownCommandHandler;

impl CommandHandler for UnknownCommandHandler {
    fn start(&mut self, _payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorUnknownCommand, 0)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorUnknownCommand, 0)
    }
    fn cancel(&mut self) {}
}

/// Sets the RTC hand-off registers that make the next boot enter the
/// bootloader, without resetting immediately. The actual `NVIC_SystemReset`
/// call happens in the application's main loop once the response carrying
/// this command's acknowledgement has been sent.
pub trait BootloaderRebootRequester {
    fn request_bootloader_on_next_boot(&mut self);
}

pub struct RebootToBootloaderHandler<R: BootloaderRebootRequester> {
    requester: R,
    pending: bool,
}

impl<R: BootloaderRebootRequester> RebootToBootloaderHandler<R> {
    pub fn new(requester: R) -> Self {
        Self {
            requester,
            pending: false,
        }
    }

    /// Polled by the main loop after the response for this command has
    /// been transmitted. Returns true (once) when the reset should fire.
    pub fn take_pending_reset(&mut self) -> bool {
        core::mem::replace(&mut self.pending, false)
    }
}

impl<R: BootloaderRebootRequester> CommandHandler for RebootToBootloaderHandler<R> {
    fn start(&mut self, _payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        self.requester.request_bootloader_on_next_boot();
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

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        cancelled: bool,
    }

    impl CommandHandler for Echo {
        fn start(&mut self, payload: &[u8], response: &mut [u8]) -> (Status, usize) {
            response[..payload.len()].copy_from_slice(payload);
            (Status::Ok, payload.len())
        }
        fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
            (Status::ErrorInternal, 0)
        }
        fn cancel(&mut self) {
            self.cancelled = true;
        }
    }

    struct Pending {
        polls: u32,
    }

    impl CommandHandler for Pending {
        fn start(&mut self, _payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
            (Status::Pending, 0)
        }
        fn get_result(&mut self, response: &mut [u8]) -> (Status, usize) {
            self.polls += 1;
            response[0] = 42;
            (Status::Ok, 1)
        }
        fn cancel(&mut self) {}
    }

    fn build_command(operation: Operation, command_id: u8, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut msg = std::vec![0u8; COMMAND_HEADER_SIZE + payload.len()];
        msg[0] = operation as u8;
        msg[1] = command_id;
        msg[2] = payload.len() as u8;
        let checksum = crc16(0xFFFF, payload);
        crate::bytes::put_u16(&mut msg[3..5], checksum);
        msg[5] = crc7(0xFF, &msg[0..5]);
        msg[COMMAND_HEADER_SIZE..].copy_from_slice(payload);
        msg
    }

    #[test]
    fn start_echoes_payload_back() {
        let mut echo = Echo { cancelled: false };
        let mut handlers: [&mut dyn CommandHandler; 1] = [&mut echo];
        let mut dispatcher = Dispatcher::new(&mut handlers);

        let cmd = build_command(Operation::Start, 0, &[1, 2, 3]);
        let mut response = [0u8; 64];
        let len = dispatcher.handle(&cmd, &mut response);

        assert_eq!(response[0], Status::Ok as u8);
        assert_eq!(response[1], 3);
        assert_eq!(&response[RESPONSE_HEADER_SIZE..len], &[1, 2, 3]);
    }

    #[test]
    fn pending_status_triggers_immediate_get_result() {
        let mut pending = Pending { polls: 0 };
        let mut handlers: [&mut dyn CommandHandler; 1] = [&mut pending];
        let mut dispatcher = Dispatcher::new(&mut handlers);

        let cmd = build_command(Operation::Start, 0, &[]);
        let mut response = [0u8; 64];
        dispatcher.handle(&cmd, &mut response);

        assert_eq!(response[0], Status::Ok as u8);
        assert_eq!(response[RESPONSE_HEADER_SIZE], 42);
    }

    #[test]
    fn bad_header_checksum_is_rejected() {
        let mut echo = Echo { cancelled: false };
        let mut handlers: [&mut dyn CommandHandler; 1] = [&mut echo];
        let mut dispatcher = Dispatcher::new(&mut handlers);

        let mut cmd = build_command(Operation::Start, 0, &[9]);
        cmd[5] ^= 0xFF;
        let mut response = [0u8; 64];
        dispatcher.handle(&cmd, &mut response);

        assert_eq!(response[0], Status::ErrorCommandIntegrity as u8);
        assert_eq!(response[1], 0);
    }

    #[test]
    fn unknown_command_id_is_rejected() {
        let mut echo = Echo { cancelled: false };
        let mut handlers: [&mut dyn CommandHandler; 1] = [&mut echo];
        let mut dispatcher = Dispatcher::new(&mut handlers);

        let cmd = build_command(Operation::Start, 5, &[]);
        let mut response = [0u8; 64];
        dispatcher.handle(&cmd, &mut response);

        assert_eq!(response[0], Status::ErrorUnknownCommand as u8);
    }

    /// Builds a frame with valid CRCs but a raw operation byte the wire
    /// enum doesn't define, so the unknown-operation path is reachable
    /// without a checksum failure getting there first.
    fn build_command_raw_operation(raw_operation: u8, command_id: u8, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut msg = std::vec![0u8; COMMAND_HEADER_SIZE + payload.len()];
        msg[0] = raw_operation;
        msg[1] = command_id;
        msg[2] = payload.len() as u8;
        let checksum = crc16(0xFFFF, payload);
        crate::bytes::put_u16(&mut msg[3..5], checksum);
        msg[5] = crc7(0xFF, &msg[0..5]);
        msg[COMMAND_HEADER_SIZE..].copy_from_slice(payload);
        msg
    }

    #[test]
    fn unrecognized_operation_byte_is_rejected_with_its_own_status() {
        let mut echo = Echo { cancelled: false };
        let mut handlers: [&mut dyn CommandHandler; 1] = [&mut echo];
        let mut dispatcher = Dispatcher::new(&mut handlers);

        let cmd = build_command_raw_operation(4, 0, &[]);
        let mut response = [0u8; 64];
        dispatcher.handle(&cmd, &mut response);

        assert_eq!(response[0], Status::ErrorUnknownOperation as u8);
        assert_eq!(response[1], 0);
    }

    #[test]
    fn bad_header_checksum_takes_priority_over_unrecognized_operation() {
        let mut echo = Echo { cancelled: false };
        let mut handlers: [&mut dyn CommandHandler; 1] = [&mut echo];
        let mut dispatcher = Dispatcher::new(&mut handlers);

        let mut cmd = build_command_raw_operation(4, 0, &[]);
        cmd[5] ^= 0xFF;
        let mut response = [0u8; 64];
        dispatcher.handle(&cmd, &mut response);

        assert_eq!(response[0], Status::ErrorCommandIntegrity as u8);
    }

    struct Overflowing;
    impl CommandHandler for Overflowing {
        fn start(&mut self, _payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
            (Status::Ok, 9999)
        }
        fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
            (Status::ErrorInternal, 0)
        }
        fn cancel(&mut self) {}
    }

    #[test]
    fn handler_overflow_is_rewritten_to_internal_error() {
        let mut overflowing = Overflowing;
        let mut handlers: [&mut dyn CommandHandler; 1] = [&mut overflowing];
        let mut dispatcher = Dispatcher::new(&mut handlers);

        let cmd = build_command(Operation::Start, 0, &[]);
        let mut response = [0u8; 64];
        dispatcher.handle(&cmd, &mut response);

        assert_eq!(response[0], Status::ErrorInternal as u8);
        assert_eq!(response[1], 0);
    }

    #[test]
    fn cancel_calls_handler_on_install_and_on_operation() {
        let mut echo = Echo { cancelled: false };
        {
            let mut handlers: [&mut dyn CommandHandler; 1] = [&mut echo];
            let _dispatcher = Dispatcher::new(&mut handlers);
        }
        assert!(echo.cancelled);
    }

    struct FixedVersion;
    impl HardwareVersionProvider for FixedVersion {
        fn hardware_version(&self) -> &str {
            "2.0.0"
        }
    }

    #[test]
    fn get_hardware_version_returns_ascii_string() {
        let mut handler = GetHardwareVersionHandler::new(FixedVersion);
        let mut response = [0u8; 16];
        let (status, len) = handler.start(&[], &mut response);
        assert_eq!(status, Status::Ok);
        assert_eq!(&response[..len], b"2.0.0");
    }

    struct RequestLog {
        requested: bool,
    }
    impl BootloaderRebootRequester for &mut RequestLog {
        fn request_bootloader_on_next_boot(&mut self) {
            self.requested = true;
        }
    }

    #[test]
    fn reboot_to_bootloader_sets_pending_after_start() {
        let mut log = RequestLog { requested: false };
        let mut handler = RebootToBootloaderHandler::new(&mut log);
        let mut response = [0u8; 4];
        let (status, len) = handler.start(&[], &mut response);
        assert_eq!(status, Status::Ok);
        assert_eq!(len, 0);
        assert!(log.requested);
        assert!(handler.take_pending_reset());
        assert!(!handler.take_pending_reset());
    }

    #[test]
    fn reboot_to_bootloader_cancel_clears_pending() {
        let mut log = RequestLog { requested: false };
        let mut handler = RebootToBootloaderHandler::new(&mut log);
        let mut response = [0u8; 4];
        handler.start(&[], &mut response);
        handler.cancel();
        assert!(!handler.take_pending_reset());
    }
}
