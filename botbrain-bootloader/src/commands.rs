//! Bootloader command table: the six IDs of spec.md §6 plus the shared
//! update-manager state they all operate on.
//!
//! Grounded on `mcu-bootloader/rrrc/main.c`'s `CommHandlers_*` callbacks
//! and `UpdateManager.c`. A single `RefCell`-shared `UpdateState` backs
//! every handler that touches flash; safe because the bootloader's main
//! loop is single-threaded (no ISR ever reaches these handlers).

use core::cell::RefCell;

use botbrain_core::bytes::{get_u32, put_u32};
use botbrain_core::fct::{CommandHandler, Status};
use botbrain_core::fim::{self, ApplicationHeader, FimError, UpdateManager};

use crate::board;
use crate::flash::McuFlash;

pub struct UpdateState<'f> {
    pub manager: UpdateManager<{ board::PAGE_BUFFER_SIZE }>,
    pub flash: McuFlash<'f>,
}

impl<'f> UpdateState<'f> {
    pub fn new(flash: McuFlash<'f>) -> Self {
        Self {
            manager: UpdateManager::new(),
            flash,
        }
    }
}

pub struct GetOperationModeHandler;

impl CommandHandler for GetOperationModeHandler {
    fn start(&mut self, _payload: &[u8], response: &mut [u8]) -> (Status, usize) {
        response[0] = board::OPERATION_MODE_BOOTLOADER;
        (Status::Ok, 1)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct ReadApplicationCrcHandler<'a, 'f> {
    state: &'a RefCell<UpdateState<'f>>,
}

impl<'a, 'f> ReadApplicationCrcHandler<'a, 'f> {
    pub fn new(state: &'a RefCell<UpdateState<'f>>) -> Self {
        Self { state }
    }
}

impl<'a, 'f> CommandHandler for ReadApplicationCrcHandler<'a, 'f> {
    fn start(&mut self, _payload: &[u8], response: &mut [u8]) -> (Status, usize) {
        let state = self.state.borrow();
        let mut header_bytes = [0u8; fim::HEADER_SIZE];
        state.flash.read(board::LAYOUT.header_offset, &mut header_bytes);
        let header = ApplicationHeader::from_bytes(&header_bytes);
        put_u32(response, header.target_checksum);
        (Status::Ok, 4)
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct InitializeUpdateHandler<'a, 'f> {
    state: &'a RefCell<UpdateState<'f>>,
}

impl<'a, 'f> InitializeUpdateHandler<'a, 'f> {
    pub fn new(state: &'a RefCell<UpdateState<'f>>) -> Self {
        Self { state }
    }
}

impl<'a, 'f> CommandHandler for InitializeUpdateHandler<'a, 'f> {
    fn start(&mut self, payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        if payload.len() != 8 {
            return (Status::ErrorCommandError, 0);
        }
        let size = get_u32(&payload[0..4]);
        let crc = get_u32(&payload[4..8]);

        let mut state = self.state.borrow_mut();
        let UpdateState { manager, flash } = &mut *state;
        match manager.initialize_update(flash, board::LAYOUT, size, crc) {
            Ok(()) => {
                defmt::info!("update initialized: size={} crc={:08x}", size, crc);
                (Status::Ok, 0)
            }
            Err(FimError::TooLarge) => {
                defmt::warn!("update rejected: {} exceeds flash region", size);
                (Status::ErrorCommandError, 0)
            }
            Err(_) => (Status::ErrorCommandError, 0),
        }
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {}
}

pub struct ProgramApplicationHandler<'a, 'f> {
    state: &'a RefCell<UpdateState<'f>>,
}

impl<'a, 'f> ProgramApplicationHandler<'a, 'f> {
    pub fn new(state: &'a RefCell<UpdateState<'f>>) -> Self {
        Self { state }
    }
}

impl<'a, 'f> CommandHandler for ProgramApplicationHandler<'a, 'f> {
    fn start(&mut self, payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        let mut state = self.state.borrow_mut();
        let UpdateState { manager, flash } = &mut *state;
        match manager.program(flash, payload) {
            Ok(progress) => {
                crate::led::set_update_progress(progress);
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

pub struct FinalizeUpdateHandler<'a, 'f> {
    state: &'a RefCell<UpdateState<'f>>,
    pending_reset: bool,
}

impl<'a, 'f> FinalizeUpdateHandler<'a, 'f> {
    pub fn new(state: &'a RefCell<UpdateState<'f>>) -> Self {
        Self {
            state,
            pending_reset: false,
        }
    }

    /// Polled by the main loop once the response for this command has
    /// gone out, matching
    /// `MasterCommunicationInterface_Bootloader_RaiseEvent_OnTransmissionComplete`'s
    /// post-response `NVIC_SystemReset`.
    pub fn take_pending_reset(&mut self) -> bool {
        core::mem::replace(&mut self.pending_reset, false)
    }
}

impl<'a, 'f> CommandHandler for FinalizeUpdateHandler<'a, 'f> {
    fn start(&mut self, _payload: &[u8], _response: &mut [u8]) -> (Status, usize) {
        let mut state = self.state.borrow_mut();
        let UpdateState { manager, flash } = &mut *state;
        match manager.finalize(flash, board::LAYOUT) {
            Ok(()) => {
                defmt::info!("update finalized successfully, resetting");
                self.pending_reset = true;
                (Status::Ok, 0)
            }
            Err(e) => {
                defmt::warn!("update finalize failed: {}", e);
                (Status::ErrorCommandError, 0)
            }
        }
    }
    fn get_result(&mut self, _response: &mut [u8]) -> (Status, usize) {
        (Status::ErrorInvalidOperation, 0)
    }
    fn cancel(&mut self) {
        self.pending_reset = false;
    }
}
