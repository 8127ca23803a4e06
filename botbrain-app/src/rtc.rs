//! `RtcGpRegisters`/`BootloaderRebootRequester` adapter over
//! `hal::rtc::Rtc`'s backup registers — the application-side counterpart
//! of the bootloader's own `rtc.rs`, used to hand control back across a
//! `RebootToBootloader` command.

use hal::rtc::Rtc;

use botbrain_core::fct::BootloaderRebootRequester;
use botbrain_core::fim::{self, RtcGpRegisters};

const ENABLE_REGISTER: u8 = 4;

pub struct McuRtcGp<'r> {
    rtc: &'r mut Rtc,
}

impl<'r> McuRtcGp<'r> {
    pub fn new(rtc: &'r mut Rtc) -> Self {
        Self { rtc }
    }
}

impl<'r> RtcGpRegisters for McuRtcGp<'r> {
    fn read_gp(&self, index: u8) -> u32 {
        self.rtc.get_backup_register(index)
    }

    fn write_gp(&mut self, index: u8, value: u32) {
        self.rtc.set_backup_register(index, value);
    }

    fn gp0_gp2_enabled(&self) -> bool {
        self.rtc.get_backup_register(ENABLE_REGISTER) != 0
    }

    fn set_gp0_gp2_enabled(&mut self, enabled: bool) {
        self.rtc.set_backup_register(ENABLE_REGISTER, enabled as u32);
    }
}

impl<'r> BootloaderRebootRequester for McuRtcGp<'r> {
    fn request_bootloader_on_next_boot(&mut self) {
        fim::request_bootloader_on_next_boot(self);
    }
}
