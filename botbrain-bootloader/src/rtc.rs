//! `RtcGpRegisters` adapter over `hal::rtc::Rtc`'s backup registers,
//! standing in for the SAM D5x RTC GP0..GP3 registers
//! `mcu-bootloader/rrrc/flash_mapping.c::FMP_CheckBootloaderModeRequest`
//! reads. STM32's RTC backup registers (`BKP0R..BKP3R`) survive a reset
//! the same way, so GP0/GP2-enable is modeled as a single software flag
//! kept in `BKP4R` rather than two always-on RTC control bits the STM32
//! RTC doesn't expose per-register.

use hal::rtc::Rtc;

use botbrain_core::fim::RtcGpRegisters;

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

/// Reset-cause bits latched in `RCC_RSR`/`RCC_CSR`, read once at startup
/// and cleared so the next reset's cause isn't conflated with this one.
pub struct ResetCause {
    pub watchdog: bool,
    pub brown_out: bool,
}

pub fn take_reset_cause(rcc: &hal::pac::RCC) -> ResetCause {
    cfg_if::cfg_if! {
        if #[cfg(feature = "h7")] {
            let sr = rcc.rsr.read();
            let cause = ResetCause {
                watchdog: sr.iwdg1rstf().bit_is_set() || sr.wwdg1rstf().bit_is_set(),
                brown_out: sr.borrstf().bit_is_set(),
            };
            rcc.rsr.modify(|_, w| w.rmvf().set_bit());
        } else if #[cfg(feature = "g4")] {
            let sr = rcc.csr.read();
            let cause = ResetCause {
                watchdog: sr.iwdgrstf().bit_is_set() || sr.wwdgrstf().bit_is_set(),
                brown_out: sr.borrstf().bit_is_set(),
            };
            rcc.csr.modify(|_, w| w.rmvf().set_bit());
        }
    }
    cause
}
