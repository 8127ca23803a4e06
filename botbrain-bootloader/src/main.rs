//! Bootloader entry point: decide whether the installed application is
//! trustworthy and jump to it, or else stay resident and serve the update
//! command table over UART until the host finalizes a new image.
//!
//! Boot decision and jump sequence are grounded on
//! `mcu-bootloader/rrrc/main.c`; the jump itself follows the inline-asm
//! pattern from `crispy-bootloader`'s `boot.rs`.

#![no_main]
#![no_std]

use cfg_if::cfg_if;
use cortex_m_rt::entry;

use hal::{
    clocks::Clocks,
    flash::Flash,
    gpio::{Pin, PinMode, Port},
    pac,
    rtc::Rtc,
    spi::{BaudRate, Spi},
    usart::Usart,
};

use defmt_rtt as _;
use panic_probe as _;

mod board;
mod commands;
mod flash;
mod led;
mod rtc;

use botbrain_core::fct::{
    CommandHandler, Dispatcher, GetHardwareVersionHandler, HardwareVersionProvider,
    UnknownCommandHandler,
};
use botbrain_core::fim::{self, StartupReason};
use core::cell::RefCell;

struct HwVersion;

impl HardwareVersionProvider for HwVersion {
    fn hardware_version(&self) -> &str {
        board::HARDWARE_VERSION
    }
}

/// Number of command-table slots; the highest command ID the transport
/// defines (`FinalizeUpdate`, 0x0A) plus one.
const HANDLER_COUNT: usize = 0x0B;
const RESPONSE_BUF_LEN: usize = 256;

#[entry]
fn main() -> ! {
    let _cp = cortex_m::Peripherals::take().unwrap();
    let dp = pac::Peripherals::take().unwrap();

    let clock_cfg = Clocks::default();
    clock_cfg.setup().unwrap();

    defmt::println!("botbrain bootloader starting, version {}", board::BOOTLOADER_VERSION);

    let reset_cause = rtc::take_reset_cause(&dp.RCC);
    let mut rtc_periph = Rtc::new(dp.RTC, Default::default());
    let mut flash_periph = Flash::new(dp.FLASH);

    let startup_reason = {
        let mut rtc_gp = rtc::McuRtcGp::new(&mut rtc_periph);
        fim::check_bootloader_mode_request(&mut rtc_gp, reset_cause.watchdog, reset_cause.brown_out)
    };

    match startup_reason {
        StartupReason::PowerUp => defmt::info!("startup reason: power up"),
        StartupReason::BrownOutReset => defmt::info!("startup reason: brown-out event"),
        StartupReason::WatchdogReset => defmt::warn!("startup reason: watchdog reset"),
        StartupReason::BootloaderRequest => defmt::info!("startup reason: bootloader mode requested"),
    }

    let mut application_valid = false;
    if fim::should_attempt_boot(startup_reason) {
        let mcu_flash = flash::McuFlash::new(&mut flash_periph);
        let mut header_bytes = [0u8; fim::HEADER_SIZE];
        mcu_flash.read(board::LAYOUT.header_offset, &mut header_bytes);

        if fim::ApplicationHeader::is_empty(&header_bytes) {
            defmt::warn!("no application installed");
        } else {
            let header = fim::ApplicationHeader::from_bytes(&header_bytes);
            if fim::check_target_firmware(&mcu_flash, board::LAYOUT, header, None) {
                application_valid = true;
            } else {
                defmt::warn!("installed application failed CRC check");
            }
        }
    }

    if application_valid {
        defmt::info!("jumping to application");
        unsafe { jump_to_application(board::FLASH_BASE + board::LAYOUT.fw_offset) }
    }

    defmt::info!("entered bootloader mode");

    // Pins for the host UART and the ring-LED SPI link.
    let _uart_tx = Pin::new(Port::D, 0, PinMode::Alt(0));
    let _uart_rx = Pin::new(Port::D, 1, PinMode::Alt(0));
    let _led_sck = Pin::new(Port::B, 13, PinMode::Alt(5));
    let _led_miso = Pin::new(Port::B, 14, PinMode::Alt(5));
    let _led_mosi = Pin::new(Port::B, 15, PinMode::Alt(5));

    let mut uart = Usart::new(dp.USART1, 115_200, Default::default(), &clock_cfg);
    let led_spi = Spi::new(dp.SPI2, Default::default(), BaudRate::Div32);
    let mut led_strip = ws2812_spi::Ws2812::new(led_spi);

    let boot_indication = led::boot_indication(
        !application_valid,
        startup_reason == StartupReason::WatchdogReset,
    );

    let mcu_flash = flash::McuFlash::new(&mut flash_periph);
    let update_state = RefCell::new(commands::UpdateState::new(mcu_flash));

    let mut hw_version_handler = GetHardwareVersionHandler::new(HwVersion);
    // `UnknownCommandHandler` is a stateless unit struct, but each reserved
    // slot still needs its own instance: `&mut dyn CommandHandler` isn't
    // `Copy`, so the same local can't fill more than one array element.
    let mut unknown_0 = UnknownCommandHandler;
    let mut unknown_2 = UnknownCommandHandler;
    let mut unknown_3 = UnknownCommandHandler;
    let mut unknown_4 = UnknownCommandHandler;
    let mut unknown_5 = UnknownCommandHandler;
    let mut op_mode_handler = commands::GetOperationModeHandler;
    let mut read_crc_handler = commands::ReadApplicationCrcHandler::new(&update_state);
    let mut init_handler = commands::InitializeUpdateHandler::new(&update_state);
    let mut program_handler = commands::ProgramApplicationHandler::new(&update_state);
    let mut finalize_handler = commands::FinalizeUpdateHandler::new(&update_state);

    let mut handlers: [&mut dyn CommandHandler; HANDLER_COUNT] = [
        &mut unknown_0,           // 0x00
        &mut hw_version_handler,  // 0x01 GetHardwareVersion
        &mut unknown_2,           // 0x02
        &mut unknown_3,           // 0x03
        &mut unknown_4,           // 0x04
        &mut unknown_5,           // 0x05
        &mut op_mode_handler,     // 0x06 GetOperationMode
        &mut read_crc_handler,    // 0x07 ReadApplicationCrc
        &mut init_handler,        // 0x08 InitializeUpdate
        &mut program_handler,     // 0x09 ProgramApplication
        &mut finalize_handler,    // 0x0A FinalizeUpdate
    ];
    let mut dispatcher = Dispatcher::new(&mut handlers);

    let mut request_buf = [0u8; botbrain_core::fct::MAX_PAYLOAD + 6];
    let mut response_buf = [0u8; RESPONSE_BUF_LEN];

    loop {
        if let Some(len) = read_frame(&mut uart, &mut request_buf) {
            let response_len = dispatcher.handle(&request_buf[..len], &mut response_buf);
            for &byte in &response_buf[..response_len] {
                let _ = nb::block!(uart.write(byte));
            }

            if finalize_handler.take_pending_reset() {
                defmt::info!("resetting into newly installed application");
                cortex_m::peripheral::SCB::sys_reset();
            }
        }

        led::render(&mut led_strip, &boot_indication);
    }
}

/// Reads one command frame (6-byte header, then `header[2]` payload
/// bytes) off the UART into `buf`. Returns `None` if no byte is pending,
/// so the caller can interleave LED updates between frames.
fn read_frame(uart: &mut Usart<pac::USART1>, buf: &mut [u8]) -> Option<usize> {
    let first = match uart.read() {
        Ok(byte) => byte,
        Err(nb::Error::WouldBlock) => return None,
        Err(nb::Error::Other(_)) => return None,
    };
    buf[0] = first;

    for slot in buf.iter_mut().take(6).skip(1) {
        *slot = nb::block!(uart.read()).ok()?;
    }

    let payload_length = buf[2] as usize;
    let total = 6 + payload_length;
    for slot in buf.iter_mut().take(total).skip(6) {
        *slot = nb::block!(uart.read()).ok()?;
    }

    Some(total)
}

/// Transfers control to the application at `base`: the first word is the
/// initial stack pointer, the second the reset vector, matching the
/// Cortex-M vector table layout the linker places at `FW_OFFSET`. Arms
/// the independent watchdog first, so a hung application resets back into
/// the bootloader rather than hanging forever — this is the single jump
/// site, so it's the only place that needs to do so.
unsafe fn jump_to_application(base: u32) -> ! {
    let vector_table = base as *const u32;
    let initial_sp = core::ptr::read_volatile(vector_table);
    let reset_vector = core::ptr::read_volatile(vector_table.add(1));

    cortex_m::interrupt::disable();
    arm_independent_watchdog();

    core::arch::asm!(
        "msr msp, {sp}",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn),
    );
}

/// Starts the independent watchdog with a short timeout (`PER=0x07`, a
/// few hundred ms at the IWDG's ~32kHz LSI clock) so a hung main loop in
/// the application resets the MCU rather than wedging it, matching the
/// host-watchdog timeout named in the concurrency model. `IWDG` has no
/// disable once started, which is the point: only the application (which
/// must now pet it) can stop a reset from eventually happening.
unsafe fn arm_independent_watchdog() {
    let iwdg = &*pac::IWDG::ptr();
    iwdg.kr.write(|w| w.key().bits(0x5555));
    iwdg.pr.write(|w| w.pr().bits(0x07));
    while iwdg.sr.read().pvu().bit_is_set() {}
    iwdg.kr.write(|w| w.key().bits(0xCCCC));
}
