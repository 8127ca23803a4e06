//! Board-fixed constants: flash geometry, ring-LED indices, and the
//! hardware/bootloader version strings reported over the transport.
//!
//! Grounded on `mcu-bootloader/rrrc/flash_mapping.c`/`driver_init.h`
//! (`FLASH_HDR_OFFSET`, `FLASH_FW_OFFSET`, `FLASH_AVAILABLE`,
//! `NVMCTRL_PAGE_SIZE`, `NVMCTRL_BLOCK_SIZE`), translated onto the STM32
//! flash geometry the `h7`/`g4` feature pair (inherited from the teacher's
//! Cargo features) actually ships.

use botbrain_core::fim::FlashLayout;

/// Base address of the MCU's internal flash, memory-mapped for reads.
pub const FLASH_BASE: u32 = 0x0800_0000;

cfg_if::cfg_if! {
    if #[cfg(feature = "h7")] {
        // H7 flash erases in 128KiB sectors and programs in 32-byte flash words.
        pub const LAYOUT: FlashLayout = FlashLayout {
            header_offset: 0,
            fw_offset: 128 * 1024,
            fw_available: 7 * 128 * 1024,
            page_size: 32,
            block_size: 128 * 1024,
        };
    } else if #[cfg(feature = "g4")] {
        // G4 flash erases in 2KiB pages and programs in 8-byte double-words.
        pub const LAYOUT: FlashLayout = FlashLayout {
            header_offset: 0,
            fw_offset: 2 * 1024,
            fw_available: 63 * 2 * 1024,
            page_size: 8,
            block_size: 2 * 1024,
        };
    }
}

/// Size in bytes of the in-RAM page buffer `UpdateManager` accumulates a
/// chunk into before programming. Matches `LAYOUT.page_size`; kept as a
/// separate const since `UpdateManager` needs it at compile time.
#[cfg(feature = "h7")]
pub const PAGE_BUFFER_SIZE: usize = 32;
#[cfg(feature = "g4")]
pub const PAGE_BUFFER_SIZE: usize = 8;

pub const HARDWARE_VERSION: &str = "botbrain-2.0";
pub const BOOTLOADER_VERSION: u32 = 2;

/// Wire value `GetOperationMode` reports while resident in the bootloader.
pub const OPERATION_MODE_BOOTLOADER: u8 = 0xBB;

/// Ring-LED indices lit red to flag a boot that didn't reach the
/// application, per `mcu-bootloader/rrrc/main.c`'s startup-reason switch.
pub const LED_NO_APPLICATION: usize = 5;
pub const LED_WATCHDOG_RESET: usize = 11;
