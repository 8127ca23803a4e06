//! Firmware Image Manager: the bootloader's view of the flash-resident
//! application header and the over-the-wire update state machine.

use crate::bytes::{get_u32, put_u32};
use crate::crc::crc32;

/// The fixed 16-byte descriptor the bootloader and application both read,
/// stored in its own erase block ahead of the application region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct ApplicationHeader {
    pub bootloader_version: u32,
    pub hw_version: u32,
    pub target_checksum: u32,
    pub target_length: u32,
}

pub const HEADER_SIZE: usize = 16;

impl ApplicationHeader {
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        put_u32(&mut buf[0..4], self.bootloader_version);
        put_u32(&mut buf[4..8], self.hw_version);
        put_u32(&mut buf[8..12], self.target_checksum);
        put_u32(&mut buf[12..16], self.target_length);
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            bootloader_version: get_u32(&buf[0..4]),
            hw_version: get_u32(&buf[4..8]),
            target_checksum: get_u32(&buf[8..12]),
            target_length: get_u32(&buf[12..16]),
        }
    }

    /// True for an unwritten (all-0xFF) flash block.
    pub fn is_empty(buf: &[u8; HEADER_SIZE]) -> bool {
        buf.iter().all(|&b| b == 0xFF)
    }
}

/// Why the MCU came out of reset, ordered by the priority the boot
/// decision checks them in (watchdog first, then brown-out, then the
/// RTC-register bootloader-mode handoff, else plain power-up).
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum StartupReason {
    PowerUp,
    WatchdogReset,
    BrownOutReset,
    BootloaderRequest,
}

/// The four RTC general-purpose registers used to hand a "stay in the
/// bootloader" request across a reset. Set to all-`0xFFFF_FFFF` plus the
/// GP0/GP2 enable control bits to request bootloader mode; the bootloader
/// clears both the data and the enable bits once it has observed the
/// request so a later reset boots normally again.
pub trait RtcGpRegisters {
    fn read_gp(&self, index: u8) -> u32;
    fn write_gp(&mut self, index: u8, value: u32);
    fn gp0_gp2_enabled(&self) -> bool;
    fn set_gp0_gp2_enabled(&mut self, enabled: bool);
}

const BOOTLOADER_REQUEST_MAGIC: u32 = 0xFFFF_FFFF;

/// Consult the RTC GP registers for a bootloader-mode request, consuming
/// it (clearing registers and the enable bits) if found. Watchdog and
/// brown-out reset causes are checked by the caller and take priority
/// over this; they're passed in as `wdt_reset`/`bod_reset`.
pub fn check_bootloader_mode_request(
    rtc: &mut dyn RtcGpRegisters,
    wdt_reset: bool,
    bod_reset: bool,
) -> StartupReason {
    if wdt_reset {
        return StartupReason::WatchdogReset;
    }
    if bod_reset {
        return StartupReason::BrownOutReset;
    }
    if !rtc.gp0_gp2_enabled() {
        return StartupReason::PowerUp;
    }

    let all = rtc.read_gp(0) & rtc.read_gp(1) & rtc.read_gp(2) & rtc.read_gp(3);
    if all == BOOTLOADER_REQUEST_MAGIC {
        for i in 0..4 {
            rtc.write_gp(i, 0);
        }
        rtc.set_gp0_gp2_enabled(false);
        StartupReason::BootloaderRequest
    } else {
        StartupReason::PowerUp
    }
}

/// Request the application hand control back to the bootloader on next
/// boot: sets the RTC GP handoff registers then the caller issues a
/// system reset.
pub fn request_bootloader_on_next_boot(rtc: &mut dyn RtcGpRegisters) {
    rtc.set_gp0_gp2_enabled(true);
    for i in 0..4 {
        rtc.write_gp(i, BOOTLOADER_REQUEST_MAGIC);
    }
}

/// Whether the boot decision should attempt to launch the application:
/// true for a plain power-up or a brown-out reset (the two are treated
/// identically here even though logging at the call site still names
/// them separately), false for a watchdog reset or an explicit
/// bootloader-mode request.
pub fn should_attempt_boot(reason: StartupReason) -> bool {
    matches!(reason, StartupReason::PowerUp | StartupReason::BrownOutReset)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum FimError {
    /// The stored/declared image is too large for the application region.
    TooLarge,
    /// `finalize()` was reached with a byte count that doesn't match what
    /// was declared at `initialize_update()`.
    LengthMismatch,
    /// Header or computed CRC does not match the expected checksum.
    ChecksumMismatch,
    /// An operation that requires an active update was called without one.
    NotInitialized,
}

/// Erase-block/program-page geometry and region offsets for one board.
#[derive(Clone, Copy)]
pub struct FlashLayout {
    pub header_offset: u32,
    pub fw_offset: u32,
    pub fw_available: u32,
    pub page_size: u32,
    pub block_size: u32,
}

/// The flash operations the FIM needs; implemented by the bootloader
/// binary against real NVMCTRL calls.
pub trait FlashDevice {
    type Error;
    fn erase(&mut self, offset: u32, len: u32) -> Result<(), Self::Error>;
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn read(&self, offset: u32, buf: &mut [u8]);
}

/// Reads the application region through `flash` to check whether it's a
/// valid, checksummed image. `expected_crc`, if given, must also match
/// the header's stored checksum (used right after a fresh update, before
/// trusting the header's own claim).
pub fn check_target_firmware<F: FlashDevice>(
    flash: &F,
    layout: FlashLayout,
    header: ApplicationHeader,
    expected_crc: Option<u32>,
) -> bool {
    if header.target_length > layout.fw_available {
        return false;
    }
    if let Some(expected) = expected_crc {
        if header.target_checksum != expected {
            return false;
        }
    }

    let mut computed = 0xFFFF_FFFFu32;
    let mut remaining = header.target_length;
    let mut offset = layout.fw_offset;
    let mut chunk = [0u8; 256];
    while remaining > 0 {
        let take = remaining.min(chunk.len() as u32) as usize;
        flash.read(offset, &mut chunk[..take]);
        computed = crate::crc::crc32_update(computed, &chunk[..take]);
        offset += take as u32;
        remaining -= take as u32;
    }
    computed ^= 0xFFFF_FFFF;

    computed == header.target_checksum
}

/// True if every word in `[offset, offset+len)` reads back as `0xFFFF_FFFF`.
pub fn is_region_empty<F: FlashDevice>(flash: &F, offset: u32, len: u32) -> bool {
    let mut remaining = len;
    let mut addr = offset;
    let mut chunk = [0u8; 256];
    while remaining > 0 {
        let take = remaining.min(chunk.len() as u32) as usize;
        flash.read(addr, &mut chunk[..take]);
        if chunk[..take].iter().any(|&b| b != 0xFF) {
            return false;
        }
        addr += take as u32;
        remaining -= take as u32;
    }
    true
}

/// Streaming over-the-wire firmware installer. One instance lives for the
/// duration of a single update; a reset mid-update simply abandons it,
/// leaving the application region erased (no dual-slot recovery, no
/// resumption, per design).
pub struct UpdateManager<const PAGE_SIZE: usize> {
    expected_crc: u32,
    total_length: u32,
    current_crc: u32,
    current_length: u32,
    page: [u8; PAGE_SIZE],
    page_fill: usize,
    write_cursor: u32,
    initialized: bool,
}

impl<const PAGE_SIZE: usize> UpdateManager<PAGE_SIZE> {
    pub const fn new() -> Self {
        Self {
            expected_crc: 0,
            total_length: 0,
            current_crc: 0xFFFF_FFFF,
            current_length: 0,
            page: [0u8; PAGE_SIZE],
            page_fill: 0,
            write_cursor: 0,
            initialized: false,
        }
    }

    pub fn check_image_fits(layout: FlashLayout, size: u32) -> bool {
        size <= layout.fw_available
    }

    /// Erase the application region, write a fresh header declaring the
    /// incoming image's size/CRC, and reset the streaming state.
    pub fn initialize_update<F: FlashDevice>(
        &mut self,
        flash: &mut F,
        layout: FlashLayout,
        size: u32,
        checksum: u32,
    ) -> Result<(), FimError> {
        if !Self::check_image_fits(layout, size) {
            return Err(FimError::TooLarge);
        }

        self.initialized = true;
        self.expected_crc = checksum;
        self.total_length = size;
        self.current_crc = 0xFFFF_FFFF;
        self.current_length = 0;
        self.page_fill = 0;

        let header = ApplicationHeader {
            bootloader_version: 0,
            hw_version: 0,
            target_checksum: checksum,
            target_length: size,
        };
        self.update_application_header(flash, layout, header)
            .map_err(|_| FimError::TooLarge)?;

        flash
            .erase(layout.fw_offset, layout.fw_available)
            .map_err(|_| FimError::TooLarge)?;
        self.write_cursor = layout.fw_offset;

        Ok(())
    }

    fn flush<F: FlashDevice>(&mut self, flash: &mut F) -> Result<(), F::Error> {
        if self.page_fill > 0 {
            flash.program(self.write_cursor, &self.page[..self.page_fill])?;
            self.write_cursor += self.page_fill as u32;
            self.page_fill = 0;
        }
        Ok(())
    }

    /// Erase and rewrite just the header block (used both for a fresh
    /// update and for the debug-only "fix a corrupt header" escape hatch
    /// callers may wire up separately).
    pub fn update_application_header<F: FlashDevice>(
        &mut self,
        flash: &mut F,
        layout: FlashLayout,
        header: ApplicationHeader,
    ) -> Result<(), F::Error> {
        flash.erase(layout.header_offset, layout.block_size)?;
        flash.program(layout.header_offset, &header.to_bytes())?;
        Ok(())
    }

    /// Append `data` to the page buffer, flushing full pages to flash as
    /// they fill. Returns the update progress mapped to `[0, 255]`.
    pub fn program<F: FlashDevice>(
        &mut self,
        flash: &mut F,
        data: &[u8],
    ) -> Result<u8, FimError> {
        if !self.initialized {
            return Err(FimError::NotInitialized);
        }

        self.current_crc = crc32_update(self.current_crc, data);
        self.current_length += data.len() as u32;

        for &byte in data {
            self.page[self.page_fill] = byte;
            self.page_fill += 1;
            if self.page_fill == PAGE_SIZE {
                self.flush(flash).map_err(|_| FimError::TooLarge)?;
            }
        }

        Ok(crate::interpolate::map_constrained(
            self.current_length as f32,
            0.0,
            self.total_length as f32,
            0.0,
            255.0,
        )
        .round() as u8)
    }

    /// Flush any partial page, verify the received length and CRC, and
    /// report whether the image installed is valid. On success the caller
    /// resets the MCU so the boot decision takes effect; on failure it
    /// reports `CommandError` to the host and leaves the application
    /// region as-is, so the next boot stays in the bootloader.
    pub fn finalize<F: FlashDevice>(
        &mut self,
        flash: &mut F,
        layout: FlashLayout,
    ) -> Result<(), FimError> {
        if !self.initialized {
            return Ok(());
        }

        self.flush(flash).map_err(|_| FimError::TooLarge)?;

        if self.current_length != self.total_length {
            return Err(FimError::LengthMismatch);
        }

        let header = ApplicationHeader {
            bootloader_version: 0,
            hw_version: 0,
            target_checksum: self.expected_crc,
            target_length: self.total_length,
        };
        if !check_target_firmware(flash, layout, header, Some(self.expected_crc)) {
            return Err(FimError::ChecksumMismatch);
        }

        Ok(())
    }
}

fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    crate::crc::crc32_update(crc, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeFlash {
        mem: RefCell<std::vec::Vec<u8>>,
    }

    impl FakeFlash {
        fn new(size: usize) -> Self {
            Self {
                mem: RefCell::new(std::vec![0xFFu8; size]),
            }
        }
    }

    impl FlashDevice for FakeFlash {
        type Error = ();

        fn erase(&mut self, offset: u32, len: u32) -> Result<(), ()> {
            let mem = self.mem.get_mut();
            for b in &mut mem[offset as usize..(offset + len) as usize] {
                *b = 0xFF;
            }
            Ok(())
        }

        fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), ()> {
            let mem = self.mem.get_mut();
            mem[offset as usize..offset as usize + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn read(&self, offset: u32, buf: &mut [u8]) {
            let mem = self.mem.borrow();
            buf.copy_from_slice(&mem[offset as usize..offset as usize + buf.len()]);
        }
    }

    struct FakeRtc {
        gp: [u32; 4],
        enabled: bool,
    }

    impl RtcGpRegisters for FakeRtc {
        fn read_gp(&self, index: u8) -> u32 {
            self.gp[index as usize]
        }
        fn write_gp(&mut self, index: u8, value: u32) {
            self.gp[index as usize] = value;
        }
        fn gp0_gp2_enabled(&self) -> bool {
            self.enabled
        }
        fn set_gp0_gp2_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }
    }

    fn layout() -> FlashLayout {
        FlashLayout {
            header_offset: 0,
            fw_offset: 64,
            fw_available: 1024,
            page_size: 64,
            block_size: 64,
        }
    }

    #[test]
    fn full_update_round_trips() {
        let mut flash = FakeFlash::new(2048);
        let layout = layout();
        let payload = b"hello firmware image, pad to more than one page..............";
        let crc = crc32(payload);

        let mut mgr: UpdateManager<64> = UpdateManager::new();
        mgr.initialize_update(&mut flash, layout, payload.len() as u32, crc)
            .unwrap();
        for chunk in payload.chunks(7) {
            mgr.program(&mut flash, chunk).unwrap();
        }
        assert!(mgr.finalize(&mut flash, layout).is_ok());

        let mut header_bytes = [0u8; HEADER_SIZE];
        flash.read(layout.header_offset, &mut header_bytes);
        let header = ApplicationHeader::from_bytes(&header_bytes);
        assert!(check_target_firmware(&flash, layout, header, None));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut flash = FakeFlash::new(2048);
        let layout = layout();
        let mut mgr: UpdateManager<64> = UpdateManager::new();
        mgr.initialize_update(&mut flash, layout, 8, 0xDEAD_BEEF)
            .unwrap();
        mgr.program(&mut flash, &[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(mgr.finalize(&mut flash, layout), Err(FimError::LengthMismatch));
    }

    #[test]
    fn program_without_init_is_rejected() {
        let mut flash = FakeFlash::new(2048);
        let mut mgr: UpdateManager<64> = UpdateManager::new();
        assert_eq!(
            mgr.program(&mut flash, &[1, 2, 3]),
            Err(FimError::NotInitialized)
        );
    }

    #[test]
    fn bootloader_request_is_recognized_and_consumed() {
        let mut rtc = FakeRtc {
            gp: [0xFFFF_FFFF; 4],
            enabled: true,
        };
        let reason = check_bootloader_mode_request(&mut rtc, false, false);
        assert_eq!(reason, StartupReason::BootloaderRequest);
        assert_eq!(rtc.gp, [0, 0, 0, 0]);
        assert!(!rtc.enabled);
    }

    #[test]
    fn watchdog_and_brownout_take_priority_over_gp_registers() {
        let mut rtc = FakeRtc {
            gp: [0xFFFF_FFFF; 4],
            enabled: true,
        };
        assert_eq!(
            check_bootloader_mode_request(&mut rtc, true, false),
            StartupReason::WatchdogReset
        );
        assert_eq!(
            check_bootloader_mode_request(&mut rtc, false, true),
            StartupReason::BrownOutReset
        );
    }

    #[test]
    fn power_up_and_brown_out_both_attempt_boot() {
        assert!(should_attempt_boot(StartupReason::PowerUp));
        assert!(should_attempt_boot(StartupReason::BrownOutReset));
        assert!(!should_attempt_boot(StartupReason::WatchdogReset));
        assert!(!should_attempt_boot(StartupReason::BootloaderRequest));
    }

    #[test]
    fn request_bootloader_sets_handoff_registers() {
        let mut rtc = FakeRtc {
            gp: [0; 4],
            enabled: false,
        };
        request_bootloader_on_next_boot(&mut rtc);
        assert_eq!(rtc.gp, [0xFFFF_FFFF; 4]);
        assert!(rtc.enabled);
    }
}
