//! Ring-LED driver for the bootloader: a 12-pixel `smart-leds` buffer
//! pushed out over SPI via `ws2812-spi`, grounded on
//! `mcu-bootloader/rrrc/main.c`'s `ringLeds` array and its
//! `UpdateManager_RaiseEvent_ProgressChanged` progress-to-cyan-count
//! mapping.

use smart_leds::{SmartLedsWrite, RGB8};
use ws2812_spi::Ws2812;

use botbrain_core::color::{Rgb, OFF, RED};
use botbrain_core::interpolate::map;

const RING_LEDS: usize = 12;
const CYAN: Rgb = Rgb::new(0x00, 0xFF, 0xFF);

static mut UPDATE_PROGRESS: Option<u8> = None;

/// Called by `ProgramApplicationHandler` on every chunk; the main loop
/// reads it back on its next ring-update pass. Single-threaded bootloader,
/// so the bare `static mut` is sound (no ISR ever writes it).
pub fn set_update_progress(progress: u8) {
    unsafe {
        UPDATE_PROGRESS = Some(progress);
    }
}

fn to_rgb8(c: Rgb) -> RGB8 {
    RGB8::new(c.r, c.g, c.b)
}

/// Renders either the update-progress bar (while a transfer is underway)
/// or the fixed boot-reason indication pattern set once at startup.
pub fn render<SPI>(strip: &mut Ws2812<SPI>, boot_indication: &[Rgb; RING_LEDS])
where
    SPI: embedded_hal::spi::SpiBus<u8>,
{
    let progress = unsafe { UPDATE_PROGRESS };

    let mut pixels = [OFF; RING_LEDS];
    if let Some(progress) = progress {
        let lit = map(progress as f32, 0.0, 255.0, 0.0, RING_LEDS as f32).round() as usize;
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = if i < lit { CYAN } else { OFF };
        }
    } else {
        pixels = *boot_indication;
    }

    let _ = strip.write(pixels.iter().map(|p| to_rgb8(*p)));
}

/// Builds the static boot-reason indication: a red pixel at the
/// "no application" index for power-up/brown-out failures, plus a
/// second red pixel at the "watchdog" index for a watchdog reset.
pub fn boot_indication(show_no_application: bool, show_watchdog: bool) -> [Rgb; RING_LEDS] {
    let mut pixels = [OFF; RING_LEDS];
    if show_no_application {
        pixels[crate::board::LED_NO_APPLICATION] = RED;
    }
    if show_watchdog {
        pixels[crate::board::LED_WATCHDOG_RESET] = RED;
    }
    pixels
}
