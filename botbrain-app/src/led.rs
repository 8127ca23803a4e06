//! Ring-LED driver for the application: pushes whatever `ie::Engine::tick`
//! wrote into a `Pixels` buffer out over SPI, the same `smart-leds`/
//! `ws2812-spi` pairing the bootloader uses for its own indication.

use smart_leds::{SmartLedsWrite, RGB8};
use ws2812_spi::Ws2812;

use botbrain_core::color::Rgb;
use botbrain_core::ie::Pixels;

fn to_rgb8(c: Rgb) -> RGB8 {
    RGB8::new(c.r, c.g, c.b)
}

pub fn render<SPI>(strip: &mut Ws2812<SPI>, pixels: &Pixels)
where
    SPI: embedded_hal::spi::SpiBus<u8>,
{
    let _ = strip.write(pixels.iter().map(|p| to_rgb8(*p)));
}
