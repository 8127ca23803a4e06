//! RGB/HSV conversions for ring-LED pixels, and the fixed color palette
//! the indication scenarios draw from.

/// 8-bit-per-channel RGB, the format written to the physical LED strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

pub const RED: Rgb = Rgb::new(0xFF, 0x00, 0x00);
pub const GREEN: Rgb = Rgb::new(0x00, 0xFF, 0x00);
pub const BLUE: Rgb = Rgb::new(0x00, 0x00, 0xFF);
pub const YELLOW: Rgb = Rgb::new(0xFF, 0xFF, 0x00);
pub const ORANGE: Rgb = Rgb::new(0xFF, 0x55, 0x00);
pub const OFF: Rgb = Rgb::new(0x00, 0x00, 0x00);

/// Hue in whole degrees (`0..360`, wrapped), saturation/value in
/// percent (`0..=100`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct Hsv {
    pub h: u16,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub const fn new(h: u16, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }
}

pub fn hsv_to_rgb(hsv: Hsv) -> Rgb {
    let h = hsv.h % 360;
    let s = hsv.s as f32 / 100.0;
    let v = hsv.v as f32 / 100.0;

    let hh = h as f32 / 60.0;
    let hue = hh as u8;
    let ff = hh - hue as f32;

    let p = v * (1.0 - s);
    let q = v * (1.0 - (s * ff));
    let t = v * (1.0 - (s * (1.0 - ff)));

    let pp = (p * 255.0) as u8;
    let qq = (q * 255.0) as u8;
    let tt = (t * 255.0) as u8;
    let vv = (v * 255.0) as u8;

    match hue {
        0 => Rgb::new(vv, tt, pp),
        1 => Rgb::new(qq, vv, pp),
        2 => Rgb::new(pp, vv, tt),
        3 => Rgb::new(pp, qq, vv),
        4 => Rgb::new(tt, pp, vv),
        _ => Rgb::new(vv, pp, qq),
    }
}

pub fn rgb_to_hsv(rgb: Rgb) -> Hsv {
    let (r, g, b) = (rgb.r as i32, rgb.g as i32, rgb.b as i32);
    let cmax = r.max(g).max(b);
    let cmin = r.min(g).min(b);
    let delta = cmax - cmin;

    let (h, s) = if cmin == cmax {
        (0, 0)
    } else {
        let s = 100 - (100 * cmin) / cmax;
        let h = if cmax == r {
            (60 * (g - b) / delta + 360).rem_euclid(360)
        } else if cmax == g {
            60 * (b - r) / delta + 120
        } else {
            60 * (r - g) / delta + 240
        };
        (h, s)
    };

    Hsv::new(h as u16, s as u8, (100 * cmax / 255) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn red_round_trips() {
        let hsv = rgb_to_hsv(RED);
        let rgb = hsv_to_rgb(hsv);
        assert_eq!(rgb, RED);
    }

    #[test]
    fn green_round_trips() {
        let hsv = rgb_to_hsv(GREEN);
        let rgb = hsv_to_rgb(hsv);
        assert_eq!(rgb, GREEN);
    }

    #[test]
    fn gray_has_zero_saturation() {
        let hsv = rgb_to_hsv(Rgb::new(128, 128, 128));
        assert_eq!(hsv.s, 0);
    }

    #[test]
    fn off_converts_to_black() {
        let hsv = rgb_to_hsv(OFF);
        assert_eq!(hsv.v, 0);
        assert_eq!(hsv_to_rgb(hsv), OFF);
    }
}
