//! Indication Engine: drives the 12-pixel ring LED at a 20ms tick,
//! switching between a startup animation, a master-requested scenario,
//! and a forced busy indicator whenever the master's status is unknown.

use libm::sinf;

use crate::color::{hsv_to_rgb, rgb_to_hsv, Hsv, Rgb, BLUE, GREEN, OFF, ORANGE, RED, YELLOW};
use crate::interpolate::{map, map_constrained};

const RING_LEDS: usize = 12;
const TICK_MS: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum Scenario {
    Off,
    UserFrame,
    ColorWheel,
    RainbowFade,
    BusyIndicator,
    BreathingGreen,
    Siren,
    TrafficLight,
    BugIndicator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum MasterStatus {
    Unknown,
    NotConfigured,
    Configuring,
    Updating,
    Operational,
    Controlled,
}

pub type Pixels = [Rgb; RING_LEDS];

/// Drives the ring from whichever scenario the master last requested,
/// substituting a startup animation until the master signals it is
/// ready (or the startup time budget runs out) and a busy indicator
/// whenever the master's status is unknown.
pub struct Engine {
    current_scenario: Scenario,
    in_startup_animation: bool,
    time_since_startup: u32,
    expected_startup_time_ms: u32,
    startup_time: u32,
    scenario_time: u32,
    spinning_time: u32,
    breathing_time: u32,
    siren_time: u32,
    traffic_light_time: u32,
    bug_indicator_time: u32,
    user_colors: Pixels,
}

impl Engine {
    /// `wait_for_master_startup`: if false, the engine jumps straight to
    /// `requested_scenario` without running the startup animation.
    pub fn new(wait_for_master_startup: bool, expected_startup_time_ms: u32, requested_scenario: Scenario) -> Self {
        let in_startup_animation = wait_for_master_startup;
        Self {
            current_scenario: if in_startup_animation { Scenario::Off } else { requested_scenario },
            in_startup_animation,
            time_since_startup: 0,
            expected_startup_time_ms: expected_startup_time_ms.max(1),
            startup_time: 0,
            scenario_time: 0,
            spinning_time: 0,
            breathing_time: 0,
            siren_time: 0,
            traffic_light_time: 0,
            bug_indicator_time: 0,
            user_colors: [OFF; RING_LEDS],
        }
    }

    pub fn set_master_ready(&mut self) {
        self.in_startup_animation = false;
    }

    pub fn set_user_colors(&mut self, colors: Pixels) {
        self.user_colors = colors;
    }

    pub fn current_scenario(&self) -> Scenario {
        self.current_scenario
    }

    /// Advance one 20ms tick and render the ring into `out`.
    ///
    /// `master_ready` and `master_status` mirror the live signals the
    /// original firmware polled each tick; `requested_scenario` is
    /// whatever the master last commanded.
    pub fn tick(&mut self, master_ready: bool, master_status: MasterStatus, requested_scenario: Scenario, out: &mut Pixels) {
        if !master_ready && self.in_startup_animation && self.time_since_startup < self.expected_startup_time_ms {
            self.time_since_startup += TICK_MS;
            if self.time_since_startup >= self.expected_startup_time_ms {
                self.in_startup_animation = false;
                self.current_scenario = requested_scenario;
                self.scenario_time = 0;
            } else {
                startup_indicator(self.expected_startup_time_ms, &mut self.startup_time, out);
                return;
            }
        }

        let effective_scenario = if master_status == MasterStatus::Unknown {
            Scenario::BusyIndicator
        } else {
            requested_scenario
        };

        if self.current_scenario != effective_scenario {
            self.current_scenario = effective_scenario;
            self.scenario_time = 0;
            self.spinning_time = 0;
        }

        match self.current_scenario {
            Scenario::Off => off_writer(out),
            Scenario::UserFrame => frame_writer(&self.user_colors, out),
            Scenario::ColorWheel => color_wheel_writer(&mut self.scenario_time, out),
            Scenario::RainbowFade => rainbow_fade_writer(&mut self.scenario_time, out),
            Scenario::BusyIndicator => spinning_color_writer(&mut self.spinning_time, RED, out),
            Scenario::BreathingGreen => breathing_writer(&mut self.breathing_time, GREEN, out),
            Scenario::Siren => siren_writer(&mut self.siren_time, out),
            Scenario::TrafficLight => traffic_light_writer(&mut self.traffic_light_time, out),
            Scenario::BugIndicator => bug_indicator_writer(&mut self.bug_indicator_time, out),
        }
    }
}

fn startup_indicator(expected_startup_time_ms: u32, time: &mut u32, out: &mut Pixels) {
    let mut step = map(*time as f32, 0.0, expected_startup_time_ms as f32, 0.0, 12.0).floor() as u32;
    *time += TICK_MS;

    if step == 24 {
        step = 0;
        *time = 0;
    }

    if step < 13 {
        let fill_end = step as usize;
        for (i, px) in out.iter_mut().enumerate() {
            *px = if i < fill_end { YELLOW } else { OFF };
        }
    } else {
        let clear_start = (step - 12) as usize;
        for (i, px) in out.iter_mut().enumerate() {
            *px = if i < clear_start { OFF } else { YELLOW };
        }
    }
}

fn off_writer(out: &mut Pixels) {
    out.fill(OFF);
}

fn frame_writer(user_colors: &Pixels, out: &mut Pixels) {
    out.copy_from_slice(user_colors);
}

fn color_wheel_writer(time: &mut u32, out: &mut Pixels) {
    let phase = (*time * 6) / 20;
    *time += TICK_MS;

    for (i, px) in out.iter_mut().enumerate() {
        let h = (phase + i as u32 * 360 / RING_LEDS as u32) % 360;
        *px = hsv_to_rgb(Hsv::new(h as u16, 100, 100));
    }
}

fn rainbow_fade_writer(time: &mut u32, out: &mut Pixels) {
    let phase = *time / 40;
    *time += TICK_MS;

    let rgb = hsv_to_rgb(Hsv::new((phase % 360) as u16, 100, 100));
    out.fill(rgb);
}

fn spinning_color_writer(time: &mut u32, color: Rgb, out: &mut Pixels) {
    let elapsed = *time;
    *time += TICK_MS;

    const TAIL_LENGTH: u32 = 6;
    let n_leds = map_constrained(elapsed as f32, 0.0, (TAIL_LENGTH * 100) as f32, 0.0, TAIL_LENGTH as f32) as u32;
    let start_led = (RING_LEDS as u32 - 1 - TAIL_LENGTH)
        + if TAIL_LENGTH == n_leds { elapsed / 100 } else { TAIL_LENGTH };

    let mut hsv = rgb_to_hsv(color);
    out.fill(OFF);
    for i in 0..RING_LEDS as u32 {
        if i < n_leds {
            hsv.v = map(i as f32, 0.0, TAIL_LENGTH as f32, 0.0, 100.0) as u8;
            out[((start_led + i) % RING_LEDS as u32) as usize] = hsv_to_rgb(hsv);
        }
    }
}

fn breathing_writer(time: &mut u32, color: Rgb, out: &mut Pixels) {
    let mut hsv = rgb_to_hsv(color);

    let elapsed = *time;
    *time += TICK_MS;

    let c = sinf(2.0 * core::f32::consts::PI * elapsed as f32 / 10000.0);
    hsv.v = map(c * c, 0.0, 1.0, 0.0, 100.0) as u8;

    out.fill(hsv_to_rgb(hsv));
}

fn siren_writer(time: &mut u32, out: &mut Pixels) {
    let elapsed = *time;
    *time += TICK_MS;

    const TAIL_LENGTH: u32 = 6;
    let n_leds = map_constrained(elapsed as f32, 0.0, (TAIL_LENGTH * 75) as f32, 0.0, TAIL_LENGTH as f32) as u32;
    let start_led = (RING_LEDS as u32 - 1 - TAIL_LENGTH)
        + if TAIL_LENGTH == n_leds { elapsed / 75 } else { TAIL_LENGTH };

    let mut hsv_r = rgb_to_hsv(RED);
    let mut hsv_b = rgb_to_hsv(BLUE);

    out.fill(OFF);
    for i in 0..(RING_LEDS as u32 / 2) {
        if i < n_leds {
            hsv_r.v = map(i as f32, 0.0, TAIL_LENGTH as f32, 0.0, 100.0) as u8;
            hsv_b.v = hsv_r.v;
            out[((start_led + i) % RING_LEDS as u32) as usize] = hsv_to_rgb(hsv_r);
            out[((start_led + i + 6) % RING_LEDS as u32) as usize] = hsv_to_rgb(hsv_b);
        }
    }
}

fn traffic_light_writer(time: &mut u32, out: &mut Pixels) {
    *time = (*time + TICK_MS) % 8000;

    let color = if *time < 3000 {
        RED
    } else if *time < 4000 {
        ORANGE
    } else if *time < 7000 {
        GREEN
    } else {
        ORANGE
    };

    out.fill(color);
}

fn bug_indicator_writer(time: &mut u32, out: &mut Pixels) {
    *time = (*time + TICK_MS) % 400;
    let is_on = (*time / 200) % 2 == 0;

    if is_on {
        for (i, px) in out.iter_mut().enumerate() {
            *px = if i % 2 == 1 { RED } else { OFF };
        }
    } else {
        out.fill(ORANGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_animation_runs_until_time_budget_expires() {
        let mut engine = Engine::new(true, 100, Scenario::ColorWheel);
        let mut pixels = [OFF; RING_LEDS];

        // 100ms budget / 20ms tick = 5 ticks of startup animation.
        for _ in 0..5 {
            engine.tick(false, MasterStatus::Operational, Scenario::ColorWheel, &mut pixels);
        }
        assert_eq!(engine.current_scenario(), Scenario::ColorWheel);
    }

    #[test]
    fn skips_startup_animation_when_not_requested() {
        let mut engine = Engine::new(false, 1000, Scenario::Off);
        let mut pixels = [RED; RING_LEDS];
        engine.tick(true, MasterStatus::Operational, Scenario::RainbowFade, &mut pixels);
        assert_eq!(engine.current_scenario(), Scenario::RainbowFade);
    }

    #[test]
    fn unknown_master_status_forces_busy_indicator() {
        let mut engine = Engine::new(false, 1000, Scenario::Off);
        let mut pixels = [OFF; RING_LEDS];
        engine.tick(true, MasterStatus::Unknown, Scenario::Off, &mut pixels);
        assert_eq!(engine.current_scenario(), Scenario::BusyIndicator);
    }

    #[test]
    fn off_scenario_clears_all_pixels() {
        let mut engine = Engine::new(false, 1000, Scenario::Off);
        let mut pixels = [RED; RING_LEDS];
        engine.tick(true, MasterStatus::Operational, Scenario::Off, &mut pixels);
        assert!(pixels.iter().all(|p| *p == OFF));
    }

    #[test]
    fn user_frame_reflects_set_colors() {
        let mut engine = Engine::new(false, 1000, Scenario::UserFrame);
        let mut colors = [OFF; RING_LEDS];
        colors[3] = GREEN;
        engine.set_user_colors(colors);

        let mut pixels = [OFF; RING_LEDS];
        engine.tick(true, MasterStatus::Operational, Scenario::UserFrame, &mut pixels);
        assert_eq!(pixels[3], GREEN);
    }

    #[test]
    fn traffic_light_cycles_red_then_amber_then_green() {
        let mut time = 0u32;
        let mut pixels = [OFF; RING_LEDS];
        traffic_light_writer(&mut time, &mut pixels);
        assert_eq!(pixels[0], RED);

        time = 3000;
        traffic_light_writer(&mut time, &mut pixels);
        assert_eq!(pixels[0], ORANGE);

        time = 4000;
        traffic_light_writer(&mut time, &mut pixels);
        assert_eq!(pixels[0], GREEN);
    }

    #[test]
    fn bug_indicator_blinks_every_other_pixel() {
        let mut time = 0u32;
        let mut pixels = [OFF; RING_LEDS];
        bug_indicator_writer(&mut time, &mut pixels);
        assert_eq!(pixels[0], OFF);
        assert_eq!(pixels[1], RED);
    }
}
