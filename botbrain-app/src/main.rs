//! Application entry point: the RTIC 2 task set driving six motor ports,
//! four sensor ports, the ring LED, and the host transport concurrently.
//!
//! Grounded on the teacher's RTIC skeleton in `src/main.rs` (shared/local
//! resource split, `#[task(binds = ...)]` ISR tasks, tuple `.lock()`
//! pattern) adapted from RTIC 1's `(Shared, Local, init::Monotonics)`
//! `init` return to RTIC 2's `(Shared, Local)` — this workspace pins
//! `rtic = "^2.0.1"`, which dropped the monotonics tuple.

#![no_main]
#![no_std]

use defmt_rtt as _;
use panic_probe as _;

mod board;
mod commands;
mod led;
mod motor_port;
mod rtc;
mod runtime;
mod transport;

use botbrain_core::fct::{
    CommandHandler, Dispatcher, GetHardwareVersionHandler, HardwareVersionProvider,
    UnknownCommandHandler,
};

struct HwVersion;

impl HardwareVersionProvider for HwVersion {
    fn hardware_version(&self) -> &str {
        board::HARDWARE_VERSION
    }
}

/// One past the highest command ID the application answers
/// (`IndicationSetUserFrame`, 0x13).
const HANDLER_COUNT: usize = 0x14;
const RESPONSE_BUF_LEN: usize = 256;

/// Maps an EXTI pin number (0..=11, one per quadrature channel) onto
/// `(port_index, is_channel_a)`. Ports are wired two pins apiece,
/// assigned in order, so pin layout and EXTI-line sharing fall out of
/// the pin number alone.
fn encoder_pin_owner(pin: u8) -> (usize, bool) {
    ((pin / 2) as usize, pin % 2 == 0)
}

#[rtic::app(device = hal::pac, peripherals = false, dispatchers = [TIM2, TIM3, TIM4])]
mod app {
    use super::*;

    use cfg_if::cfg_if;
    use core::cell::RefCell;

    use hal::{
        clocks::Clocks,
        gpio::{Edge, Pin, PinMode, Port},
        pac,
        rtc::Rtc,
        spi::{BaudRate, Spi},
        timer::{TimChannel, Timer, TimerInterrupt},
        usart::{Usart, UsartInterrupt},
    };
    use ws2812_spi::Ws2812;

    use botbrain_core::color::Rgb;
    use botbrain_core::ie;
    use botbrain_core::scc::SensorLibrary;

    use crate::motor_port::{MotorPort, PwmOutput};
    use crate::runtime::Runtime;
    use crate::transport::FrameAccumulator;

    #[shared]
    struct Shared {
        runtime: Runtime,
    }

    #[local]
    struct Local {
        uart: Usart<pac::USART1>,
        led_strip: Ws2812<Spi<pac::SPI2>>,
        accumulator: FrameAccumulator,
        request_buf: [u8; botbrain_core::fct::MAX_PAYLOAD + 6],
        response_buf: [u8; RESPONSE_BUF_LEN],
        indication_subtick: bool,
        pixels: ie::Pixels,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        let dp = cx.device;

        let clock_cfg = Clocks::default();
        clock_cfg.setup().unwrap();

        defmt::println!("botbrain application starting");

        let rtc_periph = Rtc::new(dp.RTC, Default::default());

        let _uart_tx = Pin::new(Port::D, 0, PinMode::Alt(0));
        let _uart_rx = Pin::new(Port::D, 1, PinMode::Alt(0));
        let _led_sck = Pin::new(Port::B, 13, PinMode::Alt(5));
        let _led_miso = Pin::new(Port::B, 14, PinMode::Alt(5));
        let _led_mosi = Pin::new(Port::B, 15, PinMode::Alt(5));

        let mut uart = Usart::new(dp.USART1, 115_200, Default::default(), &clock_cfg);
        uart.enable_interrupt(UsartInterrupt::ReadNotEmpty);

        let led_spi = Spi::new(dp.SPI2, Default::default(), BaudRate::Div32);
        let led_strip = Ws2812::new(led_spi);

        // Motor ports 0..3 share TIM1's four channels, ports 4..5 share
        // two of TIM8's.
        let mut motor_timer_a: Timer<pac::TIM1> = Timer::new_tim1(dp.TIM1, 100.0, Default::default(), &clock_cfg);
        let mut motor_timer_b: Timer<pac::TIM8> = Timer::new_tim8(dp.TIM8, 100.0, Default::default(), &clock_cfg);
        motor_timer_a.enable_interrupt(TimerInterrupt::Update);
        motor_timer_a.enable();
        motor_timer_b.enable();

        let motor_channels = [
            TimChannel::C1,
            TimChannel::C2,
            TimChannel::C3,
            TimChannel::C4,
            TimChannel::C1,
            TimChannel::C2,
        ];
        let direction_ports = [Port::E, Port::E, Port::E, Port::E, Port::E, Port::E];
        let direction_pins_n = [0, 1, 2, 3, 4, 5];

        let motor_ports = core::array::from_fn(|i| {
            let direction = Pin::new(direction_ports[i], direction_pins_n[i], PinMode::Output);
            MotorPort::new(PwmOutput::new(motor_channels[i], direction))
        });

        // Twelve quadrature pins, two per port, on Port C; EXTI lines 0-4
        // get individual vectors, 5-9 share EXTI9_5, 10-11 share EXTI15_10.
        for pin_n in 0u8..12 {
            let mut pin = Pin::new(Port::C, pin_n, PinMode::Input);
            pin.enable_interrupt(Edge::Both);
        }

        let sensor_ports = core::array::from_fn(|_| SensorLibrary::Dummy(Default::default()));

        let ie_engine = ie::Engine::new(true, board::EXPECTED_STARTUP_TIME_MS, ie::Scenario::Off);

        let runtime = Runtime {
            motor_ports,
            motor_timer_a,
            motor_timer_b,
            sensor_ports,
            ie_engine,
            requested_scenario: ie::Scenario::Off,
            master_ready: false,
            rtc: rtc_periph,
        };

        (
            Shared { runtime },
            Local {
                uart,
                led_strip,
                accumulator: FrameAccumulator::new(),
                request_buf: [0u8; botbrain_core::fct::MAX_PAYLOAD + 6],
                response_buf: [0u8; RESPONSE_BUF_LEN],
                indication_subtick: false,
                pixels: [Rgb::new(0, 0, 0); board::RING_LEDS],
            },
        )
    }

    /// 10ms motor control tick, bound to TIM1's own update interrupt.
    /// Runs the full PID cascade for every port, and every other
    /// invocation also drives the 20ms indication tick.
    #[task(binds = TIM1_UP_TIM16, shared = [runtime], local = [led_strip, indication_subtick, pixels], priority = 4)]
    fn motor_tick(mut cx: motor_tick::Context) {
        unsafe { (*pac::TIM1::ptr()).sr.modify(|_, w| w.uif().clear_bit()) }

        cx.shared.runtime.lock(|runtime| {
            runtime.tick_motors();

            *cx.local.indication_subtick = !*cx.local.indication_subtick;
            if *cx.local.indication_subtick {
                runtime.tick_indication(cx.local.pixels);
            }
        });

        crate::led::render(cx.local.led_strip, cx.local.pixels);
    }

    /// Host transport: assembles one byte at a time into a command frame,
    /// dispatches it against a freshly built handler table borrowing the
    /// locked `Runtime`, and writes the response back out.
    #[task(binds = USART1, shared = [runtime], local = [uart, accumulator, request_buf, response_buf], priority = 3)]
    fn transport_rx(mut cx: transport_rx::Context) {
        let uart = cx.local.uart;
        uart.clear_interrupt(UsartInterrupt::ReadNotEmpty);

        let byte = match uart.read() {
            Ok(byte) => byte,
            Err(_) => return,
        };

        let Some(len) = cx.local.accumulator.push(byte) else {
            return;
        };
        cx.local.request_buf[..len].copy_from_slice(&cx.local.accumulator.frame()[..len]);

        let request_buf = &cx.local.request_buf[..len];
        let response_buf = cx.local.response_buf;

        let mut reboot_pending = false;
        let response_len = cx.shared.runtime.lock(|runtime| {
            let cell = RefCell::new(runtime);

            let mut hw_version_handler = GetHardwareVersionHandler::new(HwVersion);
            // One stateless instance per reserved slot: `&mut dyn
            // CommandHandler` isn't `Copy`, so a single local can't fill
            // more than one array element at once.
            let mut unknown_0 = UnknownCommandHandler;
            let mut unknown_2 = UnknownCommandHandler;
            let mut unknown_3 = UnknownCommandHandler;
            let mut unknown_4 = UnknownCommandHandler;
            let mut unknown_5 = UnknownCommandHandler;
            let mut unknown_7 = UnknownCommandHandler;
            let mut unknown_8 = UnknownCommandHandler;
            let mut unknown_9 = UnknownCommandHandler;
            let mut unknown_a = UnknownCommandHandler;
            let mut op_mode_handler = commands::GetOperationModeHandler;
            let mut reboot_handler = commands::RebootToBootloaderHandler::new(&cell);
            let mut configure_handler = commands::MotorConfigureHandler::new(&cell);
            let mut drive_handler = commands::MotorDriveRequestHandler::new(&cell);
            let mut status_handler = commands::MotorReadStatusHandler::new(&cell);
            let mut set_type_handler = commands::MotorSetPortTypeHandler::new(&cell);
            let mut port_types_handler = commands::MotorReadPortTypesHandler::new(&cell);
            let mut sensor_handler = commands::SensorReadStatusHandler::new(&cell);
            let mut scenario_handler = commands::IndicationSetScenarioHandler::new(&cell);
            let mut user_frame_handler = commands::IndicationSetUserFrameHandler::new(&cell);

            let response_len = {
                let mut handlers: [&mut dyn CommandHandler; HANDLER_COUNT] = [
                    &mut unknown_0,            // 0x00
                    &mut hw_version_handler,   // 0x01 GetHardwareVersion
                    &mut unknown_2,            // 0x02
                    &mut unknown_3,            // 0x03
                    &mut unknown_4,            // 0x04
                    &mut unknown_5,            // 0x05
                    &mut op_mode_handler,      // 0x06 GetOperationMode
                    &mut unknown_7,            // 0x07
                    &mut unknown_8,            // 0x08
                    &mut unknown_9,            // 0x09
                    &mut unknown_a,            // 0x0A
                    &mut reboot_handler,       // 0x0B RebootToBootloader
                    &mut configure_handler,    // 0x0C MotorConfigure
                    &mut drive_handler,        // 0x0D MotorDriveRequest
                    &mut status_handler,       // 0x0E MotorReadStatus
                    &mut set_type_handler,     // 0x0F MotorSetPortType
                    &mut port_types_handler,   // 0x10 MotorReadPortTypes
                    &mut sensor_handler,       // 0x11 SensorReadStatus
                    &mut scenario_handler,     // 0x12 IndicationSetScenario
                    &mut user_frame_handler,   // 0x13 IndicationSetUserFrame
                ];
                let mut dispatcher = Dispatcher::new(&mut handlers);
                dispatcher.handle(request_buf, response_buf)
            };

            reboot_pending = reboot_handler.take_pending_reset();
            cell.borrow_mut().mark_master_ready();
            response_len
        });

        for &byte in &cx.local.response_buf[..response_len] {
            let _ = nb::block!(uart.write(byte));
        }

        if reboot_pending {
            defmt::info!("rebooting into bootloader by host request");
            cortex_m::peripheral::SCB::sys_reset();
        }
    }

    #[task(binds = EXTI0, shared = [runtime], priority = 8)]
    fn encoder_exti0(cx: encoder_exti0::Context) {
        hal::gpio::clear_exti_interrupt(0);
        handle_encoder_pin(cx.shared.runtime, 0);
    }

    #[task(binds = EXTI1, shared = [runtime], priority = 8)]
    fn encoder_exti1(cx: encoder_exti1::Context) {
        hal::gpio::clear_exti_interrupt(1);
        handle_encoder_pin(cx.shared.runtime, 1);
    }

    #[task(binds = EXTI2, shared = [runtime], priority = 8)]
    fn encoder_exti2(cx: encoder_exti2::Context) {
        hal::gpio::clear_exti_interrupt(2);
        handle_encoder_pin(cx.shared.runtime, 2);
    }

    #[task(binds = EXTI3, shared = [runtime], priority = 8)]
    fn encoder_exti3(cx: encoder_exti3::Context) {
        hal::gpio::clear_exti_interrupt(3);
        handle_encoder_pin(cx.shared.runtime, 3);
    }

    #[task(binds = EXTI4, shared = [runtime], priority = 8)]
    fn encoder_exti4(cx: encoder_exti4::Context) {
        hal::gpio::clear_exti_interrupt(4);
        handle_encoder_pin(cx.shared.runtime, 4);
    }

    /// Pins 5..9 share one vector; the pending register says which lines
    /// actually fired, same read-then-write-back-to-clear shape as the
    /// teacher's `c1pr1.modify(|_, w| w.pr15().set_bit())` in its own
    /// shared-vector ISR.
    #[task(binds = EXTI9_5, shared = [runtime], priority = 8)]
    fn encoder_exti9_5(cx: encoder_exti9_5::Context) {
        let pending = exti_pending_bits() & 0b0000_0011_1110_0000; // pins 5..9
        exti_clear_pending(pending);
        for pin in 5..=9u8 {
            if pending & (1 << pin) != 0 {
                handle_encoder_pin(cx.shared.runtime, pin);
            }
        }
    }

    #[task(binds = EXTI15_10, shared = [runtime], priority = 8)]
    fn encoder_exti15_10(cx: encoder_exti15_10::Context) {
        let pending = exti_pending_bits() & 0b0000_1100_0000_0000; // pins 10..11
        exti_clear_pending(pending);
        for pin in 10..=11u8 {
            if pending & (1 << pin) != 0 {
                handle_encoder_pin(cx.shared.runtime, pin);
            }
        }
    }

    fn handle_encoder_pin(mut shared_runtime: impl rtic::Mutex<T = Runtime>, pin: u8) {
        let (port, is_a) = crate::encoder_pin_owner(pin);
        shared_runtime.lock(|runtime| {
            if let Some(motor_port) = runtime.motor_ports.get_mut(port) {
                // Both quadrature lines are sampled together; the level on
                // the companion pin distinguishes direction the same way
                // `DcMotor::on_gpio0_edge`/`on_gpio1_edge` expect.
                let a = gpioc_bit(port as u8 * 2);
                let b = gpioc_bit(port as u8 * 2 + 1);
                if is_a {
                    motor_port.on_encoder_a_edge(a, b);
                } else {
                    motor_port.on_encoder_b_edge(a, b);
                }
            }
        });
    }

    /// All twelve encoder lines live on GPIOC, so an ISR on any one of
    /// them can read its companion line straight off the shared IDR
    /// without needing to own the other line's `Pin`.
    fn gpioc_bit(pin: u8) -> bool {
        unsafe { (*pac::GPIOC::ptr()).idr.read().bits() & (1 << pin) != 0 }
    }

    fn exti_pending_bits() -> u32 {
        cfg_if! {
            if #[cfg(feature = "h7")] {
                unsafe { (*pac::EXTI::ptr()).c1pr1.read().bits() }
            } else {
                unsafe { (*pac::EXTI::ptr()).pr1.read().bits() }
            }
        }
    }

    fn exti_clear_pending(mask: u32) {
        cfg_if! {
            if #[cfg(feature = "h7")] {
                unsafe { (*pac::EXTI::ptr()).c1pr1.write(|w| w.bits(mask)) }
            } else {
                unsafe { (*pac::EXTI::ptr()).pr1.write(|w| w.bits(mask)) }
            }
        }
    }
}
