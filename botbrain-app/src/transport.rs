//! Incremental command-frame assembly off a byte-at-a-time UART RX
//! interrupt.
//!
//! The bootloader's main loop can afford to block on
//! `nb::block!(uart.read())` between frames since it has nothing else to
//! do; the application can't, so the same 6-byte-header-then-payload
//! shape from `botbrain_core::fct::CommandFrame` is assembled one
//! interrupt at a time here instead.

use botbrain_core::fct::MAX_PAYLOAD;

const HEADER_LEN: usize = 6;
const BUF_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

pub struct FrameAccumulator {
    buf: [u8; BUF_LEN],
    filled: usize,
}

impl FrameAccumulator {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; BUF_LEN],
            filled: 0,
        }
    }

    /// Feeds one received byte in. Returns `Some(len)` once a complete
    /// frame has been assembled; the accumulator resets itself so the
    /// caller can start the next frame right away.
    pub fn push(&mut self, byte: u8) -> Option<usize> {
        self.buf[self.filled] = byte;
        self.filled += 1;

        if self.filled >= HEADER_LEN {
            let total = HEADER_LEN + self.buf[2] as usize;
            if self.filled >= total {
                self.filled = 0;
                return Some(total);
            }
        }

        if self.filled >= BUF_LEN {
            self.filled = 0;
        }

        None
    }

    pub fn frame(&self) -> &[u8] {
        &self.buf
    }
}
