//! `FlashDevice` adapter over `hal::flash::Flash`, grounded on the
//! teacher's `erase_write_sector`/`erase_write_page` usage in
//! `firmware/src/cfg_storage.rs`, split into separate erase/program calls
//! since `botbrain_core::fim::UpdateManager` streams pages independently
//! of erase.

use hal::flash::{Bank, Flash};

use botbrain_core::fim::FlashDevice;

use crate::board::FLASH_BASE;

pub struct McuFlash<'f> {
    flash: &'f mut Flash,
}

#[derive(Debug)]
pub struct FlashError;

impl<'f> McuFlash<'f> {
    pub fn new(flash: &'f mut Flash) -> Self {
        Self { flash }
    }
}

impl<'f> FlashDevice for McuFlash<'f> {
    type Error = FlashError;

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), Self::Error> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "h7")] {
                let sector = offset / crate::board::LAYOUT.block_size;
                let sectors = len.div_ceil(crate::board::LAYOUT.block_size);
                for s in sector..sector + sectors {
                    self.flash
                        .erase_sector(Bank::B1, s as u8)
                        .map_err(|_| FlashError)?;
                }
            } else if #[cfg(feature = "g4")] {
                let page = offset / crate::board::LAYOUT.block_size;
                let pages = len.div_ceil(crate::board::LAYOUT.block_size);
                for p in page..page + pages {
                    self.flash
                        .erase_page(Bank::B1, p as u8)
                        .map_err(|_| FlashError)?;
                }
            }
        }
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.flash
            .write(Bank::B1, offset, data)
            .map_err(|_| FlashError)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) {
        let addr = (FLASH_BASE + offset) as *const u8;
        // Flash is memory-mapped; a plain volatile copy is the portable
        // read path (no unaligned casts, matching the `memcpy` decoder
        // style used throughout `botbrain_core::bytes`).
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { addr.add(i).read_volatile() };
        }
    }
}
