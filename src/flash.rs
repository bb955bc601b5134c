use log::{error, info};
use stm32f4xx_hal::{
    flash::FlashExt,
    pac::{FLASH, SCB},
};

use crate::config::{sector_of, FLASH_BASE};
use crate::dfu::{DfuMemory, MemoryError};

/// Internal flash as seen by the DFU class.
pub struct Flash {
    flash: FLASH,
}

impl Flash {
    pub fn new(flash: FLASH) -> Self {
        Flash { flash }
    }

    fn span(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        let start = addr.checked_sub(FLASH_BASE).ok_or(MemoryError::Address)? as usize;
        let end = start + len;
        if end > self.flash.read().len() {
            return Err(MemoryError::Address);
        }
        Ok(start..end)
    }
}

impl DfuMemory for Flash {
    /// 128 bytes in x8 parallelism, with margin
    const PROGRAM_TIME_MS: u32 = 5;
    /// 16 KiB sectors take ~400 ms, the 128 KiB ones up to 2 s
    const ERASE_TIME_MS: u32 = 500;

    fn erase(&mut self, addr: u32) -> Result<(), MemoryError> {
        let sector = sector_of(addr).ok_or(MemoryError::Address)?;
        self.flash.unlocked()
            .erase(sector)
            .map_err(|e| {
                error!("erase sector {}: {:?}", sector, e);
                MemoryError::Erase
            })
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let span = self.span(addr, data.len())?;
        self.flash.unlocked()
            .program(span.start, data.iter())
            .map_err(|e| {
                error!("program {:#010x}: {:?}", addr, e);
                MemoryError::Write
            })?;
        if &self.flash.read()[span] != data {
            return Err(MemoryError::Verify);
        }
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let span = self.span(addr, buf.len())?;
        buf.copy_from_slice(&self.flash.read()[span]);
        Ok(())
    }

    fn manifest(&mut self) -> Result<(), MemoryError> {
        info!("update complete, resetting");
        SCB::sys_reset()
    }
}
