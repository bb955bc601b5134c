//! DFU 1.1 mode class with the DfuSe command set understood by
//! dfu-util (`-a 0 -s 0x08004000:leave`).
//!
//! The protocol state machine is `usbd-dfu`'s. This module confines it
//! to the application region and plugs it into the session hooks.

use core::{fmt, ops::Range};
use log::{debug, info, warn};
use usb_device::{
    class::UsbClass,
    class_prelude::{DescriptorWriter, StringIndex, UsbBus, UsbBusAllocator},
    UsbDirection,
};
use usbd_dfu::{DFUClass, DFUManifestationError, DFUMemError, DFUMemIO};

use crate::{
    class::{ClassError, ControlTransfer, DeviceClass},
    config::CONFIG,
};

/// Control buffer of usb-device; a DFU block must fit in it.
const CONTROL_BUF_LEN: usize = 128;

const TRANSFER_SIZE: usize = if (CONFIG.transfer_size as usize) < CONTROL_BUF_LEN {
    CONFIG.transfer_size as usize
} else {
    CONTROL_BUF_LEN
};

/// Failures of the flash behind the DFU class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryError {
    Address,
    #[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
    Erase,
    Write,
    #[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
    Verify,
}

impl From<MemoryError> for DFUMemError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Address => DFUMemError::Address,
            MemoryError::Erase => DFUMemError::Erase,
            MemoryError::Write => DFUMemError::Write,
            MemoryError::Verify => DFUMemError::Verify,
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::Address => "address out of range".fmt(fmt),
            MemoryError::Erase => "erase failed".fmt(fmt),
            MemoryError::Write => "write failed".fmt(fmt),
            MemoryError::Verify => "verify failed".fmt(fmt),
        }
    }
}

/// Flash programming, supplied by the board.
pub trait DfuMemory {
    /// bwPollTimeout reported while a block is programmed
    const PROGRAM_TIME_MS: u32;
    /// bwPollTimeout reported while a page is erased
    const ERASE_TIME_MS: u32;

    /// Erases the page containing `addr`.
    fn erase(&mut self, addr: u32) -> Result<(), MemoryError>;
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError>;
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError>;
    /// The host finished the download and the image should run.
    fn manifest(&mut self) -> Result<(), MemoryError>;
}

/// The flash `usbd-dfu` operates on: `memory` restricted to `region`,
/// so the bootloader can neither be erased nor overwritten.
pub struct AppRegion<M> {
    memory: M,
    region: Range<u32>,
    buffer: [u8; TRANSFER_SIZE],
    stored: usize,
}

impl<M: DfuMemory> AppRegion<M> {
    pub fn new(memory: M, region: Range<u32>) -> Self {
        AppRegion { memory, region, buffer: [0; TRANSFER_SIZE], stored: 0 }
    }

    fn covers(&self, addr: u32, len: usize) -> bool {
        let end = addr.checked_add(len as u32);
        self.region.contains(&addr) && end.map_or(false, |end| end <= self.region.end)
    }
}

impl<M: DfuMemory> DFUMemIO for AppRegion<M> {
    const INITIAL_ADDRESS_POINTER: u32 = CONFIG.app_base;
    const MEM_INFO_STRING: &'static str = CONFIG.memory_layout;
    const HAS_DOWNLOAD: bool = true;
    const HAS_UPLOAD: bool = true;
    // the new image only runs after a reset
    const MANIFESTATION_TOLERANT: bool = false;
    const PROGRAM_TIME_MS: u32 = M::PROGRAM_TIME_MS;
    const ERASE_TIME_MS: u32 = M::ERASE_TIME_MS;
    const FULL_ERASE_TIME_MS: u32 = M::ERASE_TIME_MS;
    const TRANSFER_SIZE: u16 = TRANSFER_SIZE as u16;

    fn read(&mut self, address: u32, length: usize) -> Result<&[u8], DFUMemError> {
        if address < self.region.start {
            return Err(DFUMemError::Address);
        }
        // an empty block at the end of the region ends the upload
        if address >= self.region.end {
            return Ok(&[]);
        }
        let len = length
            .min(self.buffer.len())
            .min((self.region.end - address) as usize);
        self.memory.read(address, &mut self.buffer[..len])?;
        Ok(&self.buffer[..len])
    }

    fn erase(&mut self, address: u32) -> Result<(), DFUMemError> {
        if !self.region.contains(&address) {
            warn!("erase {:#010x} outside application", address);
            return Err(DFUMemError::Address);
        }
        debug!("dfu erase {:#010x}", address);
        Ok(self.memory.erase(address)?)
    }

    fn erase_all(&mut self) -> Result<(), DFUMemError> {
        // would take the bootloader with it
        warn!("mass erase refused");
        Err(DFUMemError::Target)
    }

    fn store_write_buffer(&mut self, src: &[u8]) -> Result<(), ()> {
        let dst = self.buffer.get_mut(..src.len()).ok_or(())?;
        dst.copy_from_slice(src);
        self.stored = src.len();
        Ok(())
    }

    fn program(&mut self, address: u32, length: usize) -> Result<(), DFUMemError> {
        if length > self.stored {
            return Err(DFUMemError::Unknown);
        }
        if !self.covers(address, length) {
            warn!("program {:#010x} +{} outside application", address, length);
            return Err(DFUMemError::Address);
        }
        debug!("dfu program {:#010x} +{}", address, length);
        Ok(self.memory.program(address, &self.buffer[..length])?)
    }

    fn manifestation(&mut self) -> Result<(), DFUManifestationError> {
        info!("dfu manifest");
        self.memory.manifest().map_err(|e| {
            warn!("manifest: {}", e);
            DFUManifestationError::Unknown
        })
    }
}

/// The DFU class bound into the device session.
pub struct DfuClass<B: UsbBus, M: DfuMemory> {
    dfu: DFUClass<B, AppRegion<M>>,
}

impl<B: UsbBus, M: DfuMemory> DfuClass<B, M> {
    /// Reserves the DFU interface and its string. `region` is the flash
    /// the host may erase, program and read.
    pub fn new(alloc: &UsbBusAllocator<B>, memory: M, region: Range<u32>) -> Self {
        DfuClass { dfu: DFUClass::new(alloc, AppRegion::new(memory, region)) }
    }
}

impl<B: UsbBus, M: DfuMemory> DeviceClass<B> for DfuClass<B, M> {
    fn configuration(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        self.dfu.get_configuration_descriptors(writer)
    }

    fn string(&self, index: StringIndex, lang_id: u16) -> Option<&str> {
        self.dfu.get_string(index, lang_id)
    }

    fn on_activate(&mut self, config: u8) -> Result<(), ClassError> {
        debug!("dfu activate {}", config);
        if config != 1 {
            return Err(ClassError::InvalidState);
        }
        Ok(())
    }

    fn on_deactivate(&mut self, config: u8) {
        debug!("dfu deactivate {}", config);
        self.dfu.reset();
    }

    fn on_control_request(&mut self, xfer: ControlTransfer<'_, '_, '_, B>) {
        match xfer {
            ControlTransfer::Out(xfer) => self.dfu.control_out(xfer),
            ControlTransfer::In(xfer) => self.dfu.control_in(xfer),
        }
    }

    fn on_data_transfer(&mut self, _direction: UsbDirection, endpoint: u8) -> Result<(), ClassError> {
        if endpoint != 0 {
            return Err(ClassError::Unsupported);
        }
        // runs the erase, program or manifestation the last GETSTATUS announced
        self.dfu.poll();
        Ok(())
    }
}
