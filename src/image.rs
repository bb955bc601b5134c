use crate::config::BootConfig;

/// Word-addressed read access to the flash holding the application.
pub trait ImageSource {
    fn read_word(&self, addr: u32) -> u32;
}

/// The two vector table words of an application that passed the
/// stack pointer heuristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppImage {
    pub stack_pointer: u32,
    pub entry: u32,
}

impl AppImage {
    /// Reads both vector table words at `config.app_base` and accepts
    /// the image iff the masked stack pointer lands in SRAM.
    ///
    /// This only looks at flash. Erased (`0xFFFF_FFFF`) and zeroed
    /// flash both fail the mask. There is no checksum: an image with a
    /// plausible stack pointer is trusted, and the override key is the
    /// way out when that trust is misplaced.
    pub fn probe<S: ImageSource>(flash: &S, config: &BootConfig) -> Option<Self> {
        let stack_pointer = flash.read_word(config.app_base);
        let entry = flash.read_word(config.app_base + 4);
        if stack_pointer & config.sp_mask == config.sp_expected {
            Some(AppImage { stack_pointer, entry })
        } else {
            None
        }
    }
}

/// Memory-mapped flash of the running MCU.
#[cfg(target_arch = "arm")]
pub struct FlashMemory;

#[cfg(target_arch = "arm")]
impl ImageSource for FlashMemory {
    fn read_word(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }
}
