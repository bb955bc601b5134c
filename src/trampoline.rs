use crate::image::AppImage;

/// Irreversible handoff to a validated application.
///
/// Taking `self` by value and returning `!` makes the launch a single
/// commit: nothing of the boot sequence observes the state after it.
pub trait Launcher {
    fn launch(self, image: AppImage) -> !;
}

#[cfg(target_arch = "arm")]
pub struct Trampoline {
    /// Where the application's vector table lives
    pub vector_table: u32,
}

#[cfg(target_arch = "arm")]
impl Launcher for Trampoline {
    fn launch(self, image: AppImage) -> ! {
        unsafe {
            let scb = &*cortex_m::peripheral::SCB::PTR;
            scb.vtor.write(self.vector_table);
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
        unsafe { jump(image.stack_pointer, image.entry) }
    }
}

/// Loads MSP, then branches to `entry`. Both operands are pinned in
/// registers before MSP changes, so nothing between the two
/// instructions touches the old stack.
///
/// This is the only place in the firmware that leaves the Rust
/// execution model.
///
/// # Safety
/// `stack_pointer` and `entry` must come from a vector table that
/// passed [`AppImage::probe`]. Everything the bootloader set up is
/// abandoned.
#[cfg(target_arch = "arm")]
unsafe fn jump(stack_pointer: u32, entry: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "bx {entry}",
        sp = in(reg) stack_pointer,
        entry = in(reg) entry,
        options(noreturn, nomem, nostack),
    )
}
