#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

#[cfg(all(target_arch = "arm", not(any(feature = "semihosting", test))))]
use panic_halt as _;
#[cfg(all(target_arch = "arm", feature = "semihosting", not(test)))]
use panic_semihosting as _;

mod config;
mod image;
mod trampoline;
mod identity;
mod class;
mod session;
mod dfu;
mod board;
mod boot;
#[cfg(test)]
mod test_bus;

#[cfg(target_arch = "arm")]
mod init_log;
#[cfg(target_arch = "arm")]
mod pins;
#[cfg(target_arch = "arm")]
mod flash;
#[cfg(target_arch = "arm")]
mod usb;

/// Reset to idle: either hands the chip to the application or leaves
/// the DFU device on the bus, serviced from the OTG_FS interrupt.
#[cfg(all(target_arch = "arm", not(test)))]
#[cortex_m_rt::entry]
fn main() -> ! {
    use cortex_m::asm::wfi;
    use log::{error, info};
    use stm32f4xx_hal::pac::{CorePeripherals, Peripherals};

    use crate::{
        config::CONFIG,
        dfu::DfuClass,
        flash::Flash,
        image::FlashMemory,
        init_log::init_log,
        pins::{Stm32Board, UsbPeripherals},
        trampoline::Trampoline,
        usb::UsbDeviceCore,
    };

    let cp = CorePeripherals::take().unwrap();
    let dp = Peripherals::take().unwrap();

    init_log(cp.ITM);
    info!("dfu-boot");

    let usb = UsbPeripherals {
        global: dp.OTG_FS_GLOBAL,
        device: dp.OTG_FS_DEVICE,
        pwrclk: dp.OTG_FS_PWRCLK,
    };
    let mut board = Stm32Board::new(
        dp.RCC, dp.GPIOA, dp.GPIOC, usb, cp.NVIC, CONFIG.unique_id_addr,
    );
    let launcher = Trampoline { vector_table: CONFIG.app_base };
    let mut core = UsbDeviceCore::new();
    let flash = dp.FLASH;

    let result = boot::run(&CONFIG, &mut board, &FlashMemory, launcher, &mut core, |alloc| {
        DfuClass::new(alloc, Flash::new(flash), CONFIG.app_base..CONFIG.app_end)
    });
    if let Err(e) = result {
        error!("{}", e);
        panic!("boot failed");
    }

    loop {
        wfi();
    }
}
