use cortex_m::{asm::delay, peripheral::NVIC};
use stm32f4xx_hal::{
    gpio::{
        gpioa::{PA11, PA12, PA8},
        Alternate, Output, PushPull,
    },
    otg_fs::USB,
    pac::{Interrupt, GPIOA, GPIOC, OTG_FS_DEVICE, OTG_FS_GLOBAL, OTG_FS_PWRCLK, RCC},
    prelude::*,
    rcc::Clocks,
};

use crate::board::{Board, Error};

/// 8 MHz crystal on the board
const HSE_MHZ: u32 = 8;
const SYSCLK_MHZ: u32 = 168;
/// Upper nibble is the implemented priority on the STM32F4
const USB_IRQ_PRIORITY: u8 = 1 << 4;
/// Cycles for the key's pull-up to settle before sampling
const KEY_SETTLE_CYCLES: u32 = 1_000;

/// The OTG_FS register blocks, handed to the USB core untouched.
pub struct UsbPeripherals {
    pub global: OTG_FS_GLOBAL,
    pub device: OTG_FS_DEVICE,
    pub pwrclk: OTG_FS_PWRCLK,
}

type UsbPins = (PA11<Alternate<10>>, PA12<Alternate<10>>);

/// STM32F407 board.
///
/// - PC13: override key, active low with internal pull-up
/// - PA8: D+ pull-up enable, active high
/// - PA11/PA12: USB OTG FS D-/D+
pub struct Stm32Board {
    override_asserted: bool,
    unique_id_addr: u32,
    rcc: Option<RCC>,
    clocks: Option<Clocks>,
    gpioa: Option<GPIOA>,
    pullup: Option<PA8<Output<PushPull>>>,
    usb_pins: Option<UsbPins>,
    usb: Option<UsbPeripherals>,
    nvic: NVIC,
}

impl Stm32Board {
    /// Samples the override key and keeps everything else for later.
    /// Clocks stay at reset defaults so that an application launch finds
    /// the chip untouched apart from GPIOC.
    pub fn new(
        rcc: RCC, gpioa: GPIOA, gpioc: GPIOC,
        usb: UsbPeripherals, nvic: NVIC, unique_id_addr: u32,
    ) -> Self {
        let gpioc = gpioc.split();
        let key = gpioc.pc13.into_pull_up_input();
        delay(KEY_SETTLE_CYCLES);
        let override_asserted = key.is_low();

        Stm32Board {
            override_asserted,
            unique_id_addr,
            rcc: Some(rcc),
            clocks: None,
            gpioa: Some(gpioa),
            pullup: None,
            usb_pins: None,
            usb: Some(usb),
            nvic,
        }
    }
}

impl Board for Stm32Board {
    type Usb = USB;

    fn override_asserted(&mut self) -> bool {
        self.override_asserted
    }

    fn configure_clock(&mut self) -> Result<(), Error> {
        let rcc = self.rcc.take().ok_or(Error::Clock)?;
        let clocks = rcc.constrain()
            .cfgr
            .use_hse(HSE_MHZ.MHz())
            .sysclk(SYSCLK_MHZ.MHz())
            .require_pll48clk()
            .freeze();
        // OTG FS needs exactly 48 MHz
        if !clocks.is_pll48clk_valid() {
            return Err(Error::Clock);
        }
        self.clocks = Some(clocks);
        Ok(())
    }

    fn configure_gpio(&mut self) -> Result<(), Error> {
        let gpioa = self.gpioa.take().ok_or(Error::Gpio)?.split();
        let mut pullup = gpioa.pa8.into_push_pull_output();
        pullup.set_low();
        self.pullup = Some(pullup);
        self.usb_pins = Some((gpioa.pa11.into_alternate(), gpioa.pa12.into_alternate()));
        Ok(())
    }

    fn configure_interrupt_priority(&mut self) -> Result<(), Error> {
        // stays masked until the USB core connects
        NVIC::mask(Interrupt::OTG_FS);
        unsafe {
            self.nvic.set_priority(Interrupt::OTG_FS, USB_IRQ_PRIORITY);
        }
        if NVIC::get_priority(Interrupt::OTG_FS) != USB_IRQ_PRIORITY {
            return Err(Error::Interrupt);
        }
        Ok(())
    }

    fn unique_id(&self) -> u32 {
        unsafe { core::ptr::read_volatile(self.unique_id_addr as *const u32) }
    }

    fn take_usb(&mut self) -> Result<USB, Error> {
        let clocks = self.clocks.ok_or(Error::UsbUnavailable)?;
        let (pin_dm, pin_dp) = self.usb_pins.take().ok_or(Error::UsbUnavailable)?;
        let usb = self.usb.take().ok_or(Error::UsbUnavailable)?;
        Ok(USB {
            usb_global: usb.global,
            usb_device: usb.device,
            usb_pwrclk: usb.pwrclk,
            pin_dm,
            pin_dp,
            hclk: clocks.hclk(),
        })
    }

    fn assert_pullup(&mut self) {
        if let Some(pullup) = self.pullup.as_mut() {
            pullup.set_high();
        }
    }
}
