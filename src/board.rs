use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    Clock,
    Gpio,
    Interrupt,
    /// The USB peripheral was requested before bring-up finished
    #[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
    UsbUnavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Clock => "clock configuration failed".fmt(fmt),
            Error::Gpio => "gpio configuration failed".fmt(fmt),
            Error::Interrupt => "interrupt configuration failed".fmt(fmt),
            Error::UsbUnavailable => "usb peripheral unavailable".fmt(fmt),
        }
    }
}

/// What the boot sequence needs from the hardware besides flash.
///
/// The `configure_*` steps run once each, in declaration order, before
/// anything on the USB side happens. Any of them failing is fatal.
pub trait Board {
    /// USB peripheral with clocks and pins set up
    type Usb;

    /// State of the manual override key, sampled once at reset.
    fn override_asserted(&mut self) -> bool;

    fn configure_clock(&mut self) -> Result<(), Error>;
    fn configure_gpio(&mut self) -> Result<(), Error>;
    fn configure_interrupt_priority(&mut self) -> Result<(), Error>;

    /// Factory-programmed unique id, 0 if unreadable.
    fn unique_id(&self) -> u32;

    fn take_usb(&mut self) -> Result<Self::Usb, Error>;

    /// Signals device presence on the bus.
    fn assert_pullup(&mut self);
}
