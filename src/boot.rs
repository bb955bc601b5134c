use core::fmt;
use log::{info, warn};
use usb_device::class_prelude::UsbBusAllocator;

use crate::{
    board::{self, Board},
    class::DeviceClass,
    config::BootConfig,
    identity::SerialDescriptor,
    image::{AppImage, ImageSource},
    session::{self, DeviceDescriptor, Session, StringTable, UsbCore},
    trampoline::Launcher,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootMode {
    Launch(AppImage),
    Update,
}

/// The override key wins over any image.
pub fn decide(override_asserted: bool, image: Option<AppImage>) -> BootMode {
    match (override_asserted, image) {
        (false, Some(image)) => BootMode::Launch(image),
        _ => BootMode::Update,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    BringUp(board::Error),
    Session(session::Error),
}

impl From<board::Error> for Error {
    fn from(e: board::Error) -> Self {
        Error::BringUp(e)
    }
}

impl From<session::Error> for Error {
    fn from(e: session::Error) -> Self {
        Error::Session(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BringUp(e) => {
                "bring-up: ".fmt(fmt)?;
                e.fmt(fmt)
            }
            Error::Session(e) => {
                "usb session: ".fmt(fmt)?;
                e.fmt(fmt)
            }
        }
    }
}

/// Runs everything between reset and the idle loop.
///
/// Launches the application when there is one and the key is not held;
/// that path never returns. Otherwise brings the board up and leaves the
/// device connected with the class `make_class` builds on the bus
/// allocator. Every write the boot context makes happens before the
/// pull-up; afterwards only `core` touches the session.
pub fn run<B, S, L, U, C, F>(
    config: &BootConfig,
    board: &mut B,
    flash: &S,
    launcher: L,
    core: &mut U,
    make_class: F,
) -> Result<(), Error>
where
    B: Board,
    S: ImageSource,
    L: Launcher,
    U: UsbCore<C, Peripheral = B::Usb>,
    C: DeviceClass<U::Bus>,
    F: FnOnce(&'static UsbBusAllocator<U::Bus>) -> C,
{
    let override_asserted = board.override_asserted();
    let image = AppImage::probe(flash, config);
    match decide(override_asserted, image) {
        BootMode::Launch(image) => {
            info!(
                "starting application, sp={:#010x} entry={:#010x}",
                image.stack_pointer, image.entry
            );
            launcher.launch(image)
        }
        BootMode::Update if override_asserted => info!("override key held, staying in DFU mode"),
        BootMode::Update => warn!("no application at {:#010x}", config.app_base),
    }

    board.configure_clock()?;
    board.configure_gpio()?;
    board.configure_interrupt_priority()?;

    let unique_id = board.unique_id();
    if unique_id == 0 {
        warn!("unique id unavailable, keeping placeholder serial");
    }
    let strings = StringTable {
        manufacturer: config.manufacturer,
        product: config.product,
        serial: SerialDescriptor::for_device(unique_id),
    };
    let device = DeviceDescriptor {
        vid: config.vid,
        pid: config.pid,
        device_release: config.device_release,
    };

    let usb = board.take_usb()?;
    let alloc = core.bus(usb)?;
    let session = Session::new(device, strings, make_class(alloc));
    core.initialize(session)?;
    board.assert_pullup();
    core.connect()?;
    Ok(())
}
