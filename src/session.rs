use core::{fmt, marker::PhantomData};
use log::{debug, info, warn};
use usb_device::{
    class_prelude::*,
    control::{Recipient, Request, RequestType},
    device::UsbDeviceState,
    UsbDirection,
};

use crate::{
    class::{ClassError, ControlTransfer, DeviceClass},
    identity::SerialDescriptor,
};

#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    pub vid: u16,
    pub pid: u16,
    pub device_release: u16,
}

#[derive(Clone, Debug)]
pub struct StringTable {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial: SerialDescriptor,
}

/// Everything the host can read about the device besides what the
/// class describes itself. Immutable once it is part of a [`Session`].
#[derive(Clone, Debug)]
pub struct Descriptors {
    pub device: DeviceDescriptor,
    pub strings: StringTable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Uninitialized,
    /// Core is ready to respond, bus not signalled yet
    Initialized,
    /// Pull-up asserted, host may enumerate
    Connected,
    Addressed,
    Configured(u8),
    Suspended,
}

impl fmt::Display for Status {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Uninitialized => "uninitialized".fmt(fmt),
            Status::Initialized => "initialized".fmt(fmt),
            Status::Connected => "connected".fmt(fmt),
            Status::Addressed => "addressed".fmt(fmt),
            Status::Configured(config) => write!(fmt, "configured({})", config),
            Status::Suspended => "suspended".fmt(fmt),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    InvalidTransition { from: Status, to: Status },
    NotConfigured,
    /// The core engine already holds a session
    CoreInUse,
    Class(ClassError),
}

impl From<ClassError> for Error {
    fn from(e: ClassError) -> Self {
        Error::Class(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidTransition { from, to } => {
                write!(fmt, "invalid transition {} -> {}", from, to)
            }
            Error::NotConfigured => "device not configured".fmt(fmt),
            Error::CoreInUse => "device core already in use".fmt(fmt),
            Error::Class(e) => {
                "class: ".fmt(fmt)?;
                e.fmt(fmt)
            }
        }
    }
}

/// The USB device core engine that takes over a composed session.
pub trait UsbCore<C> {
    /// USB peripheral handed over by the board after bring-up
    type Peripheral;
    type Bus: UsbBus + 'static;

    /// Turns the peripheral into the allocator the class reserves its
    /// interface and strings from. Must not touch the bus lines.
    fn bus(&mut self, peripheral: Self::Peripheral) -> Result<&'static UsbBusAllocator<Self::Bus>, Error>;

    /// Takes ownership of the session for the rest of the process and
    /// moves it to [`Status::Initialized`].
    fn initialize(&mut self, session: Session<Self::Bus, C>) -> Result<(), Error>;

    /// The pull-up is asserted: move the session to
    /// [`Status::Connected`] and start servicing the bus.
    fn connect(&mut self) -> Result<(), Error>;
}

/// Descriptors, strings, the class, and the device status, bound
/// together for one device on bus `B`.
///
/// Only the status changes after construction. The class is a single
/// type, so all four hooks always come from the same class.
pub struct Session<B, C> {
    descriptors: Descriptors,
    class: C,
    status: Status,
    suspended_from: Status,
    /// Endpoint 0 data stage that completed since the last poll
    ep0_done: Option<UsbDirection>,
    _bus: PhantomData<B>,
}

/// Class requests go to the class; standard ones stay with the engine.
fn is_class_request(req: &Request) -> bool {
    req.request_type == RequestType::Class && req.recipient == Recipient::Interface
}

impl<B, C> Session<B, C> {
    pub fn new(device: DeviceDescriptor, strings: StringTable, class: C) -> Self {
        Session {
            descriptors: Descriptors { device, strings },
            class,
            status: Status::Uninitialized,
            suspended_from: Status::Uninitialized,
            ep0_done: None,
            _bus: PhantomData,
        }
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    pub fn status(&self) -> Status {
        self.status
    }

    fn transition(&mut self, from: Status, to: Status) -> Result<(), Error> {
        if self.status != from {
            return Err(Error::InvalidTransition { from: self.status, to });
        }
        debug!("session {} -> {}", from, to);
        self.status = to;
        Ok(())
    }

    pub(crate) fn initialize(&mut self) -> Result<(), Error> {
        self.transition(Status::Uninitialized, Status::Initialized)
    }

    pub(crate) fn connect(&mut self) -> Result<(), Error> {
        self.transition(Status::Initialized, Status::Connected)?;
        info!("USB connected");
        Ok(())
    }

    fn is_attached(&self) -> bool {
        !matches!(self.status, Status::Uninitialized | Status::Initialized)
    }

    pub fn set_address(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Connected | Status::Addressed => {
                self.status = Status::Addressed;
                Ok(())
            }
            from => Err(Error::InvalidTransition { from, to: Status::Addressed }),
        }
    }

    pub fn suspend(&mut self) {
        if self.is_attached() && self.status != Status::Suspended {
            self.suspended_from = self.status;
            self.status = Status::Suspended;
        }
    }

    pub fn resume(&mut self) {
        if self.status == Status::Suspended {
            self.status = self.suspended_from;
        }
    }
}

impl<B: UsbBus, C: DeviceClass<B>> Session<B, C> {
    fn deactivate(&mut self) {
        if let Status::Configured(config) = self.status {
            self.class.on_deactivate(config);
        }
    }

    /// Bus reset: back to the default state, dropping the configuration.
    pub fn bus_reset(&mut self) {
        if !self.is_attached() {
            return;
        }
        self.deactivate();
        self.status = Status::Connected;
        self.ep0_done = None;
    }

    /// SET_CONFIGURATION. `0` deconfigures.
    pub fn set_configuration(&mut self, config: u8) -> Result<(), Error> {
        let to = if config == 0 { Status::Addressed } else { Status::Configured(config) };
        match self.status {
            Status::Addressed | Status::Configured(_) => {}
            from => return Err(Error::InvalidTransition { from, to }),
        }
        if self.status == to {
            return Ok(());
        }
        self.deactivate();
        self.status = Status::Addressed;
        if config != 0 {
            self.class.on_activate(config)?;
            self.status = to;
            info!("USB configured ({})", config);
        }
        Ok(())
    }

    /// Follows the state reported by the `usb-device` engine, firing
    /// the class hooks on the way.
    pub fn sync(&mut self, state: UsbDeviceState) {
        if state != UsbDeviceState::Suspend {
            self.resume();
        }
        let result = match (state, self.status) {
            (UsbDeviceState::Suspend, _) => {
                self.suspend();
                Ok(())
            }
            (UsbDeviceState::Default, Status::Connected) => Ok(()),
            (UsbDeviceState::Default, _) => {
                self.bus_reset();
                Ok(())
            }
            (UsbDeviceState::Addressed, Status::Addressed) => Ok(()),
            (UsbDeviceState::Addressed, Status::Configured(_)) => self.set_configuration(0),
            (UsbDeviceState::Addressed, _) => self.set_address(),
            (UsbDeviceState::Configured, Status::Configured(_)) => Ok(()),
            (UsbDeviceState::Configured, _) => {
                // usb-device only supports configuration 1
                self.set_address().and_then(|_| self.set_configuration(1))
            }
        };
        if let Err(e) = result {
            warn!("session sync: {}", e);
        }
    }

    /// Hands a class request to the class, or stalls it while the
    /// device is not configured.
    pub fn control_request(&mut self, xfer: ControlTransfer<'_, '_, '_, B>) -> Result<(), Error> {
        match self.status {
            Status::Configured(_) => {
                self.class.on_control_request(xfer);
                Ok(())
            }
            _ => {
                xfer.reject();
                Err(Error::NotConfigured)
            }
        }
    }

    pub fn data_transfer(&mut self, direction: UsbDirection, endpoint: u8) -> Result<(), Error> {
        match self.status {
            Status::Configured(_) => Ok(self.class.on_data_transfer(direction, endpoint)?),
            _ => Err(Error::NotConfigured),
        }
    }

    fn route(&mut self, xfer: ControlTransfer<'_, '_, '_, B>, direction: UsbDirection) {
        let request = xfer.request().request;
        match self.control_request(xfer) {
            Ok(()) => self.ep0_done = Some(direction),
            Err(e) => debug!("class request {:#04x}: {}", request, e),
        }
    }
}

impl<B: UsbBus, C: DeviceClass<B>> UsbClass<B> for Session<B, C> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        self.class.configuration(writer)
    }

    fn get_string(&self, index: StringIndex, lang_id: u16) -> Option<&str> {
        self.class.string(index, lang_id)
    }

    fn reset(&mut self) {
        self.bus_reset();
    }

    fn poll(&mut self) {
        if let Some(direction) = self.ep0_done.take() {
            if let Err(e) = self.data_transfer(direction, 0) {
                warn!("data transfer: {}", e);
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        if is_class_request(xfer.request()) {
            self.route(ControlTransfer::Out(xfer), UsbDirection::Out);
        }
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        if is_class_request(xfer.request()) {
            self.route(ControlTransfer::In(xfer), UsbDirection::In);
        }
    }
}
