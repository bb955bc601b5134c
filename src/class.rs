//! The contract between the generic device core and a concrete USB
//! class.
//!
//! A class is one type implementing all four hooks of [`DeviceClass`].
//! The session is generic over that one type, so hooks of two different
//! classes can never be mixed in a single device.

use core::fmt;
use usb_device::{
    class_prelude::{ControlIn, ControlOut, DescriptorWriter, StringIndex, UsbBus},
    control::Request,
    UsbDirection,
};

/// A class control request the core routed to the class. The class
/// owns the reply: it must accept or reject the transfer.
pub enum ControlTransfer<'a, 'p, 'r, B: UsbBus> {
    /// Host to device, data stage already received
    Out(ControlOut<'a, 'p, 'r, B>),
    /// Device to host
    In(ControlIn<'a, 'p, 'r, B>),
}

impl<B: UsbBus> ControlTransfer<'_, '_, '_, B> {
    pub fn request(&self) -> &Request {
        match self {
            ControlTransfer::Out(xfer) => xfer.request(),
            ControlTransfer::In(xfer) => xfer.request(),
        }
    }

    /// Answers with a STALL.
    pub fn reject(self) {
        let _ = match self {
            ControlTransfer::Out(xfer) => xfer.reject(),
            ControlTransfer::In(xfer) => xfer.reject(),
        };
    }
}

/// Why a class refused a lifecycle or data event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassError {
    /// Endpoint or request the class does not implement
    Unsupported,
    /// Event not valid in the class's current state
    InvalidState,
}

impl fmt::Display for ClassError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClassError::Unsupported => "unsupported request".fmt(fmt),
            ClassError::InvalidState => "request invalid in current state".fmt(fmt),
        }
    }
}

/// Hooks a class plugs into the device core.
pub trait DeviceClass<B: UsbBus> {
    /// Interface and class-specific descriptors of the configuration.
    fn configuration(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()>;

    /// String descriptors the class allocated, `None` for any other
    /// index.
    fn string(&self, index: StringIndex, lang_id: u16) -> Option<&str>;

    /// The host selected configuration `config`.
    fn on_activate(&mut self, config: u8) -> Result<(), ClassError>;

    /// Configuration `config` is going away (bus reset, deconfigure).
    fn on_deactivate(&mut self, config: u8);

    /// A class request addressed to an interface. A transfer dropped
    /// without an answer is stalled by the core.
    fn on_control_request(&mut self, xfer: ControlTransfer<'_, '_, '_, B>);

    /// A transfer on `endpoint` completed in `direction`. Endpoint 0
    /// reports the end of a class control transfer's data stage.
    fn on_data_transfer(&mut self, direction: UsbDirection, endpoint: u8) -> Result<(), ClassError>;
}
