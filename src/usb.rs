use cortex_m::interrupt::free;
use stm32f4xx_hal::{
    otg_fs::{UsbBus as Bus, USB},
    pac::{interrupt, Interrupt, NVIC},
};
use usb_device::{
    class_prelude::UsbBusAllocator,
    prelude::{UsbDevice, UsbDeviceBuilder, UsbVidPid},
};

use crate::{
    dfu::DfuClass,
    flash::Flash,
    identity::SerialText,
    session::{Error, Session, Status, UsbCore},
};

pub type BootClass = DfuClass<Bus<USB>, Flash>;
type BootSession = Session<Bus<USB>, BootClass>;
type Allocator = UsbBusAllocator<Bus<USB>>;

static mut EP_MEMORY: [u32; 1024] = [0; 1024];
static mut STATE: Option<State> = None;

/// Owned by the OTG_FS interrupt once connected.
struct State {
    dev: UsbDevice<'static, Bus<USB>>,
    session: BootSession,
}

impl State {
    fn get() -> Option<&'static mut Self> {
        unsafe { STATE.as_mut() }
    }

    fn poll(&mut self) {
        self.dev.poll(&mut [&mut self.session]);
        self.session.sync(self.dev.state());
    }
}

/// usb-device engine on the OTG FS peripheral.
pub struct UsbDeviceCore {
    bus: Option<&'static Allocator>,
    session: Option<BootSession>,
}

impl UsbDeviceCore {
    pub const fn new() -> Self {
        UsbDeviceCore { bus: None, session: None }
    }
}

impl UsbCore<BootClass> for UsbDeviceCore {
    type Peripheral = USB;
    type Bus = Bus<USB>;

    fn bus(&mut self, usb: USB) -> Result<&'static Allocator, Error> {
        let bus: &'static Allocator = cortex_m::singleton!(
            : Allocator = Bus::new(usb, unsafe { &mut EP_MEMORY })
        ).ok_or(Error::CoreInUse)?;
        self.bus = Some(bus);
        Ok(bus)
    }

    fn initialize(&mut self, mut session: BootSession) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::CoreInUse);
        }
        session.initialize()?;
        self.session = Some(session);
        Ok(())
    }

    fn connect(&mut self) -> Result<(), Error> {
        let not_initialized = Error::InvalidTransition {
            from: Status::Uninitialized,
            to: Status::Connected,
        };
        let bus = self.bus.ok_or(not_initialized)?;
        let mut session = self.session.take().ok_or(not_initialized)?;

        // usb-device wants the serial number as text that outlives the device
        let serial: &'static SerialText = cortex_m::singleton!(
            : SerialText = session.descriptors().strings.serial.to_text()
        ).ok_or(Error::CoreInUse)?;
        let desc = &session.descriptors().device;
        let strings = &session.descriptors().strings;
        let dev = UsbDeviceBuilder::new(bus, UsbVidPid(desc.vid, desc.pid))
            .manufacturer(strings.manufacturer)
            .product(strings.product)
            .serial_number(serial.as_str())
            .device_release(desc.device_release)
            .max_packet_size_0(64)
            .build();

        session.connect()?;
        free(|_| {
            unsafe { STATE = Some(State { dev, session }); }
        });

        unsafe {
            NVIC::unmask(Interrupt::OTG_FS);
        }
        Ok(())
    }
}

#[interrupt]
fn OTG_FS() {
    free(|_| {
        if let Some(state) = State::get() {
            state.poll();
        }
    });
}
