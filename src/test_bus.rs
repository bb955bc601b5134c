//! In-memory USB bus with a host on the other end of endpoint 0, so
//! tests can run the usb-device engine against a session.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    vec::Vec,
};
use usb_device::{
    bus::{PollResult, UsbBus, UsbBusAllocator},
    class::UsbClass,
    device::{UsbDevice, UsbDeviceBuilder, UsbVidPid},
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection, UsbError,
};

use crate::{
    class::DeviceClass,
    identity::SerialDescriptor,
    session::{DeviceDescriptor, Session, StringTable},
};

pub const STANDARD_OUT: u8 = 0x00;
pub const STANDARD_IN: u8 = 0x80;
pub const CLASS_OUT: u8 = 0x21;
pub const CLASS_IN: u8 = 0xA1;

const SET_ADDRESS: u8 = 0x05;
const GET_DESCRIPTOR: u8 = 0x06;
const SET_CONFIGURATION: u8 = 0x09;
const DESCRIPTOR_CONFIGURATION: u16 = 0x02;

const EP0_SIZE: usize = 64;

#[derive(Default)]
struct Wire {
    setup: Option<[u8; 8]>,
    out: VecDeque<Vec<u8>>,
    /// Device to host bytes of the current transfer
    in_data: Vec<u8>,
    /// A packet was written and the host has not taken it yet
    in_pending: bool,
    stalled: bool,
}

impl Wire {
    fn has_events(&self) -> bool {
        self.in_pending || self.setup.is_some() || !self.out.is_empty()
    }
}

/// The device end of the wire.
#[derive(Clone, Default)]
pub struct TestBus {
    wire: Arc<Mutex<Wire>>,
}

impl TestBus {
    /// A leaked allocator on a fresh bus, and a handle to that bus.
    pub fn allocator() -> (&'static UsbBusAllocator<TestBus>, TestBus) {
        let bus = TestBus::default();
        let alloc = Box::leak(Box::new(UsbBusAllocator::new(bus.clone())));
        (alloc, bus)
    }

    fn wire(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap()
    }
}

impl UsbBus for TestBus {
    fn alloc_ep(
        &mut self,
        _ep_dir: UsbDirection,
        ep_addr: Option<EndpointAddress>,
        _ep_type: EndpointType,
        _max_packet_size: u16,
        _interval: u8,
    ) -> usb_device::Result<EndpointAddress> {
        // endpoint 0 only
        ep_addr.filter(|ep| ep.index() == 0).ok_or(UsbError::EndpointOverflow)
    }

    fn enable(&mut self) {}

    fn reset(&self) {
        let mut wire = self.wire();
        wire.in_pending = false;
        wire.stalled = false;
    }

    fn set_device_address(&self, _addr: u8) {}

    fn write(&self, ep_addr: EndpointAddress, buf: &[u8]) -> usb_device::Result<usize> {
        if ep_addr.index() != 0 {
            return Err(UsbError::InvalidEndpoint);
        }
        let mut wire = self.wire();
        wire.in_data.extend_from_slice(buf);
        wire.in_pending = true;
        Ok(buf.len())
    }

    fn read(&self, ep_addr: EndpointAddress, buf: &mut [u8]) -> usb_device::Result<usize> {
        if ep_addr.index() != 0 {
            return Err(UsbError::InvalidEndpoint);
        }
        let mut wire = self.wire();
        let packet = match wire.setup.take() {
            Some(setup) => setup.to_vec(),
            None => wire.out.pop_front().ok_or(UsbError::WouldBlock)?,
        };
        let dst = buf.get_mut(..packet.len()).ok_or(UsbError::BufferOverflow)?;
        dst.copy_from_slice(&packet);
        Ok(packet.len())
    }

    fn set_stalled(&self, _ep_addr: EndpointAddress, stalled: bool) {
        if stalled {
            self.wire().stalled = true;
        }
    }

    fn is_stalled(&self, _ep_addr: EndpointAddress) -> bool {
        self.wire().stalled
    }

    fn suspend(&self) {}

    fn resume(&self) {}

    /// One event per poll: IN completion first, then SETUP, then OUT.
    fn poll(&self) -> PollResult {
        let mut wire = self.wire();
        if wire.in_pending {
            wire.in_pending = false;
            PollResult::Data { ep_out: 0, ep_in_complete: 1, ep_setup: 0 }
        } else if wire.setup.is_some() {
            PollResult::Data { ep_out: 0, ep_in_complete: 0, ep_setup: 1 }
        } else if !wire.out.is_empty() {
            PollResult::Data { ep_out: 1, ep_in_complete: 0, ep_setup: 0 }
        } else {
            PollResult::None
        }
    }
}

/// The host stalled a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stall;

/// A host driving control transfers through a real [`UsbDevice`].
pub struct Host {
    bus: TestBus,
    dev: UsbDevice<'static, TestBus>,
}

impl Host {
    pub fn new(alloc: &'static UsbBusAllocator<TestBus>, bus: TestBus, device: &DeviceDescriptor) -> Self {
        let dev = UsbDeviceBuilder::new(alloc, UsbVidPid(device.vid, device.pid))
            .device_release(device.device_release)
            .max_packet_size_0(EP0_SIZE as u8)
            .build();
        Host { bus, dev }
    }

    /// Polls the engine until the wire is quiet, syncing the session
    /// after each poll like the interrupt handler does.
    fn run<C: DeviceClass<TestBus>>(&mut self, session: &mut Session<TestBus, C>) {
        for _ in 0..16 {
            if !self.bus.wire().has_events() {
                return;
            }
            let class: &mut dyn UsbClass<TestBus> = &mut *session;
            self.dev.poll(&mut [class]);
            session.sync(self.dev.state());
        }
        panic!("device never settled");
    }

    fn setup<C: DeviceClass<TestBus>>(
        &mut self,
        session: &mut Session<TestBus, C>,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) {
        let mut packet = [request_type, request, 0, 0, 0, 0, 0, 0];
        packet[2..4].copy_from_slice(&value.to_le_bytes());
        packet[4..6].copy_from_slice(&index.to_le_bytes());
        packet[6..8].copy_from_slice(&length.to_le_bytes());
        {
            // a SETUP clears any stall
            let mut wire = self.bus.wire();
            wire.stalled = false;
            wire.in_data.clear();
            wire.setup = Some(packet);
        }
        self.run(session);
    }

    pub fn control_out<C: DeviceClass<TestBus>>(
        &mut self,
        session: &mut Session<TestBus, C>,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), Stall> {
        self.setup(session, request_type, request, value, index, data.len() as u16);
        for chunk in data.chunks(EP0_SIZE) {
            self.bus.wire().out.push_back(chunk.to_vec());
            self.run(session);
        }
        if self.bus.wire().stalled { Err(Stall) } else { Ok(()) }
    }

    pub fn control_in<C: DeviceClass<TestBus>>(
        &mut self,
        session: &mut Session<TestBus, C>,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Result<Vec<u8>, Stall> {
        self.setup(session, request_type, request, value, index, length);
        let reply = {
            let mut wire = self.bus.wire();
            if wire.stalled {
                return Err(Stall);
            }
            core::mem::take(&mut wire.in_data)
        };
        // status stage
        self.bus.wire().out.push_back(Vec::new());
        self.run(session);
        Ok(reply)
    }

    /// SET_ADDRESS and SET_CONFIGURATION(1), as after enumeration.
    pub fn configure<C: DeviceClass<TestBus>>(&mut self, session: &mut Session<TestBus, C>) {
        self.control_out(session, STANDARD_OUT, SET_ADDRESS, 5, 0, &[]).unwrap();
        self.control_out(session, STANDARD_OUT, SET_CONFIGURATION, 1, 0, &[]).unwrap();
    }

    /// The complete configuration descriptor set.
    pub fn configuration<C: DeviceClass<TestBus>>(&mut self, session: &mut Session<TestBus, C>) -> Vec<u8> {
        self.control_in(session, STANDARD_IN, GET_DESCRIPTOR, DESCRIPTOR_CONFIGURATION << 8, 0, 255)
            .unwrap()
    }
}

/// Descriptors of `descriptor_type` within a configuration set.
pub fn descriptors(config: &[u8], descriptor_type: u8) -> Vec<Vec<u8>> {
    let mut found = Vec::new();
    let mut rest = config;
    while rest.len() >= 2 {
        let len = usize::from(rest[0]);
        if len < 2 || len > rest.len() {
            break;
        }
        if rest[1] == descriptor_type {
            found.push(rest[..len].to_vec());
        }
        rest = &rest[len..];
    }
    found
}

pub fn device() -> DeviceDescriptor {
    DeviceDescriptor { vid: 0x1234, pid: 0x5678, device_release: 0x0100 }
}

pub fn strings() -> StringTable {
    StringTable {
        manufacturer: "test",
        product: "test device",
        serial: SerialDescriptor::for_device(0),
    }
}

/// A connected session around `class`, and a host that configured it.
pub fn configured<C, F>(make_class: F) -> (Host, Session<TestBus, C>)
where
    C: DeviceClass<TestBus>,
    F: FnOnce(&'static UsbBusAllocator<TestBus>) -> C,
{
    let (alloc, bus) = TestBus::allocator();
    let mut session = Session::new(device(), strings(), make_class(alloc));
    session.initialize().unwrap();
    session.connect().unwrap();
    let mut host = Host::new(alloc, bus, &session.descriptors().device);
    host.configure(&mut session);
    (host, session)
}
