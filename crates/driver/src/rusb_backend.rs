//! rusb-backed USB implementation
//!
//! rusb exposes no isochronous submission API, so the streaming path reads
//! the GPIF FIFO through the bulk-capable configuration of endpoint 0x82
//! that the firmware sets up. Control and bulk traffic use independent
//! pipes; libusb device handles are safe to share across threads.

use std::sync::Mutex;
use std::time::Duration;

use protocol::{ControlRequest, UsbDeviceInfo, UsbError};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, UsbContext};
use tracing::{debug, warn};

use crate::backend::{DeviceIo, UsbBackend};

/// libusb-backed implementation of [`UsbBackend`].
pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }
}

impl UsbBackend for RusbBackend {
    type Device = RusbDevice;

    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let mut infos = Vec::new();
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            infos.push(read_device_info(&device, &descriptor, None));
        }

        Ok(infos)
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<RusbDevice, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if descriptor.vendor_id() != vendor_id || descriptor.product_id() != product_id {
                continue;
            }

            let mut handle = device.open().map_err(|e| {
                warn!(
                    "found {:04x}:{:04x} but failed to open: {}",
                    vendor_id, product_id, e
                );
                map_rusb_error(e)
            })?;

            match handle.kernel_driver_active(0) {
                Ok(true) => {
                    debug!("detaching kernel driver from interface 0");
                    handle.detach_kernel_driver(0).map_err(map_rusb_error)?;
                }
                Ok(false) => {}
                Err(e) => debug!("could not query kernel driver state: {}", e),
            }

            handle
                .set_active_configuration(1)
                .map_err(map_rusb_error)?;
            handle.claim_interface(0).map_err(map_rusb_error)?;

            let info = read_device_info(&device, &descriptor, Some(&handle));
            debug!("opened {}", info.description());

            return Ok(RusbDevice {
                handle,
                info,
                stream_endpoint: Mutex::new(None),
            });
        }

        Err(UsbError::NotFound)
    }
}

/// One opened camera handle.
pub struct RusbDevice {
    handle: DeviceHandle<Context>,
    info: UsbDeviceInfo,
    stream_endpoint: Mutex<Option<u8>>,
}

impl DeviceIo for RusbDevice {
    fn info(&self) -> &UsbDeviceInfo {
        &self.info
    }

    fn control_in(
        &self,
        request: ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .read_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                buf,
                timeout,
            )
            .map_err(map_rusb_error)
    }

    fn control_out(
        &self,
        request: ControlRequest,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .write_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                data,
                timeout,
            )
            .map_err(map_rusb_error)
    }

    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbError> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn stream_start(&self, endpoint: u8) -> Result<(), UsbError> {
        if endpoint & 0x80 == 0 {
            return Err(UsbError::InvalidParam);
        }
        let mut armed = self.stream_endpoint.lock().unwrap();
        *armed = Some(endpoint);
        Ok(())
    }

    fn stream_read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbError> {
        let endpoint = self
            .stream_endpoint
            .lock()
            .unwrap()
            .ok_or(UsbError::InvalidParam)?;
        self.bulk_in(endpoint, buf, timeout)
    }

    fn stream_stop(&self) -> Result<(), UsbError> {
        let mut armed = self.stream_endpoint.lock().unwrap();
        if armed.take().is_some() {
            debug!("stream pipe released");
        }
        Ok(())
    }
}

fn read_device_info(
    device: &Device<Context>,
    descriptor: &DeviceDescriptor,
    handle: Option<&DeviceHandle<Context>>,
) -> UsbDeviceInfo {
    // String descriptors need an open handle; fall back to a short-lived
    // open during plain enumeration.
    let strings = match handle {
        Some(h) => read_string_descriptors(descriptor, h),
        None => device
            .open()
            .ok()
            .map(|h| read_string_descriptors(descriptor, &h))
            .unwrap_or((None, None, None)),
    };
    let (manufacturer, product, serial_number) = strings;

    UsbDeviceInfo {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bus_number: device.bus_number(),
        device_address: device.address(),
        manufacturer,
        product,
        serial_number,
    }
}

fn read_string_descriptors(
    descriptor: &DeviceDescriptor,
    handle: &DeviceHandle<Context>,
) -> (Option<String>, Option<String>, Option<String>) {
    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    let serial_number = descriptor
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    (manufacturer, product, serial_number)
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other(err.to_string()),
    }
}
