//! Bound camera device
//!
//! [`CameraDevice`] wraps one opened handle and provides the vendor request
//! layer above the raw transfer primitives: capability and pixel clock
//! queries, GPIF configuration, LED control, and stream arming. Sensor
//! register operations live in [`crate::sensor`].

use std::sync::Arc;

use protocol::capabilities::CAPABILITY_PAYLOAD_LEN;
use protocol::{request, ControlRequest, DeviceCapabilities, PixelClockTable, UsbDeviceInfo};
use tracing::debug;

use crate::backend::{DeviceIo, CONTROL_TIMEOUT};
use crate::error::Result;

/// GPIF waveform descriptor driving continuous FIFO reads from the sensor
/// port. Uploaded once per power cycle before any register I/O.
const GPIF_WAVEFORM: [u8; 32] = [
    0x01, 0x00, 0x02, 0x00, 0x03, 0x80, 0x04, 0x00, 0x01, 0x00, 0x02, 0x01, 0x03, 0x80, 0x04,
    0x02, 0x07, 0x00, 0x07, 0x00, 0x07, 0x00, 0x07, 0x3F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x01,
];

/// Longest pixel clock description the device may return.
const PIXEL_CLOCK_DESC_MAX: usize = 64;

/// One bound camera handle plus the vendor request layer.
pub struct CameraDevice<D: DeviceIo> {
    io: Arc<D>,
    info: UsbDeviceInfo,
}

impl<D: DeviceIo> CameraDevice<D> {
    pub fn new(io: D) -> Self {
        let info = io.info().clone();
        Self {
            io: Arc::new(io),
            info,
        }
    }

    /// Enumeration record of the bound device.
    pub fn info(&self) -> &UsbDeviceInfo {
        &self.info
    }

    /// Shared transfer handle; the streaming worker clones this.
    pub(crate) fn io(&self) -> &Arc<D> {
        &self.io
    }

    /// Read the device capability payload.
    pub fn read_capabilities(&self) -> Result<DeviceCapabilities> {
        let mut buf = [0u8; CAPABILITY_PAYLOAD_LEN];
        let n = self.io.control_in(
            ControlRequest::vendor_in(request::READ_CAPABILITIES, 0, 0),
            &mut buf,
            CONTROL_TIMEOUT,
        )?;
        let caps = DeviceCapabilities::parse(&buf[..n])?;
        debug!(
            "device capabilities: gain {}..={}, exposure <= {} rows, window <= {}x{}",
            caps.recommended_min_global_gain,
            caps.max_global_gain,
            caps.max_exposure_rows,
            caps.max_window_width,
            caps.max_window_height
        );
        Ok(caps)
    }

    /// Enumerate the pixel clock table from the device.
    pub fn read_pixel_clock_table(&self) -> Result<PixelClockTable> {
        let mut count_buf = [0u8; 1];
        let n = self.io.control_in(
            ControlRequest::vendor_in(request::PIXEL_CLOCK_COUNT, 0, 0),
            &mut count_buf,
            CONTROL_TIMEOUT,
        )?;
        if n != 1 {
            return Err(protocol::UsbError::Io.into());
        }

        let count = count_buf[0] as usize;
        let mut descriptions = Vec::with_capacity(count);
        for index in 0..count {
            let mut buf = [0u8; PIXEL_CLOCK_DESC_MAX];
            let n = self.io.control_in(
                ControlRequest::vendor_in(request::PIXEL_CLOCK_DESCRIPTOR, index as u16, 0),
                &mut buf,
                CONTROL_TIMEOUT,
            )?;
            let text = std::str::from_utf8(&buf[..n])
                .map_err(|_| protocol::PayloadError::BadText)?
                .to_owned();
            descriptions.push(text);
        }

        debug!("pixel clock table: {:?}", descriptions);
        Ok(PixelClockTable::new(descriptions))
    }

    /// Upload the GPIF waveform configuration.
    ///
    /// Must complete before any sensor register I/O or streaming; the
    /// firmware rejects both until the transfer engine is configured.
    pub fn configure_gpif(&self) -> Result<()> {
        self.io.control_out(
            ControlRequest::vendor_out(request::GPIF_CONFIG, 0, 0),
            &GPIF_WAVEFORM,
            CONTROL_TIMEOUT,
        )?;
        debug!("GPIF waveform uploaded");
        Ok(())
    }

    /// Set the brightness of one illumination LED.
    pub fn led_write(&self, led_id: u8, brightness: u8) -> Result<()> {
        let value = u16::from(led_id) << 8 | u16::from(brightness);
        self.io.control_out(
            ControlRequest::vendor_out(request::LED_WRITE, value, 0),
            &[],
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }

    /// Arm the device-side stream engine.
    pub fn stream_arm(&self) -> Result<()> {
        self.io.control_out(
            ControlRequest::vendor_out(request::STREAM_START, 0, 0),
            &[],
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }

    /// Disarm the device-side stream engine.
    pub fn stream_disarm(&self) -> Result<()> {
        self.io.control_out(
            ControlRequest::vendor_out(request::STREAM_STOP, 0, 0),
            &[],
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }
}
