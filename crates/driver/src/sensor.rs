//! Sensor register control
//!
//! Every operation here is a synchronous round trip on the control channel.
//! The driver keeps no register mirror: external tools may alter sensor
//! state out of band, so the hardware value is the only authoritative one.
//! On failure the previous register state is assumed to still hold and the
//! caller may retry.

use byteorder::{BigEndian, ByteOrder};
use protocol::{registers, request, ControlRequest, DeviceCapabilities, FrameFormat, PixelClockTable, UsbError};
use tracing::debug;

use crate::backend::{DeviceIo, CONTROL_TIMEOUT};
use crate::device::CameraDevice;
use crate::error::{CameraError, Result};

/// Default integration time written during sensor bring-up, in row periods.
const DEFAULT_SHUTTER_ROWS: u16 = 500;

impl<D: DeviceIo> CameraDevice<D> {
    /// Read a 16-bit sensor register.
    pub fn register_read(&self, register: u16) -> std::result::Result<u16, UsbError> {
        let mut buf = [0u8; 2];
        let n = self.io().control_in(
            ControlRequest::vendor_in(request::SENSOR_READ, register, 0),
            &mut buf,
            CONTROL_TIMEOUT,
        )?;
        if n != 2 {
            return Err(UsbError::Io);
        }
        Ok(BigEndian::read_u16(&buf))
    }

    /// Write a 16-bit sensor register.
    ///
    /// No value validation happens here; the device itself rejects writes
    /// outside a register's accepted range. Use the typed setters below for
    /// clamped parameter updates.
    pub fn register_write(&self, register: u16, value: u16) -> std::result::Result<(), UsbError> {
        let mut data = [0u8; 2];
        BigEndian::write_u16(&mut data, value);
        self.io().control_out(
            ControlRequest::vendor_out(request::SENSOR_WRITE, register, 0),
            &data,
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }

    /// Run the sensor power-up sequence: reset pulse, output enable, window
    /// geometry, conservative gain and shutter defaults.
    ///
    /// One-time per physical power cycle. The facade guards against calling
    /// this while streaming.
    pub fn init_image_sensor(
        &self,
        caps: &DeviceCapabilities,
        format: FrameFormat,
    ) -> Result<()> {
        debug!("sensor power-up sequence, window {}x{}", format.width, format.height);

        self.register_write(caps.reset_reg, registers::RESET_ASSERT)?;
        self.register_write(caps.reset_reg, registers::RESET_RELEASE)?;
        self.register_write(registers::OUTPUT_CONTROL, registers::OUTPUT_ENABLE)?;
        self.apply_window(caps, format)?;
        self.register_write(caps.global_gain_reg, caps.recommended_min_global_gain)?;
        self.register_write(registers::SHUTTER_WIDTH_UPPER, 0)?;
        self.register_write(caps.shutter_width_lower_reg, DEFAULT_SHUTTER_ROWS)?;

        Ok(())
    }

    /// Program the active window registers.
    ///
    /// Takes effect at the next streaming start.
    pub fn apply_window(&self, caps: &DeviceCapabilities, format: FrameFormat) -> Result<()> {
        if format.width == 0
            || format.height == 0
            || format.width > u32::from(caps.max_window_width)
            || format.height > u32::from(caps.max_window_height)
        {
            return Err(CameraError::InvalidWindow {
                width: format.width,
                height: format.height,
                max_width: caps.max_window_width,
                max_height: caps.max_window_height,
            });
        }

        // Size registers hold the last row/column index, not the count.
        self.register_write(registers::ROW_SIZE, format.height as u16 - 1)?;
        self.register_write(registers::COL_SIZE, format.width as u16 - 1)?;
        Ok(())
    }

    /// Set the global gain, clamped to the device-reported range.
    ///
    /// Returns the value actually written.
    pub fn set_global_gain(&self, caps: &DeviceCapabilities, value: u16) -> Result<u16> {
        let clamped = caps.clamp_global_gain(value);
        if clamped != value {
            debug!("global gain {} clamped to {}", value, clamped);
        }
        self.register_write(caps.global_gain_reg, clamped)?;
        Ok(clamped)
    }

    /// Set the integration time in row periods, clamped to the device
    /// maximum. Returns the value actually written.
    pub fn set_exposure_rows(&self, caps: &DeviceCapabilities, rows: u16) -> Result<u16> {
        let clamped = caps.clamp_exposure(rows);
        if clamped != rows {
            debug!("exposure {} rows clamped to {}", rows, clamped);
        }
        self.register_write(registers::SHUTTER_WIDTH_UPPER, 0)?;
        self.register_write(caps.shutter_width_lower_reg, clamped)?;
        Ok(clamped)
    }

    /// Select a pixel clock frequency by table index.
    pub fn set_pixel_clock(&self, table: &PixelClockTable, index: usize) -> Result<()> {
        if !table.contains(index) {
            return Err(CameraError::InvalidPixelClockIndex {
                index,
                count: table.len(),
            });
        }
        self.register_write(registers::PIXEL_CLOCK_CONTROL, index as u16)?;
        Ok(())
    }
}
