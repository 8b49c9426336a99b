//! Camera facade
//!
//! [`Lumascope`] is the single entry point an acquisition host works with.
//! It owns at most one bound device at a time: whichever enumeration call
//! matched first becomes the implicit target of every subsequent register
//! and streaming operation. It also tracks the bring-up state machine
//! (bound -> firmware loaded -> GPIF configured -> sensor initialized ->
//! streaming) and rejects out-of-order operations with typed errors
//! instead of letting them reach hardware in an undefined state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::channel::StreamEvent;
use protocol::{
    DeviceCapabilities, DeviceIdentity, FirmwareImage, FrameFormat, PixelClockTable,
};
use tracing::{debug, info, warn};

use crate::backend::UsbBackend;
use crate::device::CameraDevice;
use crate::error::{CameraError, Result};
use crate::firmware::upload_firmware;
use crate::stream::{FrameSnapshot, StreamController};

/// Which product id the bound handle was opened under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundState {
    /// Bare bootloader, awaiting firmware.
    Loader,
    /// Firmware-loaded camera.
    Camera,
}

/// Driver facade for one Lumascope camera.
pub struct Lumascope<B: UsbBackend> {
    backend: B,
    identity: DeviceIdentity,
    format: FrameFormat,
    hex_path: Option<PathBuf>,

    device: Option<CameraDevice<B::Device>>,
    bound_state: Option<BoundState>,
    capabilities: Option<DeviceCapabilities>,
    pixel_clocks: Option<PixelClockTable>,
    gpif_initialized: bool,
    sensor_initialized: bool,
    stream: StreamController,
}

impl<B: UsbBackend> Lumascope<B> {
    pub fn new(backend: B, identity: DeviceIdentity, format: FrameFormat) -> Self {
        Self {
            backend,
            identity,
            format,
            hex_path: None,
            device: None,
            bound_state: None,
            capabilities: None,
            pixel_clocks: None,
            gpif_initialized: false,
            sensor_initialized: false,
            stream: StreamController::new(),
        }
    }

    /// Configured firmware image path.
    pub fn hex_path(&self) -> Option<&Path> {
        self.hex_path.as_deref()
    }

    /// Set the firmware image path used by [`Self::load_firmware`].
    pub fn set_hex_path(&mut self, path: impl Into<PathBuf>) {
        self.hex_path = Some(path.into());
    }

    /// USB vendor id of the bound device, or the configured identity.
    pub fn vendor_id(&self) -> u16 {
        match &self.device {
            Some(device) => device.info().vendor_id,
            None => self.identity.vendor_id,
        }
    }

    /// USB product id of the bound device, or the configured camera id.
    pub fn product_id(&self) -> u16 {
        match &self.device {
            Some(device) => device.info().product_id,
            None => self.identity.product_id_camera,
        }
    }

    /// Product name string of the bound device.
    pub fn product_name(&self) -> String {
        self.device
            .as_ref()
            .and_then(|d| d.info().product.clone())
            .unwrap_or_else(|| "Lumascope".to_string())
    }

    /// Whether a device is currently bound.
    pub fn is_bound(&self) -> bool {
        self.device.is_some()
    }

    /// Whether the stream worker is running.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_streaming()
    }

    /// Human-readable descriptions of every attached device matching the
    /// identity in either boot state.
    pub fn device_description_list(&self) -> Result<Vec<String>> {
        let devices = self.backend.devices()?;
        Ok(devices
            .iter()
            .filter(|d| self.identity.matches_any(d.vendor_id, d.product_id))
            .map(|d| d.description())
            .collect())
    }

    /// Scan for a camera still in bootloader state and bind it.
    ///
    /// Returns `Ok(false)` when nothing matches — the expected "not plugged
    /// in yet" case, to be retried by the caller. First match wins.
    pub fn find_uninitialized_camera(&mut self) -> Result<bool> {
        self.bind(self.identity.product_id_loader, BoundState::Loader)
    }

    /// Scan for a firmware-loaded camera and bind it.
    ///
    /// On success the device capabilities and pixel clock table are read
    /// once and kept for the session.
    pub fn find_initialized_camera(&mut self) -> Result<bool> {
        if !self.bind(self.identity.product_id_camera, BoundState::Camera)? {
            return Ok(false);
        }

        let device = self.device.as_ref().expect("just bound");
        match device
            .read_capabilities()
            .and_then(|caps| device.read_pixel_clock_table().map(|table| (caps, table)))
        {
            Ok((caps, table)) => {
                self.capabilities = Some(caps);
                self.pixel_clocks = Some(table);
                Ok(true)
            }
            Err(e) => {
                warn!("capability query failed, unbinding: {}", e);
                self.unbind();
                Err(e)
            }
        }
    }

    fn bind(&mut self, product_id: u16, state: BoundState) -> Result<bool> {
        if self.stream.is_streaming() {
            return Err(CameraError::StreamingActive);
        }

        match self.backend.open(self.identity.vendor_id, product_id) {
            Ok(io) => {
                let device = CameraDevice::new(io);
                info!("bound {}", device.info().description());
                self.device = Some(device);
                self.bound_state = Some(state);
                self.capabilities = None;
                self.pixel_clocks = None;
                self.gpif_initialized = false;
                self.sensor_initialized = false;
                Ok(true)
            }
            Err(protocol::UsbError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the bound device and all session state derived from it.
    pub fn unbind(&mut self) {
        self.stream.stop();
        self.device = None;
        self.bound_state = None;
        self.capabilities = None;
        self.pixel_clocks = None;
        self.gpif_initialized = false;
        self.sensor_initialized = false;
    }

    /// Upload the configured firmware image to a bound bootloader device.
    ///
    /// The device renumerates afterwards, so the binding is dropped; call
    /// [`Self::find_initialized_camera`] (retrying as needed) to pick the
    /// camera back up.
    pub fn load_firmware(&mut self) -> Result<()> {
        let device = self.device.as_ref().ok_or(CameraError::NotBound)?;
        if self.bound_state != Some(BoundState::Loader) {
            return Err(CameraError::NotInLoaderState);
        }
        let path = self.hex_path.as_ref().ok_or(CameraError::HexPathNotSet)?;

        let image = FirmwareImage::load(path)?;
        upload_firmware(device.io().as_ref(), &image)?;

        // The loader handle died with the renumeration.
        self.unbind();
        Ok(())
    }

    /// Configure the GPIF transfer engine.
    ///
    /// Required before any sensor register I/O or streaming.
    pub fn initialize_gpif(&mut self) -> Result<()> {
        let device = self.camera_device()?;
        device.configure_gpif()?;
        self.gpif_initialized = true;
        Ok(())
    }

    /// Run the sensor power-up sequence.
    pub fn init_image_sensor(&mut self) -> Result<()> {
        if self.stream.is_streaming() {
            return Err(CameraError::StreamingActive);
        }
        if !self.gpif_initialized {
            return Err(CameraError::GpifNotInitialized);
        }
        let caps = self.capabilities.ok_or(CameraError::NotBound)?;
        let format = self.format;
        self.camera_device()?.init_image_sensor(&caps, format)?;
        self.sensor_initialized = true;
        Ok(())
    }

    /// Read a sensor register.
    pub fn register_read(&self, register: u16) -> Result<u16> {
        let device = self.register_io_device()?;
        Ok(device.register_read(register)?)
    }

    /// Write a sensor register. Raw values pass through unvalidated; the
    /// device rejects out-of-range writes.
    pub fn register_write(&self, register: u16, value: u16) -> Result<()> {
        let device = self.register_io_device()?;
        Ok(device.register_write(register, value)?)
    }

    /// Set the global gain, clamped to the device-reported range.
    /// Returns the value actually written.
    pub fn set_global_gain(&self, value: u16) -> Result<u16> {
        let caps = self.capabilities.ok_or(CameraError::NotBound)?;
        let device = self.register_io_device()?;
        device.set_global_gain(&caps, value)
    }

    /// Set the integration time in row periods, clamped to the device
    /// maximum. Returns the value actually written.
    pub fn set_exposure(&self, rows: u16) -> Result<u16> {
        let caps = self.capabilities.ok_or(CameraError::NotBound)?;
        let device = self.register_io_device()?;
        device.set_exposure_rows(&caps, rows)
    }

    /// Select a pixel clock frequency from the enumerated table by index.
    pub fn set_pixel_clock_frequency(&self, index: usize) -> Result<()> {
        let table = self.pixel_clocks.as_ref().ok_or(CameraError::NotBound)?;
        let device = self.register_io_device()?;
        device.set_pixel_clock(table, index)
    }

    /// Number of entries in the pixel clock table.
    pub fn pixel_clock_description_count(&self) -> usize {
        self.pixel_clocks.as_ref().map_or(0, PixelClockTable::len)
    }

    /// Description of one pixel clock table entry.
    pub fn pixel_clock_description(&self, index: usize) -> Option<&str> {
        self.pixel_clocks.as_ref()?.description(index)
    }

    /// Capabilities read from the bound device at bind time.
    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.as_ref()
    }

    /// Current frame geometry.
    pub fn frame_format(&self) -> FrameFormat {
        self.format
    }

    /// Set a square capture window.
    pub fn set_window_size(&mut self, side: u32) -> Result<()> {
        self.set_window(side, side)
    }

    /// Set the capture window geometry.
    ///
    /// Rejected while streaming; the sensor registers are reprogrammed
    /// immediately when the sensor is up, and the new geometry applies
    /// from the next stream start.
    pub fn set_window(&mut self, width: u32, height: u32) -> Result<()> {
        if self.stream.is_streaming() {
            return Err(CameraError::StreamingActive);
        }

        let format = FrameFormat::new(width, height);
        if self.sensor_initialized {
            let caps = self.capabilities.ok_or(CameraError::NotBound)?;
            self.camera_device()?.apply_window(&caps, format)?;
        } else if let Some(caps) = &self.capabilities {
            if width == 0
                || height == 0
                || width > u32::from(caps.max_window_width)
                || height > u32::from(caps.max_window_height)
            {
                return Err(CameraError::InvalidWindow {
                    width,
                    height,
                    max_width: caps.max_window_width,
                    max_height: caps.max_window_height,
                });
            }
        }

        self.format = format;
        Ok(())
    }

    /// Set the brightness of one illumination LED.
    pub fn led_write(&self, led_id: u8, brightness: u8) -> Result<()> {
        self.camera_device()?.led_write(led_id, brightness)
    }

    /// Arm the isochronous stream and start the receive worker.
    ///
    /// Fails without state change when GPIF or sensor init has not
    /// completed, or when already streaming.
    pub fn iso_stream_start(&mut self) -> Result<()> {
        if self.stream.is_streaming() {
            return Err(CameraError::StreamingActive);
        }
        if !self.gpif_initialized {
            return Err(CameraError::GpifNotInitialized);
        }
        if !self.sensor_initialized {
            return Err(CameraError::SensorNotInitialized);
        }

        let device = self.camera_device()?;
        device.stream_arm()?;
        let io = Arc::clone(device.io());
        self.stream.start(io, self.format)?;
        Ok(())
    }

    /// Stop streaming. Idempotent: a stop while idle is a no-op.
    pub fn iso_stream_stop(&mut self) {
        let was_streaming = self.stream.is_streaming();
        self.stream.stop();

        if was_streaming {
            if let Ok(device) = self.camera_device() {
                if let Err(e) = device.stream_disarm() {
                    debug!("stream disarm failed: {}", e);
                }
            }
        }
    }

    /// Externally-facing alias of [`Self::iso_stream_start`].
    pub fn start_streaming(&mut self) -> Result<()> {
        self.iso_stream_start()
    }

    /// Externally-facing alias of [`Self::iso_stream_stop`].
    pub fn stop_streaming(&mut self) {
        self.iso_stream_stop()
    }

    /// The most recently published 24 bpp frame. Never blocks waiting for
    /// a new frame.
    pub fn latest_24bpp_buffer(&self) -> FrameSnapshot {
        self.stream.latest_frame()
    }

    /// Cumulative stream bytes received since the last reset.
    pub fn bytes_received(&self) -> u64 {
        self.stream.bytes_received()
    }

    /// Reset the received-byte counter.
    pub fn reset_bytes_received(&self) {
        self.stream.reset_bytes_received()
    }

    /// Drain pending streaming worker events (diagnostics).
    pub fn stream_events(&self) -> Vec<StreamEvent> {
        self.stream.drain_events()
    }

    /// Bound device in camera state, for operations the bootloader cannot
    /// serve.
    fn camera_device(&self) -> Result<&CameraDevice<B::Device>> {
        let device = self.device.as_ref().ok_or(CameraError::NotBound)?;
        if self.bound_state != Some(BoundState::Camera) {
            return Err(CameraError::FirmwareNotLoaded);
        }
        Ok(device)
    }

    /// Bound camera with the transfer engine up, for register I/O.
    fn register_io_device(&self) -> Result<&CameraDevice<B::Device>> {
        let device = self.camera_device()?;
        if !self.gpif_initialized {
            return Err(CameraError::GpifNotInitialized);
        }
        Ok(device)
    }
}

impl<B: UsbBackend> Drop for Lumascope<B> {
    fn drop(&mut self) {
        self.stream.stop();
    }
}
