//! Simulated camera backend
//!
//! A full software model of the device for tests and offline development:
//! the FX2 bootloader (RAM upload, CPUCS reset, renumeration under the
//! camera product id), the GPIF gate in front of register I/O, a register
//! file with device-side range enforcement on the gain register, capability
//! and pixel clock payloads, and a delimiter-framed 24 bpp frame generator.
//!
//! Frames are solid-filled with a per-frame value that increments, so a
//! torn frame is detectable as a mixed-value buffer. Noise mode fills
//! frames with random bytes below 0x80 instead (the delimiter contains
//! bytes above 0x80, so noise can never alias it).
//!
//! Fault injection: detach, register write failure, a partial frame
//! followed by bus silence, and a bounded number of generated frames.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use protocol::{
    registers, request, ControlRequest, DeviceCapabilities, DeviceIdentity, UsbDeviceInfo,
    UsbError, FRAME_DELIMITER,
};
use rand::Rng;

use crate::backend::{DeviceIo, UsbBackend};

/// Simulated USB backend holding one camera.
#[derive(Clone)]
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    identity: DeviceIdentity,
    attached: bool,
    generation: u64,

    firmware_loaded: bool,
    cpu_held: bool,
    firmware_bytes: usize,

    gpif_configured: bool,
    registers: HashMap<u16, u16>,
    leds: HashMap<u8, u8>,
    capabilities: DeviceCapabilities,
    pixel_clocks: Vec<String>,

    stream_armed: bool,
    pipe_ready: bool,
    pending: VecDeque<u8>,
    next_fill: u8,
    noise_frames: bool,
    starve_reads: bool,
    partial_next_frame: bool,
    frames_remaining: Option<usize>,
    fail_register_writes: bool,
}

fn default_registers() -> HashMap<u16, u16> {
    let mut map = HashMap::new();
    map.insert(registers::CHIP_VERSION, 0x8411);
    map.insert(registers::ROW_SIZE, 1199);
    map.insert(registers::COL_SIZE, 1199);
    map
}

fn default_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        max_global_gain: 222,
        recommended_min_global_gain: 8,
        max_exposure_rows: 4095,
        max_window_width: 1280,
        max_window_height: 1280,
        global_gain_reg: registers::GLOBAL_GAIN,
        red_gain_reg: registers::RED_GAIN,
        green1_gain_reg: registers::GREEN1_GAIN,
        green2_gain_reg: registers::GREEN2_GAIN,
        blue_gain_reg: registers::BLUE_GAIN,
        reset_reg: registers::RESET,
        shutter_width_lower_reg: registers::SHUTTER_WIDTH_LOWER,
    }
}

impl SimState {
    fn new(identity: DeviceIdentity, firmware_loaded: bool) -> Self {
        Self {
            identity,
            attached: true,
            generation: 0,
            firmware_loaded,
            cpu_held: false,
            firmware_bytes: 0,
            gpif_configured: false,
            registers: default_registers(),
            leds: HashMap::new(),
            capabilities: default_capabilities(),
            pixel_clocks: vec!["12 MHz".into(), "24 MHz".into(), "48 MHz".into()],
            stream_armed: false,
            pipe_ready: false,
            pending: VecDeque::new(),
            next_fill: 1,
            noise_frames: false,
            starve_reads: false,
            partial_next_frame: false,
            frames_remaining: None,
            fail_register_writes: false,
        }
    }

    fn current_product_id(&self) -> u16 {
        if self.firmware_loaded {
            self.identity.product_id_camera
        } else {
            self.identity.product_id_loader
        }
    }

    fn device_info(&self) -> UsbDeviceInfo {
        let (product, serial) = if self.firmware_loaded {
            ("Lumascope 600 (simulated)", Some("SIM000042".to_string()))
        } else {
            ("FX2 Bootloader", None)
        };
        UsbDeviceInfo {
            vendor_id: self.identity.vendor_id,
            product_id: self.current_product_id(),
            bus_number: 1,
            device_address: 5,
            manufacturer: Some("Lumascope".to_string()),
            product: Some(product.to_string()),
            serial_number: serial,
        }
    }

    /// Frame byte length derived from the programmed window registers.
    fn frame_len(&self) -> usize {
        let rows = usize::from(self.registers.get(&registers::ROW_SIZE).copied().unwrap_or(0)) + 1;
        let cols = usize::from(self.registers.get(&registers::COL_SIZE).copied().unwrap_or(0)) + 1;
        rows * cols * 3
    }

    /// Firmware started: the device drops off the bus and comes back under
    /// the camera product id with fresh device-side state.
    fn renumerate(&mut self) {
        self.generation += 1;
        self.firmware_loaded = true;
        self.cpu_held = false;
        self.gpif_configured = false;
        self.stream_armed = false;
        self.pipe_ready = false;
        self.pending.clear();
        self.registers = default_registers();
    }

    /// Generate the next frame into the pending stream, delimiter first.
    /// Returns false when the generator has nothing more to emit.
    fn refill_pending(&mut self) -> bool {
        if self.starve_reads {
            return false;
        }
        if let Some(remaining) = self.frames_remaining.as_mut() {
            if *remaining == 0 {
                return false;
            }
            *remaining -= 1;
        }

        let frame_len = self.frame_len();
        self.pending.extend(FRAME_DELIMITER);

        let payload_len = if self.partial_next_frame {
            self.partial_next_frame = false;
            self.starve_reads = true;
            frame_len / 2
        } else {
            frame_len
        };

        if self.noise_frames {
            let mut rng = rand::rng();
            for _ in 0..payload_len {
                self.pending.push_back(rng.random_range(0..0x80u8));
            }
        } else {
            let fill = self.next_fill;
            self.next_fill = self.next_fill.wrapping_add(1);
            for _ in 0..payload_len {
                self.pending.push_back(fill);
            }
        }

        true
    }
}

impl SimBackend {
    /// A camera attached in bootloader state, awaiting firmware.
    pub fn new() -> Self {
        Self::with_identity(DeviceIdentity::default())
    }

    pub fn with_identity(identity: DeviceIdentity) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(identity, false))),
        }
    }

    /// A camera that already carries firmware (bring-up starts at GPIF).
    pub fn new_initialized() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(DeviceIdentity::default(), true))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Unplug the device; all handles die.
    pub fn detach(&self) {
        let mut st = self.lock();
        st.attached = false;
        st.generation += 1;
    }

    /// Whether firmware has been uploaded and started.
    pub fn is_firmware_loaded(&self) -> bool {
        self.lock().firmware_loaded
    }

    /// Bytes of firmware received by the bootloader.
    pub fn firmware_bytes(&self) -> usize {
        self.lock().firmware_bytes
    }

    /// Brightness last written to an LED.
    pub fn led_brightness(&self, led_id: u8) -> Option<u8> {
        self.lock().leds.get(&led_id).copied()
    }

    /// Fill frames with random noise instead of solid values.
    pub fn set_noise_frames(&self, enabled: bool) {
        self.lock().noise_frames = enabled;
    }

    /// Make all register writes fail until cleared.
    pub fn set_fail_register_writes(&self, enabled: bool) {
        self.lock().fail_register_writes = enabled;
    }

    /// Cut the next generated frame short and go silent afterwards.
    pub fn set_partial_next_frame(&self) {
        self.lock().partial_next_frame = true;
    }

    /// Resume frame generation after a partial-frame stall.
    pub fn clear_starvation(&self) {
        self.lock().starve_reads = false;
    }

    /// Emit at most `count` more frames, then go silent.
    pub fn limit_frames(&self, count: usize) {
        self.lock().frames_remaining = Some(count);
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBackend for SimBackend {
    type Device = SimDevice;

    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, UsbError> {
        let st = self.lock();
        if !st.attached {
            return Ok(Vec::new());
        }
        Ok(vec![st.device_info()])
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<SimDevice, UsbError> {
        let st = self.lock();
        if !st.attached
            || vendor_id != st.identity.vendor_id
            || product_id != st.current_product_id()
        {
            return Err(UsbError::NotFound);
        }
        Ok(SimDevice {
            state: Arc::clone(&self.state),
            generation: st.generation,
            info: st.device_info(),
        })
    }
}

/// One opened handle onto the simulated camera.
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
    generation: u64,
    info: UsbDeviceInfo,
}

impl SimDevice {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, UsbError> {
        let st = self.state.lock().unwrap();
        if !st.attached || st.generation != self.generation {
            return Err(UsbError::NoDevice);
        }
        Ok(st)
    }
}

impl DeviceIo for SimDevice {
    fn info(&self) -> &UsbDeviceInfo {
        &self.info
    }

    fn control_in(
        &self,
        req: ControlRequest,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        if !req.is_in() {
            return Err(UsbError::InvalidParam);
        }
        let st = self.lock()?;

        match req.request {
            request::SENSOR_READ => {
                if !st.gpif_configured {
                    return Err(UsbError::Pipe);
                }
                if buf.len() < 2 {
                    return Err(UsbError::Overflow);
                }
                let value = st.registers.get(&req.value).copied().unwrap_or(0);
                buf[0] = (value >> 8) as u8;
                buf[1] = value as u8;
                Ok(2)
            }
            request::READ_CAPABILITIES => {
                let payload = st.capabilities.encode();
                if buf.len() < payload.len() {
                    return Err(UsbError::Overflow);
                }
                buf[..payload.len()].copy_from_slice(&payload);
                Ok(payload.len())
            }
            request::PIXEL_CLOCK_COUNT => {
                if buf.is_empty() {
                    return Err(UsbError::Overflow);
                }
                buf[0] = st.pixel_clocks.len() as u8;
                Ok(1)
            }
            request::PIXEL_CLOCK_DESCRIPTOR => {
                let index = req.value as usize;
                let desc = st
                    .pixel_clocks
                    .get(index)
                    .ok_or(UsbError::InvalidParam)?
                    .as_bytes();
                if buf.len() < desc.len() {
                    return Err(UsbError::Overflow);
                }
                buf[..desc.len()].copy_from_slice(desc);
                Ok(desc.len())
            }
            _ => Err(UsbError::Pipe),
        }
    }

    fn control_out(
        &self,
        req: ControlRequest,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        if req.is_in() {
            return Err(UsbError::InvalidParam);
        }
        let mut st = self.lock()?;

        match req.request {
            request::FIRMWARE_LOAD => {
                if st.firmware_loaded {
                    // The camera firmware does not implement the bootloader
                    // RAM access request.
                    return Err(UsbError::Pipe);
                }
                if req.value == request::CPUCS_ADDRESS {
                    match data.first() {
                        Some(&request::CPUCS_HOLD_RESET) => st.cpu_held = true,
                        Some(&request::CPUCS_RUN) => {
                            if st.firmware_bytes > 0 {
                                st.renumerate();
                            } else {
                                st.cpu_held = false;
                            }
                        }
                        _ => return Err(UsbError::InvalidParam),
                    }
                } else {
                    if !st.cpu_held {
                        return Err(UsbError::Pipe);
                    }
                    st.firmware_bytes += data.len();
                }
                Ok(data.len())
            }
            request::GPIF_CONFIG => {
                if data.is_empty() {
                    return Err(UsbError::InvalidParam);
                }
                st.gpif_configured = true;
                Ok(data.len())
            }
            request::SENSOR_WRITE => {
                if !st.gpif_configured {
                    return Err(UsbError::Pipe);
                }
                if st.fail_register_writes {
                    return Err(UsbError::Io);
                }
                if data.len() != 2 {
                    return Err(UsbError::InvalidParam);
                }
                let value = u16::from(data[0]) << 8 | u16::from(data[1]);
                let register = req.value;

                // The device rejects gain values above its reported maximum
                // and leaves the register untouched.
                if register == st.capabilities.global_gain_reg
                    && value > st.capabilities.max_global_gain
                {
                    return Err(UsbError::Pipe);
                }

                if register == st.capabilities.reset_reg && value == registers::RESET_ASSERT {
                    st.registers = default_registers();
                }
                st.registers.insert(register, value);
                Ok(2)
            }
            request::STREAM_START => {
                if !st.gpif_configured {
                    return Err(UsbError::Pipe);
                }
                st.stream_armed = true;
                st.starve_reads = false;
                Ok(0)
            }
            request::STREAM_STOP => {
                st.stream_armed = false;
                st.pending.clear();
                Ok(0)
            }
            request::LED_WRITE => {
                let led_id = (req.value >> 8) as u8;
                let brightness = req.value as u8;
                if led_id > 3 {
                    return Err(UsbError::InvalidParam);
                }
                st.leds.insert(led_id, brightness);
                Ok(0)
            }
            _ => Err(UsbError::Pipe),
        }
    }

    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize, UsbError> {
        if endpoint != protocol::STREAM_ENDPOINT {
            return Err(UsbError::NotFound);
        }
        let mut st = self.lock()?;
        if !st.pipe_ready || !st.stream_armed {
            return Err(UsbError::Pipe);
        }

        if st.pending.is_empty() && !st.refill_pending() {
            return Err(UsbError::Timeout);
        }

        let n = buf.len().min(st.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = st.pending.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn stream_start(&self, endpoint: u8) -> Result<(), UsbError> {
        if endpoint != protocol::STREAM_ENDPOINT {
            return Err(UsbError::InvalidParam);
        }
        let mut st = self.lock()?;
        if !st.stream_armed {
            return Err(UsbError::Pipe);
        }
        st.pipe_ready = true;
        Ok(())
    }

    fn stream_read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbError> {
        self.bulk_in(protocol::STREAM_ENDPOINT, buf, timeout)
    }

    fn stream_stop(&self) -> Result<(), UsbError> {
        // Releasing a pipe on a vanished device is not an error.
        if let Ok(mut st) = self.lock() {
            st.pipe_ready = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CONTROL_TIMEOUT;

    fn open_camera(backend: &SimBackend) -> SimDevice {
        let identity = DeviceIdentity::default();
        backend
            .open(identity.vendor_id, identity.product_id_camera)
            .unwrap()
    }

    #[test]
    fn test_register_io_gated_on_gpif() {
        let backend = SimBackend::new_initialized();
        let device = open_camera(&backend);

        let read = ControlRequest::vendor_in(request::SENSOR_READ, registers::CHIP_VERSION, 0);
        let mut buf = [0u8; 2];
        assert_eq!(
            device.control_in(read, &mut buf, CONTROL_TIMEOUT),
            Err(UsbError::Pipe)
        );

        let gpif = ControlRequest::vendor_out(request::GPIF_CONFIG, 0, 0);
        device.control_out(gpif, &[0x01], CONTROL_TIMEOUT).unwrap();

        let n = device.control_in(read, &mut buf, CONTROL_TIMEOUT).unwrap();
        assert_eq!(n, 2);
        assert_eq!(u16::from(buf[0]) << 8 | u16::from(buf[1]), 0x8411);
    }

    #[test]
    fn test_bootloader_requires_held_cpu() {
        let backend = SimBackend::new();
        let identity = DeviceIdentity::default();
        let device = backend
            .open(identity.vendor_id, identity.product_id_loader)
            .unwrap();

        let write = ControlRequest::vendor_out(request::FIRMWARE_LOAD, 0x0000, 0);
        assert_eq!(
            device.control_out(write, &[0xAA], CONTROL_TIMEOUT),
            Err(UsbError::Pipe)
        );

        let cpucs = ControlRequest::vendor_out(request::FIRMWARE_LOAD, request::CPUCS_ADDRESS, 0);
        device
            .control_out(cpucs, &[request::CPUCS_HOLD_RESET], CONTROL_TIMEOUT)
            .unwrap();
        device.control_out(write, &[0xAA], CONTROL_TIMEOUT).unwrap();
        assert_eq!(backend.firmware_bytes(), 1);
    }

    #[test]
    fn test_detach_kills_handles() {
        let backend = SimBackend::new_initialized();
        let device = open_camera(&backend);

        backend.detach();

        let read = ControlRequest::vendor_in(request::SENSOR_READ, 0, 0);
        let mut buf = [0u8; 2];
        assert_eq!(
            device.control_in(read, &mut buf, CONTROL_TIMEOUT),
            Err(UsbError::NoDevice)
        );
        assert!(backend.devices().unwrap().is_empty());
    }
}
