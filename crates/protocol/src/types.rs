//! Device identity and frame geometry types
//!
//! The camera enumerates under two different product ids depending on its
//! boot state: a bare FX2 bootloader before firmware load, and the camera
//! proper afterwards. Exactly one of the two matches a physical device at
//! any time; the transition is loader -> camera and never reverses at
//! runtime.

use serde::{Deserialize, Serialize};

/// Cypress Semiconductor USB vendor id.
pub const VID_CYPRESS: u16 = 0x04B4;

/// Product id of the bare FX2 bootloader (firmware not yet loaded).
pub const PID_FX2_LOADER: u16 = 0x8613;

/// Product id the device renumerates under after firmware load.
pub const PID_LSCOPE: u16 = 0x4720;

/// Marker the firmware injects into the data stream at each frame start.
///
/// The streaming worker scans incoming transfers for this sequence to
/// delimit frames and to resynchronize after a partial transfer.
pub const FRAME_DELIMITER: [u8; 4] = [0x33, 0xCC, 0x5A, 0xA5];

/// USB identity of a camera in both of its boot states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB vendor id shared by both states.
    pub vendor_id: u16,
    /// Product id before firmware load (bare bootloader).
    pub product_id_loader: u16,
    /// Product id after firmware load.
    pub product_id_camera: u16,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_id: VID_CYPRESS,
            product_id_loader: PID_FX2_LOADER,
            product_id_camera: PID_LSCOPE,
        }
    }
}

impl DeviceIdentity {
    /// Whether (vid, pid) names an unprogrammed bootloader device.
    pub fn matches_loader(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && product_id == self.product_id_loader
    }

    /// Whether (vid, pid) names a firmware-loaded camera.
    pub fn matches_camera(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && product_id == self.product_id_camera
    }

    /// Whether (vid, pid) names the device in either state.
    pub fn matches_any(&self, vendor_id: u16, product_id: u16) -> bool {
        self.matches_loader(vendor_id, product_id) || self.matches_camera(vendor_id, product_id)
    }
}

/// Enumeration record for one attached USB device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Bus number the device is attached to.
    pub bus_number: u8,
    /// Device address on the bus.
    pub device_address: u8,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number string (if available).
    pub serial_number: Option<String>,
}

impl UsbDeviceInfo {
    /// Human-readable one-line description used in device listings.
    pub fn description(&self) -> String {
        let product = self.product.as_deref().unwrap_or("Lumascope");
        match &self.serial_number {
            Some(serial) => format!(
                "{} {:04x}:{:04x} (bus {} addr {}, s/n {})",
                product,
                self.vendor_id,
                self.product_id,
                self.bus_number,
                self.device_address,
                serial
            ),
            None => format!(
                "{} {:04x}:{:04x} (bus {} addr {})",
                product, self.vendor_id, self.product_id, self.bus_number, self.device_address
            ),
        }
    }
}

/// Frame geometry for the 24 bpp pixel stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl FrameFormat {
    /// Bytes per pixel of the delivered stream (RGB, 8 bits per channel).
    pub const BYTES_PER_PIXEL: usize = 3;

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square window with the given side length.
    pub fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    /// Total byte length of one complete frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::BYTES_PER_PIXEL
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        // Full sensor window of the 600/700 series.
        Self {
            width: 1200,
            height: 1200,
        }
    }
}

/// Pixel clock options enumerated from the device at runtime.
///
/// Clock speeds vary per hardware revision and firmware, so the table is
/// queried once per session and treated as immutable afterwards. Selection
/// is by index into this table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelClockTable {
    descriptions: Vec<String>,
}

impl PixelClockTable {
    pub fn new(descriptions: Vec<String>) -> Self {
        Self { descriptions }
    }

    /// Number of selectable clock frequencies.
    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// Description of the clock at `index`, or `None` if out of range.
    pub fn description(&self, index: usize) -> Option<&str> {
        self.descriptions.get(index).map(String::as_str)
    }

    /// All descriptions in index order.
    pub fn descriptions(&self) -> &[String] {
        &self.descriptions
    }

    /// Whether `index` selects a valid table entry.
    pub fn contains(&self, index: usize) -> bool {
        index < self.descriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_matches_one_state_at_a_time() {
        let id = DeviceIdentity::default();
        assert!(id.matches_loader(VID_CYPRESS, PID_FX2_LOADER));
        assert!(!id.matches_camera(VID_CYPRESS, PID_FX2_LOADER));
        assert!(id.matches_camera(VID_CYPRESS, PID_LSCOPE));
        assert!(!id.matches_loader(VID_CYPRESS, PID_LSCOPE));
        assert!(!id.matches_any(0x1234, PID_LSCOPE));
    }

    #[test]
    fn test_frame_len_is_24bpp() {
        let format = FrameFormat::new(640, 480);
        assert_eq!(format.frame_len(), 640 * 480 * 3);
        assert_eq!(FrameFormat::square(512).frame_len(), 512 * 512 * 3);
    }

    #[test]
    fn test_pixel_clock_table_lookup() {
        let table = PixelClockTable::new(vec!["12 MHz".into(), "24 MHz".into(), "48 MHz".into()]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.description(1), Some("24 MHz"));
        assert_eq!(table.description(3), None);
        assert!(table.contains(0));
        assert!(!table.contains(3));
    }

    #[test]
    fn test_device_description_includes_ids() {
        let info = UsbDeviceInfo {
            vendor_id: VID_CYPRESS,
            product_id: PID_LSCOPE,
            bus_number: 2,
            device_address: 7,
            manufacturer: None,
            product: Some("Lumascope 600".into()),
            serial_number: Some("LS600-0042".into()),
        };
        let desc = info.description();
        assert!(desc.contains("04b4:4720"));
        assert!(desc.contains("LS600-0042"));
    }
}
