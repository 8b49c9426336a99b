//! Hardware protocol definitions for the Lumascope camera
//!
//! This crate defines everything the driver needs to talk to the device:
//! USB identity constants, the sensor register map, vendor control request
//! codes, the device capability payload, and the Intel HEX firmware image
//! format used to boot the FX2 controller.
//!
//! # Example
//!
//! ```
//! use protocol::{DeviceIdentity, FrameFormat};
//!
//! let identity = DeviceIdentity::default();
//! assert_eq!(identity.vendor_id, 0x04B4);
//!
//! let format = FrameFormat::default();
//! assert_eq!(format.frame_len(), 1200 * 1200 * 3);
//! ```

pub mod capabilities;
pub mod error;
pub mod firmware;
pub mod registers;
pub mod request;
pub mod types;

pub use capabilities::DeviceCapabilities;
pub use error::{FirmwareError, PayloadError, UsbError};
pub use firmware::{FirmwareImage, FirmwareSegment};
pub use request::{ControlRequest, STREAM_ENDPOINT, STREAM_TRANSFER_SIZE};
pub use types::{DeviceIdentity, FrameFormat, PixelClockTable, UsbDeviceInfo, FRAME_DELIMITER};
