//! Lumascope camera driver
//!
//! Bridges the Lumascope USB microscopy camera (Cypress FX2 front end, MT9
//! style CMOS sensor) to an acquisition host. The driver covers the full
//! bring-up sequence — enumeration in either boot state, firmware upload,
//! GPIF transfer engine setup, sensor initialization — and then streaming
//! with polled latest-frame delivery.
//!
//! All USB access goes through the [`backend`] traits;
//! [`rusb_backend::RusbBackend`] is the production implementation and
//! [`sim::SimBackend`] a complete software model used by the test suite.
//!
//! # Example
//!
//! ```no_run
//! use driver::{Lumascope, rusb_backend::RusbBackend};
//! use protocol::{DeviceIdentity, FrameFormat};
//!
//! # fn main() -> Result<(), driver::CameraError> {
//! let backend = RusbBackend::new()?;
//! let mut camera = Lumascope::new(backend, DeviceIdentity::default(), FrameFormat::default());
//! camera.set_hex_path("/usr/share/lumascope/lumascope.hex");
//!
//! if camera.find_uninitialized_camera()? {
//!     camera.load_firmware()?;
//!     while !camera.find_initialized_camera()? {
//!         std::thread::sleep(std::time::Duration::from_millis(250));
//!     }
//! } else if !camera.find_initialized_camera()? {
//!     return Err(driver::CameraError::NotFound);
//! }
//!
//! camera.initialize_gpif()?;
//! camera.init_image_sensor()?;
//! camera.start_streaming()?;
//! let frame = camera.latest_24bpp_buffer();
//! println!("frame: {} bytes, complete: {}", frame.len(), frame.complete);
//! camera.stop_streaming();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod camera;
pub mod device;
pub mod error;
pub mod firmware;
pub mod rusb_backend;
pub mod sensor;
pub mod sim;
pub mod stream;

pub use backend::{DeviceIo, UsbBackend};
pub use camera::Lumascope;
pub use device::CameraDevice;
pub use error::CameraError;
pub use stream::{FrameSnapshot, StreamController};
