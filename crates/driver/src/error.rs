//! Driver error types

use protocol::{FirmwareError, PayloadError, UsbError};
use thiserror::Error;

/// Camera driver errors
///
/// Sequencing variants (`NotBound`, `GpifNotInitialized`,
/// `SensorNotInitialized`, `StreamingActive`) are raised before any
/// hardware is touched: an operation invoked out of order is rejected,
/// never silently misbehaves.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No attached device matched the identity; expected while the camera
    /// is unplugged, callers retry enumeration
    #[error("no matching camera attached")]
    NotFound,

    /// Operation requires a bound device
    #[error("no camera is bound")]
    NotBound,

    /// Operation requires the device in bootloader state
    #[error("device is not in bootloader state")]
    NotInLoaderState,

    /// Operation requires a firmware-loaded camera
    #[error("device is still in bootloader state")]
    FirmwareNotLoaded,

    /// Firmware load requested without a configured hex image path
    #[error("no firmware image path configured")]
    HexPathNotSet,

    /// Register or stream operation before the transfer engine was set up
    #[error("GPIF transfer engine not initialized")]
    GpifNotInitialized,

    /// Stream start before the sensor power-up sequence
    #[error("image sensor not initialized")]
    SensorNotInitialized,

    /// Operation not permitted while the stream is active
    #[error("operation not permitted while streaming")]
    StreamingActive,

    /// Pixel clock selection outside the enumerated table
    #[error("pixel clock index {index} out of range ({count} entries)")]
    InvalidPixelClockIndex { index: usize, count: usize },

    /// Requested window is empty or exceeds the sensor's capability
    #[error("window {width}x{height} outside device limits (max {max_width}x{max_height})")]
    InvalidWindow {
        width: u32,
        height: u32,
        max_width: u16,
        max_height: u16,
    },

    /// Transport failure
    #[error(transparent)]
    Usb(#[from] UsbError),

    /// Malformed payload from the device
    #[error("malformed device payload: {0}")]
    Payload(#[from] PayloadError),

    /// Firmware image problem
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
}

impl CameraError {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            CameraError::NotFound => true,
            CameraError::Usb(e) => !e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CameraError::NotFound.is_retryable());
        assert!(CameraError::Usb(UsbError::Timeout).is_retryable());
        assert!(!CameraError::Usb(UsbError::NoDevice).is_retryable());
        assert!(!CameraError::GpifNotInitialized.is_retryable());
    }
}
