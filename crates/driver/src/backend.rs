//! USB backend seam
//!
//! The driver never talks to a USB stack directly; it goes through these
//! traits. [`UsbBackend`] covers discovery and opening, [`DeviceIo`] covers
//! the per-device transfer primitives. The production implementation is
//! [`crate::rusb_backend::RusbBackend`]; tests run against
//! [`crate::sim::SimBackend`].
//!
//! `DeviceIo` is `Sync`: the control channel and the streaming data channel
//! are independent USB pipes, so register transactions issued from the
//! foreground never serialize behind the background receive path.

use std::time::Duration;

use protocol::{ControlRequest, UsbDeviceInfo, UsbError};

/// Timeout for control channel round trips.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for one streaming read; bounds how long a stop command can wait.
pub const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Transfer primitives of one opened device.
pub trait DeviceIo: Send + Sync + 'static {
    /// Enumeration record of the opened device.
    fn info(&self) -> &UsbDeviceInfo;

    /// Control read; returns the number of bytes received.
    fn control_in(
        &self,
        request: ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Control write; returns the number of bytes sent.
    fn control_out(
        &self,
        request: ControlRequest,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Bulk read from an IN endpoint.
    fn bulk_in(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbError>;

    /// Prepare the streaming pipe on the given IN endpoint.
    fn stream_start(&self, endpoint: u8) -> Result<(), UsbError>;

    /// Read the next chunk of stream data from the prepared pipe.
    ///
    /// A `Timeout` error means no data arrived within the window; the
    /// caller treats the frame in progress as terminated.
    fn stream_read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbError>;

    /// Release the streaming pipe.
    fn stream_stop(&self) -> Result<(), UsbError>;
}

/// Device discovery and opening.
pub trait UsbBackend {
    type Device: DeviceIo;

    /// Enumerate currently attached devices.
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, UsbError>;

    /// Open the first attached device matching (vid, pid).
    ///
    /// First match wins; identical devices are not disambiguated. Returns
    /// `UsbError::NotFound` when nothing matches.
    fn open(&self, vendor_id: u16, product_id: u16) -> Result<Self::Device, UsbError>;
}
