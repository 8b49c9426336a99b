//! Protocol error types

use thiserror::Error;

/// USB transport error
///
/// Mirrors the libusb error set so backends can map their native errors
/// without loss. Transient variants (`Timeout`, `Pipe`, `Io`, `Busy`,
/// `Overflow`) leave device state unchanged and may be retried; `NoDevice`
/// is fatal for the bound handle and requires re-enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("device or endpoint not found")]
    NotFound,
    /// Device is busy
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("I/O error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Other error with message
    #[error("USB error: {0}")]
    Other(String),
}

impl UsbError {
    /// Whether the bound device handle is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UsbError::NoDevice)
    }
}

/// Intel HEX firmware image parse error
#[derive(Debug, Error)]
pub enum FirmwareError {
    /// Record does not begin with the ':' start code
    #[error("line {line}: record missing ':' start code")]
    MissingStartCode { line: usize },

    /// Record contains non-hex characters or an odd digit count
    #[error("line {line}: invalid hex encoding")]
    InvalidHex { line: usize },

    /// Record shorter than the fixed header + checksum
    #[error("line {line}: truncated record")]
    TruncatedRecord { line: usize },

    /// Record byte count field disagrees with the actual payload length
    #[error("line {line}: record length mismatch")]
    LengthMismatch { line: usize },

    /// Record checksum verification failed
    #[error("line {line}: checksum mismatch")]
    Checksum { line: usize },

    /// Record type this loader does not understand
    #[error("line {line}: unsupported record type {record_type:#04x}")]
    UnsupportedRecordType { line: usize, record_type: u8 },

    /// Extended address record pointing outside the FX2's 16-bit space
    #[error("line {line}: address extension outside 16-bit range")]
    UnsupportedAddressExtension { line: usize },

    /// Image contained no data records
    #[error("image contains no data records")]
    EmptyImage,

    /// Failed to read the image file
    #[error("failed to read firmware image: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed control payload received from the device
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload length differs from the fixed layout
    #[error("payload length {actual}, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    /// String payload is not valid ASCII/UTF-8
    #[error("payload is not valid text")]
    BadText,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_no_device_is_fatal() {
        assert!(UsbError::NoDevice.is_fatal());
        assert!(!UsbError::Timeout.is_fatal());
        assert!(!UsbError::Pipe.is_fatal());
        assert!(!UsbError::Other("x".into()).is_fatal());
    }

    #[test]
    fn test_firmware_error_display_names_line() {
        let err = FirmwareError::Checksum { line: 12 };
        assert!(format!("{}", err).contains("line 12"));
    }
}
