//! FX2 firmware upload
//!
//! The Cypress bootloader accepts vendor request `0xA0` to write device RAM
//! while the CPU is held in reset through the CPUCS register. Releasing the
//! reset starts the uploaded firmware, after which the device drops off the
//! bus and renumerates under the camera product id — the loader handle is
//! dead from that point and the caller re-enumerates.

use protocol::{request, ControlRequest, FirmwareImage, UsbError};
use tracing::{debug, info};

use crate::backend::{DeviceIo, CONTROL_TIMEOUT};

/// Upload a parsed firmware image and start it.
pub fn upload_firmware<D: DeviceIo>(io: &D, image: &FirmwareImage) -> Result<(), UsbError> {
    debug!(
        "uploading {} firmware bytes in {} segment(s)",
        image.total_len(),
        image.segments().len()
    );

    write_cpucs(io, request::CPUCS_HOLD_RESET)?;

    for segment in image.segments() {
        let mut address = segment.address;
        for chunk in segment.data.chunks(request::FIRMWARE_CHUNK) {
            io.control_out(
                ControlRequest::vendor_out(request::FIRMWARE_LOAD, address, 0),
                chunk,
                CONTROL_TIMEOUT,
            )?;
            address = address.wrapping_add(chunk.len() as u16);
        }
    }

    write_cpucs(io, request::CPUCS_RUN)?;
    info!("firmware started, device will renumerate");

    Ok(())
}

fn write_cpucs<D: DeviceIo>(io: &D, value: u8) -> Result<(), UsbError> {
    io.control_out(
        ControlRequest::vendor_out(request::FIRMWARE_LOAD, request::CPUCS_ADDRESS, 0),
        &[value],
        CONTROL_TIMEOUT,
    )
    .map(|_| ())
}
