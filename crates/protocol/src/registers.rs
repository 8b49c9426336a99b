//! Sensor register address map
//!
//! Default addresses for the MT9-style CMOS sensor behind the FX2. These are
//! fallback values only: the authoritative addresses for a given hardware
//! revision come from the capability payload the device reports at bind time
//! (see [`crate::capabilities::DeviceCapabilities`]).
//!
//! Register values are 16 bits wide and transfer big-endian on the control
//! channel.

/// Chip version / identification, read-only.
pub const CHIP_VERSION: u16 = 0x00;
/// First row of the active window.
pub const ROW_START: u16 = 0x01;
/// First column of the active window.
pub const COL_START: u16 = 0x02;
/// Active window height in rows.
pub const ROW_SIZE: u16 = 0x03;
/// Active window width in columns.
pub const COL_SIZE: u16 = 0x04;
/// Horizontal blanking interval.
pub const HORIZONTAL_BLANKING: u16 = 0x05;
/// Vertical blanking interval.
pub const VERTICAL_BLANKING: u16 = 0x06;
/// Output control (chip enable, output drive).
pub const OUTPUT_CONTROL: u16 = 0x07;
/// Shutter width, upper bits.
pub const SHUTTER_WIDTH_UPPER: u16 = 0x08;
/// Shutter width, lower 16 bits (integration time in row periods).
pub const SHUTTER_WIDTH_LOWER: u16 = 0x09;
/// Pixel clock control (divider select, polarity).
pub const PIXEL_CLOCK_CONTROL: u16 = 0x0A;
/// Restart the current frame readout.
pub const RESTART: u16 = 0x0B;
/// Shutter delay.
pub const SHUTTER_DELAY: u16 = 0x0C;
/// Soft reset; write 1 to assert, 0 to resume.
pub const RESET: u16 = 0x0D;
/// Green channel gain (first green of the Bayer quad).
pub const GREEN1_GAIN: u16 = 0x2B;
/// Blue channel gain.
pub const BLUE_GAIN: u16 = 0x2C;
/// Red channel gain.
pub const RED_GAIN: u16 = 0x2D;
/// Green channel gain (second green of the Bayer quad).
pub const GREEN2_GAIN: u16 = 0x2E;
/// Global gain applied to all four channels.
pub const GLOBAL_GAIN: u16 = 0x35;

/// Value asserting the sensor soft reset.
pub const RESET_ASSERT: u16 = 0x0001;
/// Value releasing the sensor soft reset.
pub const RESET_RELEASE: u16 = 0x0000;
/// Output control value enabling the pixel output drivers.
pub const OUTPUT_ENABLE: u16 = 0x0002;
