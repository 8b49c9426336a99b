//! Device capability payload
//!
//! Gain limits, exposure limits, window bounds, and the per-channel gain
//! register addresses all vary between camera generations, so they are
//! reported by the live device rather than compiled in. The driver reads
//! this payload once at bind time and keeps the decoded value for the
//! session.

use byteorder::{BigEndian, ByteOrder};

use crate::error::PayloadError;

/// Byte length of the fixed capability payload.
pub const CAPABILITY_PAYLOAD_LEN: usize = 24;

/// Limits and register addresses reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Largest accepted global gain parameter value.
    pub max_global_gain: u16,
    /// Smallest gain the vendor recommends for usable images.
    pub recommended_min_global_gain: u16,
    /// Largest shutter width in row periods.
    pub max_exposure_rows: u16,
    /// Widest selectable window in columns.
    pub max_window_width: u16,
    /// Tallest selectable window in rows.
    pub max_window_height: u16,
    /// Address of the global gain register.
    pub global_gain_reg: u16,
    /// Address of the red channel gain register.
    pub red_gain_reg: u16,
    /// Address of the first green channel gain register.
    pub green1_gain_reg: u16,
    /// Address of the second green channel gain register.
    pub green2_gain_reg: u16,
    /// Address of the blue channel gain register.
    pub blue_gain_reg: u16,
    /// Address of the soft reset register.
    pub reset_reg: u16,
    /// Address of the shutter width (lower) register.
    pub shutter_width_lower_reg: u16,
}

impl DeviceCapabilities {
    /// Decode the payload returned by the capabilities control read.
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() != CAPABILITY_PAYLOAD_LEN {
            return Err(PayloadError::WrongLength {
                expected: CAPABILITY_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let word = |i: usize| BigEndian::read_u16(&payload[i * 2..i * 2 + 2]);

        Ok(Self {
            max_global_gain: word(0),
            recommended_min_global_gain: word(1),
            max_exposure_rows: word(2),
            max_window_width: word(3),
            max_window_height: word(4),
            global_gain_reg: word(5),
            red_gain_reg: word(6),
            green1_gain_reg: word(7),
            green2_gain_reg: word(8),
            blue_gain_reg: word(9),
            reset_reg: word(10),
            shutter_width_lower_reg: word(11),
        })
    }

    /// Encode into the on-wire layout (used by simulated devices).
    pub fn encode(&self) -> [u8; CAPABILITY_PAYLOAD_LEN] {
        let words = [
            self.max_global_gain,
            self.recommended_min_global_gain,
            self.max_exposure_rows,
            self.max_window_width,
            self.max_window_height,
            self.global_gain_reg,
            self.red_gain_reg,
            self.green1_gain_reg,
            self.green2_gain_reg,
            self.blue_gain_reg,
            self.reset_reg,
            self.shutter_width_lower_reg,
        ];

        let mut payload = [0u8; CAPABILITY_PAYLOAD_LEN];
        for (i, w) in words.iter().enumerate() {
            BigEndian::write_u16(&mut payload[i * 2..i * 2 + 2], *w);
        }
        payload
    }

    /// Clamp a requested global gain into the device-reported range.
    pub fn clamp_global_gain(&self, value: u16) -> u16 {
        value.clamp(self.recommended_min_global_gain, self.max_global_gain)
    }

    /// Clamp a requested exposure (in rows) into the device-reported range.
    pub fn clamp_exposure(&self, rows: u16) -> u16 {
        rows.min(self.max_exposure_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers;

    fn sample() -> DeviceCapabilities {
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

    #[test]
    fn test_encode_parse_round_trip() {
        let caps = sample();
        let parsed = DeviceCapabilities::parse(&caps.encode()).unwrap();
        assert_eq!(parsed, caps);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let err = DeviceCapabilities::parse(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            PayloadError::WrongLength {
                expected: CAPABILITY_PAYLOAD_LEN,
                actual: 10
            }
        );
    }

    #[test]
    fn test_clamp_global_gain() {
        let caps = sample();
        assert_eq!(caps.clamp_global_gain(0), 8);
        assert_eq!(caps.clamp_global_gain(100), 100);
        assert_eq!(caps.clamp_global_gain(4000), 222);
    }

    #[test]
    fn test_clamp_exposure() {
        let caps = sample();
        assert_eq!(caps.clamp_exposure(100), 100);
        assert_eq!(caps.clamp_exposure(u16::MAX), 4095);
    }
}
