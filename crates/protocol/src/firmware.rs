//! Intel HEX firmware image parsing
//!
//! The FX2 boots from a `.hex` image uploaded over the control channel.
//! Records are lines of the form `:LLAAAATT[DD..]CC` where `LL` is the data
//! byte count, `AAAA` the 16-bit load address, `TT` the record type, and
//! `CC` an additive checksum bringing the record sum to zero mod 256.
//!
//! Only the record types that occur in FX2 images are accepted: data
//! (`00`), end-of-file (`01`), and a zero extended linear address (`04`) —
//! the FX2 has no memory outside the 16-bit space, so any other extension
//! is rejected.

use std::fs;
use std::path::Path;

use crate::error::FirmwareError;

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_LINEAR_ADDRESS: u8 = 0x04;

/// A contiguous run of firmware bytes at a load address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSegment {
    /// RAM address the segment loads at.
    pub address: u16,
    /// Segment payload.
    pub data: Vec<u8>,
}

/// A parsed firmware image, data records coalesced into segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    segments: Vec<FirmwareSegment>,
}

impl FirmwareImage {
    /// Parse an Intel HEX image from text.
    pub fn parse(text: &str) -> Result<Self, FirmwareError> {
        let mut segments: Vec<FirmwareSegment> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }

            let body = trimmed
                .strip_prefix(':')
                .ok_or(FirmwareError::MissingStartCode { line })?;
            let bytes = hex::decode(body).map_err(|_| FirmwareError::InvalidHex { line })?;

            // count + address (2) + type + checksum
            if bytes.len() < 5 {
                return Err(FirmwareError::TruncatedRecord { line });
            }

            let count = bytes[0] as usize;
            if bytes.len() != count + 5 {
                return Err(FirmwareError::LengthMismatch { line });
            }

            let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            if sum != 0 {
                return Err(FirmwareError::Checksum { line });
            }

            let address = u16::from(bytes[1]) << 8 | u16::from(bytes[2]);
            let record_type = bytes[3];
            let data = &bytes[4..4 + count];

            match record_type {
                RECORD_DATA => Self::push_data(&mut segments, address, data),
                RECORD_EOF => break,
                RECORD_EXT_LINEAR_ADDRESS => {
                    if data.iter().any(|b| *b != 0) {
                        return Err(FirmwareError::UnsupportedAddressExtension { line });
                    }
                }
                other => {
                    return Err(FirmwareError::UnsupportedRecordType {
                        line,
                        record_type: other,
                    });
                }
            }
        }

        if segments.is_empty() {
            return Err(FirmwareError::EmptyImage);
        }

        Ok(Self { segments })
    }

    /// Read and parse an image file.
    pub fn load(path: &Path) -> Result<Self, FirmwareError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    fn push_data(segments: &mut Vec<FirmwareSegment>, address: u16, data: &[u8]) {
        if let Some(last) = segments.last_mut() {
            if last.address as usize + last.data.len() == address as usize {
                last.data.extend_from_slice(data);
                return;
            }
        }
        segments.push(FirmwareSegment {
            address,
            data: data.to_vec(),
        });
    }

    /// The coalesced segments in file order.
    pub fn segments(&self) -> &[FirmwareSegment] {
        &self.segments
    }

    /// Total firmware byte count across all segments.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOF: &str = ":00000001FF";

    #[test]
    fn test_parse_single_data_record() {
        let image = FirmwareImage::parse(&format!(":0300000002099260\n{EOF}\n")).unwrap();
        assert_eq!(image.segments().len(), 1);
        assert_eq!(image.segments()[0].address, 0x0000);
        assert_eq!(image.segments()[0].data, vec![0x02, 0x09, 0x92]);
        assert_eq!(image.total_len(), 3);
    }

    #[test]
    fn test_adjacent_records_coalesce() {
        let text = format!(":0300000002099260\n:02000300AABB96\n{EOF}\n");
        let image = FirmwareImage::parse(&text).unwrap();
        assert_eq!(image.segments().len(), 1);
        assert_eq!(image.segments()[0].data, vec![0x02, 0x09, 0x92, 0xAA, 0xBB]);
    }

    #[test]
    fn test_gap_starts_new_segment() {
        let text = format!(":0300000002099260\n:01008000E699\n{EOF}\n");
        let image = FirmwareImage::parse(&text).unwrap();
        assert_eq!(image.segments().len(), 2);
        assert_eq!(image.segments()[1].address, 0x0080);
        assert_eq!(image.segments()[1].data, vec![0xE6]);
    }

    #[test]
    fn test_zero_extended_address_accepted() {
        let text = format!(":020000040000FA\n:0300000002099260\n{EOF}\n");
        let image = FirmwareImage::parse(&text).unwrap();
        assert_eq!(image.total_len(), 3);
    }

    #[test]
    fn test_nonzero_extended_address_rejected() {
        let text = format!(":020000040800F2\n:0300000002099260\n{EOF}\n");
        let err = FirmwareImage::parse(&text).unwrap_err();
        assert!(matches!(
            err,
            FirmwareError::UnsupportedAddressExtension { line: 1 }
        ));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let err = FirmwareImage::parse(":0300000002099261\n").unwrap_err();
        assert!(matches!(err, FirmwareError::Checksum { line: 1 }));
    }

    #[test]
    fn test_missing_start_code_rejected() {
        let err = FirmwareImage::parse("0300000002099260\n").unwrap_err();
        assert!(matches!(err, FirmwareError::MissingStartCode { line: 1 }));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        // Count field claims 4 bytes but only 3 are present.
        let err = FirmwareImage::parse(":0400000002099260\n").unwrap_err();
        assert!(matches!(err, FirmwareError::LengthMismatch { line: 1 }));
    }

    #[test]
    fn test_records_after_eof_ignored() {
        let text = format!(":0300000002099260\n{EOF}\n:01008000E699\n");
        let image = FirmwareImage::parse(&text).unwrap();
        assert_eq!(image.segments().len(), 1);
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            FirmwareImage::parse(&format!("{EOF}\n")),
            Err(FirmwareError::EmptyImage)
        ));
        assert!(matches!(
            FirmwareImage::parse(""),
            Err(FirmwareError::EmptyImage)
        ));
    }
}
