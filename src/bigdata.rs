//! Segmented payloads for values larger than one data cell.
//!
//! A value whose declared size exceeds [`MAX_DIRECT_DATA_SIZE`] points at a
//! `db` cell instead of its data. That cell names a list of segment cells;
//! the payload is their bodies laid end to end.
//!
//! ```text
//! db cell          0x00 "db"   0x02 segment count (u16)   0x04 list offset (u32)
//! segment list     u32 cell offset per segment
//! segment cell     up to 16344 payload bytes, then padding
//! ```

use crate::error::{RegistryError, Result};
use crate::image::HiveImage;
use crate::utils::{read_u16_le, read_u32_le};
use tracing::debug;

/// Largest payload stored directly in a single data cell.
pub const MAX_DIRECT_DATA_SIZE: u32 = 16344;

const DB_HEADER_LEN: usize = 8;

/// Decoded `db` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigDataBlock {
    /// Number of segment cells.
    pub segment_count: u16,

    /// Cell holding the segment offsets.
    pub segment_list_offset: u32,
}

impl BigDataBlock {
    /// Reads a `db` header from cell data.
    ///
    /// # Errors
    ///
    /// `TruncatedData` below eight bytes, `InvalidFormat` for another tag.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        let header = data.get(..DB_HEADER_LEN).ok_or(RegistryError::TruncatedData {
            offset,
            expected: DB_HEADER_LEN,
            actual: data.len(),
        })?;

        if !header.starts_with(b"db") {
            return Err(RegistryError::InvalidFormat(format!(
                "Cell at {:#x} is not a big data header",
                offset
            )));
        }

        Ok(Self {
            segment_count: read_u16_le(header, 2)?,
            segment_list_offset: read_u32_le(header, 4)?,
        })
    }

    /// Concatenates the segments and truncates to `expected_length`.
    ///
    /// Each segment contributes at most [`MAX_DIRECT_DATA_SIZE`] bytes so
    /// cell padding never leaks into the payload.
    ///
    /// # Errors
    ///
    /// Fails if the segment list or any segment cell cannot be read.
    pub fn assemble(&self, image: &HiveImage, expected_length: usize) -> Result<Vec<u8>> {
        let list = image.read_cell(self.segment_list_offset)?;
        let count = self.segment_count as usize;
        if list.len() / 4 < count {
            return Err(RegistryError::TruncatedData {
                offset: self.segment_list_offset,
                expected: count * 4,
                actual: list.len(),
            });
        }

        let reachable = count * MAX_DIRECT_DATA_SIZE as usize;
        let mut payload = Vec::with_capacity(expected_length.min(reachable));
        for index in 0..count {
            if payload.len() >= expected_length {
                break;
            }
            let segment = image.read_cell(read_u32_le(list, index * 4)?)?;
            let take = segment
                .len()
                .min(MAX_DIRECT_DATA_SIZE as usize)
                .min(expected_length - payload.len());
            payload.extend_from_slice(&segment[..take]);
        }

        if payload.len() < expected_length {
            debug!(
                segments = count,
                assembled = payload.len(),
                declared = expected_length,
                "Big data shorter than declared size"
            );
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{BASE_BLOCK_SIZE, REGF_SIGNATURE};

    /// Image with cells laid out back to back from relative offset 0x20.
    fn image(cells: &[Vec<u8>]) -> (HiveImage, Vec<u32>) {
        let mut data = vec![0u8; BASE_BLOCK_SIZE + 0x20];
        data[0..4].copy_from_slice(REGF_SIGNATURE);
        let mut offsets = Vec::new();
        for body in cells {
            offsets.push((data.len() - BASE_BLOCK_SIZE) as u32);
            let size = (body.len() + 4 + 7) & !7;
            data.extend_from_slice(&(-(size as i32)).to_le_bytes());
            data.extend_from_slice(body);
            data.resize(data.len() + size - 4 - body.len(), 0xEE);
        }
        (HiveImage::from_vec(data).unwrap(), offsets)
    }

    #[test]
    fn test_parse_header() {
        let mut data = b"db".to_vec();
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&0x1238u32.to_le_bytes());
        let db = BigDataBlock::parse(&data, 0).unwrap();
        assert_eq!(
            db,
            BigDataBlock {
                segment_count: 3,
                segment_list_offset: 0x1238
            }
        );

        assert!(BigDataBlock::parse(&data[..6], 0).is_err());
        data[0] = b'x';
        assert!(BigDataBlock::parse(&data, 0).is_err());
    }

    #[test]
    fn test_assemble_skips_padding() {
        let first = vec![0x11u8; MAX_DIRECT_DATA_SIZE as usize];
        let last = b"xyz".to_vec();
        let (_, offsets) = image(&[first.clone(), last.clone(), vec![0; 8]]);
        let list: Vec<u8> = offsets[..2].iter().flat_map(|o| o.to_le_bytes()).collect();
        let (img, offsets) = image(&[first.clone(), last, list]);

        let db = BigDataBlock {
            segment_count: 2,
            segment_list_offset: offsets[2],
        };
        let payload = db.assemble(&img, first.len() + 3).unwrap();
        assert_eq!(&payload[..first.len()], first.as_slice());
        assert_eq!(&payload[first.len()..], b"xyz");

        assert_eq!(db.assemble(&img, 10).unwrap(), vec![0x11; 10]);
    }

    #[test]
    fn test_declared_length_beyond_segments() {
        let (_, offsets) = image(&[b"abc".to_vec(), vec![0; 4]]);
        let (img, offsets) = image(&[b"abc".to_vec(), offsets[0].to_le_bytes().to_vec()]);
        let db = BigDataBlock {
            segment_count: 1,
            segment_list_offset: offsets[1],
        };
        let payload = db.assemble(&img, 0x7FFF_FFFF).unwrap();
        assert_eq!(&payload[..3], b"abc");
        assert!(payload.len() <= MAX_DIRECT_DATA_SIZE as usize);
    }

    #[test]
    fn test_missing_segment_list() {
        let (img, _) = image(&[b"abc".to_vec()]);
        let db = BigDataBlock {
            segment_count: 1,
            segment_list_offset: 0x7000,
        };
        assert!(db.assemble(&img, 3).is_err());
    }
}
