//! The 4 KiB base block at the front of every hive.
//!
//! Log replay reads the two sequence numbers from here to decide which
//! entries are newer than the file. Lookup reads the root cell offset, and
//! the bins size bounds how much of the image is treated as cell storage.

use crate::error::{RegistryError, Result};
use crate::utils::{calculate_checksum, filetime_to_datetime, read_u32_le, read_u64_le, read_utf16_string};
use chrono::{DateTime, Utc};
use std::fmt;

/// Bytes before the first hive bin.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Magic at offset 0.
pub const REGF_SIGNATURE: &[u8; 4] = b"regf";

const PRIMARY_SEQUENCE_OFFSET: usize = 0x04;
const SECONDARY_SEQUENCE_OFFSET: usize = 0x08;
const LAST_WRITTEN_OFFSET: usize = 0x0C;
const ROOT_CELL_OFFSET: usize = 0x24;
const HIVE_BINS_SIZE_OFFSET: usize = 0x28;
const FILE_NAME_RANGE: std::ops::Range<usize> = 0x30..0xB0;
const CHECKSUM_OFFSET: usize = 0x1FC;

/// Decoded base block.
#[derive(Debug, Clone)]
pub struct BaseBlock {
    /// Always `regf` once parsed.
    pub signature: [u8; 4],

    /// Bumped before a write begins.
    pub primary_sequence: u32,

    /// Bumped after the write completes.
    pub secondary_sequence: u32,

    /// FILETIME of the last flush.
    pub last_written: u64,

    /// Format major version, 1 in practice.
    pub major_version: u32,

    /// Format minor version (3 to 6).
    pub minor_version: u32,

    /// 0 for a primary file; log files carry 1, 2 or 6.
    pub file_type: u32,

    /// 1 for the direct memory load layout.
    pub file_format: u32,

    /// Root key cell, relative to the first bin.
    pub root_cell_offset: u32,

    /// Bytes of bin storage following the base block.
    pub hive_bins_size: u32,

    /// Sector clustering, 1 on every observed hive.
    pub clustering_factor: u32,

    /// Tail of the path the hive was last saved under.
    pub file_name: String,

    /// XOR of the dwords before offset 0x1FC, as stored.
    pub checksum: u32,

    /// `checksum` agrees with the bytes.
    pub checksum_valid: bool,
}

impl BaseBlock {
    /// Parses a base block from the start of a hive image.
    ///
    /// Only the size and the magic are enforced. A checksum mismatch or an
    /// unusual version is recorded on the returned block and left to the
    /// caller to judge, since damaged evidence is still worth reading.
    ///
    /// # Errors
    ///
    /// Returns `HiveTooSmall` if `data` is shorter than [`BASE_BLOCK_SIZE`]
    /// and `InvalidSignature` if it does not start with `regf`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&data[0..4]);

        if &signature != REGF_SIGNATURE {
            return Err(RegistryError::invalid_signature(REGF_SIGNATURE, &signature));
        }

        let checksum = read_u32_le(data, CHECKSUM_OFFSET)?;

        Ok(BaseBlock {
            signature,
            primary_sequence: read_u32_le(data, PRIMARY_SEQUENCE_OFFSET)?,
            secondary_sequence: read_u32_le(data, SECONDARY_SEQUENCE_OFFSET)?,
            last_written: read_u64_le(data, LAST_WRITTEN_OFFSET)?,
            major_version: read_u32_le(data, 0x14)?,
            minor_version: read_u32_le(data, 0x18)?,
            file_type: read_u32_le(data, 0x1C)?,
            file_format: read_u32_le(data, 0x20)?,
            root_cell_offset: read_u32_le(data, ROOT_CELL_OFFSET)?,
            hive_bins_size: read_u32_le(data, HIVE_BINS_SIZE_OFFSET)?,
            clustering_factor: read_u32_le(data, 0x2C)?,
            file_name: read_utf16_string(&data[FILE_NAME_RANGE]),
            checksum,
            checksum_valid: checksum == calculate_checksum(data),
        })
    }

    /// Both sequence numbers agree, meaning the last write finished.
    pub fn is_consistent(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }

    /// Lowest of the two sequence numbers. A log entry is newer than the
    /// hive only if its sequence number is strictly greater than this.
    pub fn min_sequence(&self) -> u32 {
        self.primary_sequence.min(self.secondary_sequence)
    }

    /// `last_written` as UTC, if it is a representable FILETIME.
    pub fn last_written_datetime(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.last_written)
    }

    /// Overwrites the hive bins size field of a raw image and refreshes the
    /// stored checksum so the block stays self-consistent.
    pub(crate) fn write_hive_bins_size(data: &mut [u8], size: u32) {
        if data.len() < BASE_BLOCK_SIZE {
            return;
        }
        data[HIVE_BINS_SIZE_OFFSET..HIVE_BINS_SIZE_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
        let checksum = calculate_checksum(data);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
    }
}

impl fmt::Display for BaseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "regf v{}.{} seq {}/{}{} root {:#x} bins {:#x} name {:?}",
            self.major_version,
            self.minor_version,
            self.primary_sequence,
            self.secondary_sequence,
            if self.is_consistent() { "" } else { " (dirty)" },
            self.root_cell_offset,
            self.hive_bins_size,
            self.file_name
        )
    }
}
