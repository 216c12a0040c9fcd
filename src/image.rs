//! The in-memory hive image and cell addressing.
//!
//! The whole hive file lives in one owned buffer. Every reference between
//! structures is a cell offset relative to the first hive bin, resolved
//! here with bounds checks; decoded structures never keep slices into the
//! buffer past the call that produced them.

use crate::cell::Cell;
use crate::error::{RegistryError, Result};
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::utils::{cell_offset_to_absolute, read_i32_le};
use tracing::trace;

/// Sentinel used by the format for "no cell".
pub const NULL_OFFSET: u32 = 0xFFFF_FFFF;

/// Owned hive bytes plus the parsed base block.
///
/// Mutation is limited to [`HiveImage::write_page`] and
/// [`HiveImage::refresh_header`], which are only reachable during recovery.
/// Once the image is handed to a [`crate::Hive`] it is read-only.
#[derive(Debug, Clone)]
pub struct HiveImage {
    data: Vec<u8>,
    base_block: BaseBlock,
}

impl HiveImage {
    /// Takes ownership of raw hive bytes and parses the base block.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is shorter than the base block or lacks the
    /// `regf` magic.
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        let base_block = BaseBlock::parse(&data)?;
        Ok(Self { data, base_block })
    }

    /// Parsed base block.
    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    /// Raw image bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Length of the image in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Converts a relative cell offset to an absolute buffer position.
    pub fn cell_offset(&self, relative: u32) -> Option<usize> {
        cell_offset_to_absolute(relative).ok().map(|abs| abs as usize)
    }

    /// Returns true if `min_size` bytes starting at absolute `offset` lie
    /// inside the image.
    pub fn valid_offset(&self, offset: usize, min_size: usize) -> bool {
        offset
            .checked_add(min_size)
            .map_or(false, |end| end <= self.data.len())
    }

    /// Reads the signed size field of the cell at a relative offset.
    ///
    /// Returns the magnitude and whether the cell is allocated (negative raw
    /// size).
    pub fn cell_size(&self, relative: u32) -> Result<(usize, bool)> {
        let abs = self
            .cell_offset(relative)
            .filter(|&abs| self.valid_offset(abs, 4))
            .ok_or_else(|| RegistryError::invalid_offset(relative, self.data.len()))?;
        let raw = read_i32_le(&self.data, abs)?;
        Ok((raw.unsigned_abs() as usize, raw < 0))
    }

    /// Returns the body of the allocated cell at `relative` (size field
    /// excluded).
    ///
    /// # Errors
    ///
    /// `InvalidOffset` for offsets outside the image, `UnallocatedCell` for
    /// free cells, and `InvalidCellSize`/`TruncatedData` when the declared
    /// size is implausible or runs past the end of the image.
    pub fn read_cell(&self, relative: u32) -> Result<&[u8]> {
        if relative == NULL_OFFSET {
            return Err(RegistryError::invalid_offset(relative, self.data.len()));
        }

        let (size, allocated) = self.cell_size(relative)?;
        if !allocated {
            return Err(RegistryError::UnallocatedCell { offset: relative });
        }
        if size < 4 {
            return Err(RegistryError::invalid_cell_size(-(size as i32), relative));
        }

        let abs = self
            .cell_offset(relative)
            .ok_or_else(|| RegistryError::invalid_offset(relative, self.data.len()))?;
        if !self.valid_offset(abs, size) {
            return Err(RegistryError::TruncatedData {
                offset: relative,
                expected: size,
                actual: self.data.len() - abs,
            });
        }

        Ok(&self.data[abs + 4..abs + size])
    }

    /// Reads and decodes the cell at `relative`.
    pub fn decode(&self, relative: u32) -> Result<Cell> {
        let data = self.read_cell(relative)?;
        let cell = Cell::parse(data, relative);
        if let Err(ref e) = cell {
            trace!(offset = %format!("{:#x}", relative), error = %e, "Cell decode failed");
        }
        cell
    }

    /// Copies `bytes` to absolute position `abs`, growing the buffer with
    /// zeroes if the write extends past its end.
    pub(crate) fn write_page(&mut self, abs: usize, bytes: &[u8]) -> bool {
        let Some(end) = abs.checked_add(bytes.len()) else {
            return false;
        };
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[abs..end].copy_from_slice(bytes);
        true
    }

    /// Records a new hive bins size in the base block and re-parses it.
    pub(crate) fn refresh_header(&mut self, hive_bins_size: Option<u32>) -> Result<()> {
        if let Some(size) = hive_bins_size {
            BaseBlock::write_hive_bins_size(&mut self.data, size);
        }
        self.base_block = BaseBlock::parse(&self.data)?;
        Ok(())
    }

    /// Absolute position of a page offset taken from a transaction log.
    pub(crate) fn page_position(page_offset: u32) -> usize {
        BASE_BLOCK_SIZE + page_offset as usize
    }
}
