//! Subkey list parsing (lf, lh, li, ri) and traversal.
//!
//! A key's children hang off one list cell in one of four shapes. Index
//! roots point at further lists, so the children of a large key form a
//! small tree of lists. [`SubkeyWalk`] flattens that tree into a lazy
//! sequence of `(name, key offset)` pairs; listing names and finding one
//! child by name are both plain consumers of it.

use crate::cell::{Cell, CellType};
use crate::error::{RegistryError, Result};
use crate::image::{HiveImage, NULL_OFFSET};
use crate::utils::{read_u16_le, read_u32_le};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Index roots nested deeper than this are ignored.
const MAX_LIST_DEPTH: usize = 8;

/// The four list shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubkeyListType {
    /// `li`: bare key offsets.
    IndexLeaf,

    /// `lf`: offset plus the first four name characters.
    FastLeaf,

    /// `lh`: offset plus a name hash.
    HashLeaf,

    /// `ri`: offsets of further lists, one level deep in practice.
    IndexRoot,
}

impl SubkeyListType {
    /// Shape for a tag; `InvalidSubkeyList` for anything else.
    pub fn from_signature(sig: &[u8; 2]) -> Result<Self> {
        match CellType::from_signature(sig) {
            Some(CellType::IndexLeaf) => Ok(SubkeyListType::IndexLeaf),
            Some(CellType::FastLeaf) => Ok(SubkeyListType::FastLeaf),
            Some(CellType::HashLeaf) => Ok(SubkeyListType::HashLeaf),
            Some(CellType::IndexRoot) => Ok(SubkeyListType::IndexRoot),
            _ => Err(RegistryError::InvalidSubkeyList { list_type: *sig }),
        }
    }

    /// Size of one element in bytes.
    fn element_size(self) -> usize {
        match self {
            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => 8,
            SubkeyListType::IndexLeaf | SubkeyListType::IndexRoot => 4,
        }
    }
}

/// One slot of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubkeyListEntry {
    /// `nk` cell.
    pub key_offset: u32,

    /// Name hint (first 4 chars for lf, hash for lh). Not used for lookup.
    pub name_hint: u32,
}

/// Decoded list cell.
#[derive(Debug, Clone)]
pub enum SubkeyList {
    /// Index leaf - key node offsets.
    IndexLeaf(Vec<u32>),

    /// Fast leaf - key node offsets with name prefixes.
    FastLeaf(Vec<SubkeyListEntry>),

    /// Hash leaf - key node offsets with name hashes.
    HashLeaf(Vec<SubkeyListEntry>),

    /// Index root - offsets of further subkey lists.
    IndexRoot(Vec<u32>),
}

impl SubkeyList {
    /// Decodes a list cell. A count claiming more elements than the cell
    /// holds is clamped, so a damaged list still yields its readable prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is truncated or the signature is not
    /// one of the four list shapes.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < 4 {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: 4,
                actual: data.len(),
            });
        }

        let list_type = SubkeyListType::from_signature(&[data[0], data[1]])?;
        let declared = read_u16_le(data, 2)? as usize;
        let fits = (data.len() - 4) / list_type.element_size();
        let count = declared.min(fits);
        if count < declared {
            debug!(
                offset = %format!("{:#x}", offset),
                declared,
                count,
                "Subkey list count exceeds cell size"
            );
        }

        let element = |i: usize| read_u32_le(data, 4 + i * list_type.element_size());

        Ok(match list_type {
            SubkeyListType::IndexLeaf => SubkeyList::IndexLeaf((0..count).map(element).collect::<Result<_>>()?),
            SubkeyListType::IndexRoot => SubkeyList::IndexRoot((0..count).map(element).collect::<Result<_>>()?),
            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => {
                let entries = (0..count)
                    .map(|i| {
                        Ok(SubkeyListEntry {
                            key_offset: element(i)?,
                            name_hint: read_u32_le(data, 8 + i * 8)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                if list_type == SubkeyListType::FastLeaf {
                    SubkeyList::FastLeaf(entries)
                } else {
                    SubkeyList::HashLeaf(entries)
                }
            }
        })
    }

    /// Returns an iterator over the offsets this list points at: key nodes
    /// for leaves, further lists for an index root.
    pub fn offsets(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            SubkeyList::IndexLeaf(offsets) | SubkeyList::IndexRoot(offsets) => Box::new(offsets.iter().copied()),
            SubkeyList::FastLeaf(entries) | SubkeyList::HashLeaf(entries) => {
                Box::new(entries.iter().map(|e| e.key_offset))
            }
        }
    }

    /// Slots read.
    pub fn len(&self) -> usize {
        match self {
            SubkeyList::IndexLeaf(offsets) | SubkeyList::IndexRoot(offsets) => offsets.len(),
            SubkeyList::FastLeaf(entries) | SubkeyList::HashLeaf(entries) => entries.len(),
        }
    }

    /// No slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots point at lists rather than keys.
    pub fn is_index_root(&self) -> bool {
        matches!(self, SubkeyList::IndexRoot(_))
    }
}

struct Frame {
    offsets: Vec<u32>,
    next: usize,
    nested: bool,
}

/// Lazy pre-order walk over every key reachable from a subkey list.
///
/// Yields `(name, key offset)` pairs. Unreadable lists and key cells are
/// skipped; list cells already visited in this walk are not entered again,
/// so cyclic index roots terminate.
pub struct SubkeyWalk<'a> {
    image: &'a HiveImage,
    frames: Vec<Frame>,
    visited_lists: HashSet<u32>,
}

impl<'a> SubkeyWalk<'a> {
    /// Starts a walk at the list cell `list_offset`.
    pub fn new(image: &'a HiveImage, list_offset: u32) -> Self {
        let mut walk = Self {
            image,
            frames: Vec::new(),
            visited_lists: HashSet::new(),
        };
        walk.enter(list_offset);
        walk
    }

    fn enter(&mut self, list_offset: u32) {
        if list_offset == NULL_OFFSET || self.frames.len() >= MAX_LIST_DEPTH {
            return;
        }
        if !self.visited_lists.insert(list_offset) {
            trace!(offset = %format!("{:#x}", list_offset), "Subkey list already visited");
            return;
        }

        match self.image.decode(list_offset).map(Cell::into_subkey_list) {
            Ok(Some(list)) => self.frames.push(Frame {
                offsets: list.offsets().collect(),
                next: 0,
                nested: list.is_index_root(),
            }),
            Ok(None) => debug!(offset = %format!("{:#x}", list_offset), "Cell is not a subkey list"),
            Err(e) => debug!(offset = %format!("{:#x}", list_offset), error = %e, "Unreadable subkey list"),
        }
    }
}

impl Iterator for SubkeyWalk<'_> {
    type Item = (String, u32);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frames.last_mut()?;
            let Some(&offset) = frame.offsets.get(frame.next) else {
                self.frames.pop();
                continue;
            };
            frame.next += 1;

            if frame.nested {
                self.enter(offset);
                continue;
            }

            match self.image.decode(offset).map(Cell::into_key) {
                Ok(Some(key)) => return Some((key.name, offset)),
                _ => trace!(offset = %format!("{:#x}", offset), "Skipping unreadable subkey"),
            }
        }
    }
}

/// Names of every readable child reachable from `list_offset`, in list order.
pub fn collect_names(image: &HiveImage, list_offset: u32) -> Vec<String> {
    SubkeyWalk::new(image, list_offset).map(|(name, _)| name).collect()
}

/// Offset of the child whose name matches `name` case-insensitively.
pub fn find_subkey(image: &HiveImage, list_offset: u32, name: &str) -> Option<u32> {
    let wanted = name.to_lowercase();
    SubkeyWalk::new(image, list_offset)
        .find(|(candidate, _)| candidate.to_lowercase() == wanted)
        .map(|(_, offset)| offset)
}
