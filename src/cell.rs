//! Cell signatures and the decode dispatch over cell shapes.
//!
//! Every structure inside a hive bin is a cell tagged by a 2-byte
//! signature. [`Cell::parse`] is the one place that reads the tag and hands
//! the bytes to the matching decoder; the rest of the crate matches on the
//! resulting [`Cell`] variant instead of re-reading signatures.

use crate::bigdata::BigDataBlock;
use crate::error::{RegistryError, Result};
use crate::key::KeyNode;
use crate::subkey_list::SubkeyList;
use crate::value::ValueKey;
use std::fmt;

/// The tag carried in the first two bytes of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    /// `nk`
    KeyNode,
    /// `vk`
    ValueKey,
    /// `sk`
    Security,
    /// `li`
    IndexLeaf,
    /// `lf`
    FastLeaf,
    /// `lh`
    HashLeaf,
    /// `ri`
    IndexRoot,
    /// `db`
    DataBlock,
}

const SIGNATURES: [(&[u8; 2], CellType); 8] = [
    (b"nk", CellType::KeyNode),
    (b"vk", CellType::ValueKey),
    (b"sk", CellType::Security),
    (b"li", CellType::IndexLeaf),
    (b"lf", CellType::FastLeaf),
    (b"lh", CellType::HashLeaf),
    (b"ri", CellType::IndexRoot),
    (b"db", CellType::DataBlock),
];

impl CellType {
    /// Looks up the tag, or `None` for anything outside the known set.
    pub fn from_signature(sig: &[u8; 2]) -> Option<Self> {
        SIGNATURES.iter().find(|(s, _)| *s == sig).map(|&(_, t)| t)
    }

    /// The two signature bytes.
    pub fn signature(&self) -> &'static [u8; 2] {
        SIGNATURES
            .iter()
            .find(|(_, t)| t == self)
            .map(|&(s, _)| s)
            .unwrap_or(b"??")
    }

    /// lf, lh, li or ri.
    pub fn is_subkey_list(&self) -> bool {
        matches!(
            self,
            CellType::IndexLeaf | CellType::FastLeaf | CellType::HashLeaf | CellType::IndexRoot
        )
    }
}

/// A decoded cell.
#[derive(Debug, Clone)]
pub enum Cell {
    /// Key node.
    Key(KeyNode),
    /// Value node.
    Value(ValueKey),
    /// One of the four subkey list shapes.
    SubkeyList(SubkeyList),
    /// Big data header.
    BigData(BigDataBlock),
    /// Security descriptor; contents are not decoded.
    Security,
}

impl Cell {
    /// Decodes allocated cell data (size field already stripped) by its
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCellType` for a signature outside the known set, or
    /// whatever the shape-specific decoder reports.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        let sig = match data {
            [a, b, ..] => [*a, *b],
            _ => {
                return Err(RegistryError::TruncatedData {
                    offset,
                    expected: 2,
                    actual: data.len(),
                })
            }
        };

        match CellType::from_signature(&sig) {
            Some(CellType::KeyNode) => KeyNode::parse(data, offset).map(Cell::Key),
            Some(CellType::ValueKey) => ValueKey::parse(data, offset).map(Cell::Value),
            Some(t) if t.is_subkey_list() => SubkeyList::parse(data, offset).map(Cell::SubkeyList),
            Some(CellType::DataBlock) => BigDataBlock::parse(data, offset).map(Cell::BigData),
            Some(_) => Ok(Cell::Security),
            None => Err(RegistryError::unknown_cell_type(sig, offset)),
        }
    }

    /// Returns the contained key node, if this is one.
    pub fn into_key(self) -> Option<KeyNode> {
        match self {
            Cell::Key(k) => Some(k),
            _ => None,
        }
    }

    /// Returns the contained value node, if this is one.
    pub fn into_value(self) -> Option<ValueKey> {
        match self {
            Cell::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the contained subkey list, if this is one.
    pub fn into_subkey_list(self) -> Option<SubkeyList> {
        match self {
            Cell::SubkeyList(l) => Some(l),
            _ => None,
        }
    }
}

/// The flags word at offset 0x02 of a key node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyNodeFlags(pub u16);

impl KeyNodeFlags {
    /// Exists only in memory.
    pub const VOLATILE: u16 = 0x0001;

    /// Mount point of another hive.
    pub const HIVE_EXIT: u16 = 0x0002;

    /// Root of the hive.
    pub const ROOT_KEY: u16 = 0x0004;

    /// Protected from deletion.
    pub const NO_DELETE: u16 = 0x0008;

    /// Symbolic link to another key.
    pub const SYM_LINK: u16 = 0x0010;

    /// Name is stored one byte per character.
    pub const COMP_NAME: u16 = 0x0020;

    /// Wraps a raw flags word.
    pub fn new(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns true if any bit of `mask` is set.
    pub fn contains(&self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    /// One byte per character name.
    pub fn is_compressed(&self) -> bool {
        self.contains(Self::COMP_NAME)
    }

    /// Volatile key.
    pub fn is_volatile(&self) -> bool {
        self.contains(Self::VOLATILE)
    }

    /// Hive root.
    pub fn is_root(&self) -> bool {
        self.contains(Self::ROOT_KEY)
    }

    /// Symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.contains(Self::SYM_LINK)
    }
}

/// Declared type of a value's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ValueType {
    /// REG_NONE
    None,
    /// REG_SZ
    String,
    /// REG_EXPAND_SZ
    ExpandString,
    /// REG_BINARY
    Binary,
    /// REG_DWORD (little-endian)
    Dword,
    /// REG_DWORD_BIG_ENDIAN
    DwordBigEndian,
    /// REG_LINK
    Link,
    /// REG_MULTI_SZ
    MultiString,
    /// REG_RESOURCE_LIST
    ResourceList,
    /// REG_FULL_RESOURCE_DESCRIPTOR
    FullResourceDescriptor,
    /// REG_RESOURCE_REQUIREMENTS_LIST
    ResourceRequirementsList,
    /// REG_QWORD (little-endian)
    Qword,
    /// Any other code, kept so the payload can still be returned as bytes.
    Unknown(u32),
}

/// Known type codes in order; the index is the code.
const KNOWN_TYPES: [(ValueType, &str); 12] = [
    (ValueType::None, "REG_NONE"),
    (ValueType::String, "REG_SZ"),
    (ValueType::ExpandString, "REG_EXPAND_SZ"),
    (ValueType::Binary, "REG_BINARY"),
    (ValueType::Dword, "REG_DWORD"),
    (ValueType::DwordBigEndian, "REG_DWORD_BIG_ENDIAN"),
    (ValueType::Link, "REG_LINK"),
    (ValueType::MultiString, "REG_MULTI_SZ"),
    (ValueType::ResourceList, "REG_RESOURCE_LIST"),
    (ValueType::FullResourceDescriptor, "REG_FULL_RESOURCE_DESCRIPTOR"),
    (ValueType::ResourceRequirementsList, "REG_RESOURCE_REQUIREMENTS_LIST"),
    (ValueType::Qword, "REG_QWORD"),
];

impl ValueType {
    /// Maps a raw type code. Codes outside 0-11 are preserved in
    /// [`ValueType::Unknown`].
    pub fn from_u32(code: u32) -> Self {
        KNOWN_TYPES
            .get(code as usize)
            .map_or(ValueType::Unknown(code), |&(t, _)| t)
    }

    /// Returns the raw type code.
    pub fn code(&self) -> u32 {
        match self {
            ValueType::Unknown(code) => *code,
            known => KNOWN_TYPES
                .iter()
                .position(|(t, _)| t == known)
                .map_or(u32::MAX, |i| i as u32),
        }
    }

    /// Windows name of the type; `REG_UNKNOWN` for unrecognized codes.
    pub fn name(&self) -> &'static str {
        KNOWN_TYPES
            .iter()
            .find(|(t, _)| t == self)
            .map_or("REG_UNKNOWN", |&(_, name)| name)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Unknown(code) => write!(f, "REG_UNKNOWN({:#x})", code),
            known => f.write_str(known.name()),
        }
    }
}
