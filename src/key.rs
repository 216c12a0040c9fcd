//! `nk` cells: one per key, holding the counts and list offsets that link
//! the tree together.

use crate::cell::KeyNodeFlags;
use crate::error::{RegistryError, Result};
use crate::utils::{filetime_to_datetime, read_ascii_string, read_u16_le, read_u32_le, read_u64_le, read_utf16_string};
use chrono::{DateTime, Utc};
use tracing::warn;

const KEY_NODE_MIN_SIZE: usize = 0x4C;

/// Where a key node keeps its name length and name bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameLayout {
    /// Length at 0x48, name at 0x4C.
    Canonical,
    /// Length at 0x4C, name at 0x50. Written by some third-party tools.
    Shifted,
}

impl NameLayout {
    fn length_offset(self) -> usize {
        match self {
            NameLayout::Canonical => 0x48,
            NameLayout::Shifted => 0x4C,
        }
    }

    fn name_offset(self) -> usize {
        self.length_offset() + 4
    }
}

/// Decoded `nk` cell. Offsets are relative to the first bin.
#[derive(Debug, Clone)]
pub struct KeyNode {
    /// Word at 0x02.
    pub flags: KeyNodeFlags,

    /// FILETIME of the last change to this key.
    pub last_written: u64,

    /// Parent `nk`.
    pub parent_offset: u32,

    /// Entries reachable through `subkey_list_offset`.
    pub subkey_count: u32,

    /// Meaningless on disk; volatile keys live only in memory.
    pub volatile_subkey_count: u32,

    /// `lf`/`lh`/`li`/`ri` cell.
    pub subkey_list_offset: u32,

    /// Counterpart of `volatile_subkey_count`.
    pub volatile_subkey_list_offset: u32,

    /// Entries in the value list.
    pub value_count: u32,

    /// Cell of `value_count` dword offsets to `vk` cells.
    pub value_list_offset: u32,

    /// `sk` cell; never decoded.
    pub security_offset: u32,

    /// Optional class string cell.
    pub class_name_offset: u32,

    /// Class string bytes.
    pub class_name_length: u16,

    /// Layout the name was read from.
    pub name_layout: NameLayout,

    /// Decoded from ASCII or UTF-16 depending on `flags`.
    pub name: String,
}

impl KeyNode {
    /// Decodes cell data starting at the `nk` tag. `offset` only feeds
    /// error messages and logs.
    ///
    /// # Errors
    ///
    /// Fails on short data, a foreign tag, or when neither name layout
    /// yields a plausible name.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < KEY_NODE_MIN_SIZE {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: KEY_NODE_MIN_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"nk" {
            return Err(RegistryError::InvalidFormat(format!("{:#x} is not an nk cell", offset)));
        }

        let flags = KeyNodeFlags::new(read_u16_le(data, 0x02)?);
        let (name_layout, name) = Self::read_name(data, flags, offset)?;

        Ok(KeyNode {
            flags,
            last_written: read_u64_le(data, 0x04)?,
            parent_offset: read_u32_le(data, 0x10)?,
            subkey_count: read_u32_le(data, 0x14)?,
            volatile_subkey_count: read_u32_le(data, 0x18)?,
            subkey_list_offset: read_u32_le(data, 0x1C)?,
            volatile_subkey_list_offset: read_u32_le(data, 0x20)?,
            value_count: read_u32_le(data, 0x24)?,
            value_list_offset: read_u32_le(data, 0x28)?,
            security_offset: read_u32_le(data, 0x2C)?,
            class_name_offset: read_u32_le(data, 0x30)?,
            class_name_length: read_u16_le(data, 0x4A)?,
            name_layout,
            name,
        })
    }

    /// Picks the name layout. A layout is a candidate when its length is
    /// non-zero and fits in the cell; plausibility of the decoded text only
    /// breaks ties. The canonical reading wins unless it is implausible and
    /// the shifted one is not.
    fn read_name(data: &[u8], flags: KeyNodeFlags, offset: u32) -> Result<(NameLayout, String)> {
        let canonical = Self::name_at(data, flags, NameLayout::Canonical);
        let shifted = Self::name_at(data, flags, NameLayout::Shifted);

        match (canonical, shifted) {
            (Some(name), _) if is_plausible_name(&name) => Ok((NameLayout::Canonical, name)),
            (_, Some(name)) if is_plausible_name(&name) => {
                warn!(
                    offset = %format!("{:#x}", offset),
                    name = %name,
                    "Key name read from shifted layout"
                );
                Ok((NameLayout::Shifted, name))
            }
            (Some(name), _) => {
                warn!(
                    offset = %format!("{:#x}", offset),
                    name = ?name,
                    "Ambiguous key name layout, keeping canonical reading"
                );
                Ok((NameLayout::Canonical, name))
            }
            (None, Some(name)) => {
                warn!(
                    offset = %format!("{:#x}", offset),
                    name = ?name,
                    "Ambiguous key name layout, only shifted reading fits"
                );
                Ok((NameLayout::Shifted, name))
            }
            (None, None) => Err(RegistryError::InvalidFormat(format!(
                "Key name at {:#x} overruns the cell in both layouts",
                offset
            ))),
        }
    }

    fn name_at(data: &[u8], flags: KeyNodeFlags, layout: NameLayout) -> Option<String> {
        let len = read_u16_le(data, layout.length_offset()).ok()? as usize;
        let start = layout.name_offset();
        let raw = data.get(start..start + len).filter(|raw| !raw.is_empty())?;

        Some(if flags.is_compressed() {
            read_ascii_string(raw)
        } else {
            read_utf16_string(raw)
        })
    }

    /// `last_written` as UTC.
    pub fn last_written_datetime(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.last_written)
    }

    /// Declares at least one subkey.
    pub fn has_subkeys(&self) -> bool {
        self.subkey_count > 0
    }

    /// Declares at least one value.
    pub fn has_values(&self) -> bool {
        self.value_count > 0
    }

    /// Carries the root flag.
    pub fn is_root(&self) -> bool {
        self.flags.is_root()
    }
}

/// Rejects empty names, control characters and backslashes.
fn is_plausible_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_control() || c == '\\')
}
