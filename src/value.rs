//! `vk` cells and the typed view of their payloads.

use crate::bigdata::MAX_DIRECT_DATA_SIZE;
use crate::cell::{Cell, ValueType};
use crate::error::{RegistryError, Result};
use crate::image::{HiveImage, NULL_OFFSET};
use crate::utils::{read_ascii_string, read_u16_le, read_u32_le, read_utf16_string};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fmt;

const VALUE_KEY_MIN_SIZE: usize = 0x14;

/// High bit of the data size field: payload lives in the offset field.
const INLINE_DATA_FLAG: u32 = 0x8000_0000;

/// Name is one byte per character.
const VALUE_COMP_NAME: u16 = 0x0001;

/// Decoded `vk` cell.
#[derive(Debug, Clone)]
pub struct ValueKey {
    /// Name bytes following the fixed part.
    pub name_length: u16,

    /// Size field as stored, inline bit included.
    pub data_size_raw: u32,

    /// Payload length.
    pub data_length: u32,

    /// Data cell, or up to four payload bytes when inline.
    pub data_offset: u32,

    /// Declared type code.
    pub data_type: ValueType,

    /// Bit 0 set when the name is ASCII.
    pub flags: u16,

    /// Empty for the default value.
    pub name: String,
}

impl ValueKey {
    /// Decodes cell data starting at the `vk` tag.
    ///
    /// # Errors
    ///
    /// `TruncatedData` when the fixed part or the name runs past the cell,
    /// `InvalidFormat` for another tag.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < VALUE_KEY_MIN_SIZE {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: VALUE_KEY_MIN_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"vk" {
            return Err(RegistryError::InvalidFormat(format!("{:#x} is not a vk cell", offset)));
        }

        let name_length = read_u16_le(data, 0x02)?;
        let data_size_raw = read_u32_le(data, 0x04)?;
        let data_offset = read_u32_le(data, 0x08)?;
        let data_type = ValueType::from_u32(read_u32_le(data, 0x0C)?);
        let flags = read_u16_le(data, 0x10)?;

        let name_end = VALUE_KEY_MIN_SIZE + name_length as usize;
        if name_end > data.len() {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: name_end,
                actual: data.len(),
            });
        }

        let name_data = &data[VALUE_KEY_MIN_SIZE..name_end];
        let name = if flags & VALUE_COMP_NAME != 0 {
            read_ascii_string(name_data)
        } else {
            read_utf16_string(name_data)
        };

        Ok(ValueKey {
            name_length,
            data_size_raw,
            data_length: data_size_raw & !INLINE_DATA_FLAG,
            data_offset,
            data_type,
            flags,
            name,
        })
    }

    /// Payload lives in `data_offset` rather than a cell.
    pub fn is_inline_data(&self) -> bool {
        self.data_size_raw & INLINE_DATA_FLAG != 0 || self.data_size_raw == 0
    }

    /// The inline payload, never longer than four bytes.
    pub fn inline_data(&self) -> Vec<u8> {
        let bytes = self.data_offset.to_le_bytes();
        let len = (self.data_length as usize).min(bytes.len());
        bytes[..len].to_vec()
    }

    /// Payload bytes, read inline, from one data cell, or from `db`
    /// segments above [`MAX_DIRECT_DATA_SIZE`].
    ///
    /// # Errors
    ///
    /// Fails when a referenced cell is out of range or free.
    pub fn raw_data(&self, image: &HiveImage) -> Result<Vec<u8>> {
        if self.is_inline_data() {
            return Ok(self.inline_data());
        }
        if self.data_offset == NULL_OFFSET {
            return Ok(Vec::new());
        }

        let length = self.data_length as usize;
        if self.data_length > MAX_DIRECT_DATA_SIZE {
            if let Ok(Cell::BigData(db)) = image.decode(self.data_offset) {
                return db.assemble(image, length);
            }
        }

        let cell = image.read_cell(self.data_offset)?;
        Ok(cell[..length.min(cell.len())].to_vec())
    }
}

/// A payload interpreted by its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ValueData {
    /// REG_NONE, or an integer type with too few bytes.
    None,

    /// REG_SZ
    String(String),

    /// REG_EXPAND_SZ, unexpanded.
    ExpandString(String),

    /// REG_LINK
    Link(String),

    /// REG_BINARY, resource types and unknown codes.
    Binary(Vec<u8>),

    /// REG_DWORD
    Dword(u32),

    /// REG_DWORD_BIG_ENDIAN
    DwordBigEndian(u32),

    /// REG_MULTI_SZ
    MultiString(Vec<String>),

    /// REG_QWORD
    Qword(u64),
}

impl ValueData {
    /// Converts a raw payload according to its type code.
    ///
    /// Integer payloads shorter than four bytes decode to [`ValueData::None`].
    /// A QWORD payload of four to seven bytes is widened from its low DWORD.
    pub fn parse(data: &[u8], value_type: ValueType) -> Self {
        match value_type {
            ValueType::None => ValueData::None,

            ValueType::String => ValueData::String(read_utf16_string(data)),
            ValueType::ExpandString => ValueData::ExpandString(read_utf16_string(data)),
            ValueType::Link => ValueData::Link(read_utf16_string(data)),

            ValueType::Dword if data.len() >= 4 => ValueData::Dword(LittleEndian::read_u32(data)),
            ValueType::DwordBigEndian if data.len() >= 4 => {
                ValueData::DwordBigEndian(BigEndian::read_u32(data))
            }

            ValueType::Qword if data.len() >= 8 => ValueData::Qword(LittleEndian::read_u64(data)),
            ValueType::Qword if data.len() >= 4 => {
                ValueData::Qword(u64::from(LittleEndian::read_u32(data)))
            }

            ValueType::Dword | ValueType::DwordBigEndian | ValueType::Qword => ValueData::None,

            ValueType::MultiString => ValueData::MultiString(parse_multi_string(data)),

            ValueType::Binary
            | ValueType::ResourceList
            | ValueType::FullResourceDescriptor
            | ValueType::ResourceRequirementsList
            | ValueType::Unknown(_) => ValueData::Binary(data.to_vec()),
        }
    }

    /// Returns the text of a string, expandable string or link value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueData::String(s) | ValueData::ExpandString(s) | ValueData::Link(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer of a DWORD value (either byte order).
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ValueData::Dword(d) | ValueData::DwordBigEndian(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the integer of a QWORD value.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ValueData::Qword(q) => Some(*q),
            _ => None,
        }
    }

    /// Returns the bytes of a binary value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ValueData::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the strings of a multi-string value.
    pub fn as_multi_string(&self) -> Option<&[String]> {
        match self {
            ValueData::MultiString(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueData::None => write!(f, "(none)"),
            ValueData::String(s) | ValueData::ExpandString(s) | ValueData::Link(s) => f.write_str(s),
            ValueData::Binary(b) => f.write_str(&hex::encode(b)),
            ValueData::Dword(d) | ValueData::DwordBigEndian(d) => write!(f, "{} (0x{:08X})", d, d),
            ValueData::Qword(q) => write!(f, "{} (0x{:016X})", q, q),
            ValueData::MultiString(strings) => f.write_str(&strings.join(", ")),
        }
    }
}

/// Splits a REG_MULTI_SZ payload on single NUL code units. A double NUL ends
/// the list; empty segments are dropped.
fn parse_multi_string(data: &[u8]) -> Vec<String> {
    let mut strings = Vec::new();
    let mut start = 0;
    let mut previous_nul = false;

    for (i, unit) in data.chunks_exact(2).enumerate() {
        let pos = i * 2;
        if unit == [0, 0] {
            if previous_nul {
                return strings;
            }
            if pos > start {
                strings.push(read_utf16_string(&data[start..pos]));
            }
            start = pos + 2;
            previous_nul = true;
        } else {
            previous_nul = false;
        }
    }

    let tail_end = data.len() - data.len() % 2;
    if tail_end > start {
        strings.push(read_utf16_string(&data[start..tail_end]));
    }
    strings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn vk(name: &[u8], size_raw: u32, data_offset: u32, value_type: u32, flags: u16) -> Vec<u8> {
        let mut data = vec![0u8; VALUE_KEY_MIN_SIZE + name.len()];
        data[0..2].copy_from_slice(b"vk");
        data[2..4].copy_from_slice(&(name.len() as u16).to_le_bytes());
        data[4..8].copy_from_slice(&size_raw.to_le_bytes());
        data[8..12].copy_from_slice(&data_offset.to_le_bytes());
        data[12..16].copy_from_slice(&value_type.to_le_bytes());
        data[16..18].copy_from_slice(&flags.to_le_bytes());
        data[VALUE_KEY_MIN_SIZE..].copy_from_slice(name);
        data
    }

    #[test]
    fn test_value_key_minimum_size() {
        let data = vec![0u8; 19];
        assert!(ValueKey::parse(&data, 0).is_err());
    }

    #[test]
    fn test_value_key_invalid_signature() {
        let mut data = vec![0u8; 24];
        data[0..2].copy_from_slice(b"XX");
        assert!(ValueKey::parse(&data, 0).is_err());
    }

    #[test]
    fn test_inline_data() {
        let data = vk(b"Start", 0x8000_0004, 0x0403_0201, 4, VALUE_COMP_NAME);
        let value = ValueKey::parse(&data, 0).unwrap();
        assert_eq!(value.name, "Start");
        assert!(value.is_inline_data());
        assert_eq!(value.inline_data(), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_inline_data_truncated_to_four_bytes() {
        let data = vk(b"X", 0x8000_0010, 0xAABB_CCDD, 3, VALUE_COMP_NAME);
        let value = ValueKey::parse(&data, 0).unwrap();
        assert_eq!(value.inline_data().len(), 4);

        let data = vk(b"X", 0x8000_0002, 0xAABB_CCDD, 3, VALUE_COMP_NAME);
        assert_eq!(ValueKey::parse(&data, 0).unwrap().inline_data(), vec![0xDD, 0xCC]);
    }

    #[test]
    fn test_zero_size_is_inline_and_empty() {
        let data = vk(b"", 0, 0x1234, 1, 0);
        let value = ValueKey::parse(&data, 0).unwrap();
        assert!(value.is_inline_data());
        assert!(value.inline_data().is_empty());
        assert_eq!(value.name, "");
    }

    #[test]
    fn test_utf16_value_name() {
        let data = vk(&utf16("Pfad"), 4, 0x80, 1, 0);
        let value = ValueKey::parse(&data, 0).unwrap();
        assert_eq!(value.name, "Pfad");
        assert!(!value.is_inline_data());
    }

    #[test]
    fn test_dword_and_big_endian() {
        assert_eq!(ValueData::parse(&42u32.to_le_bytes(), ValueType::Dword).as_u32(), Some(42));
        assert_eq!(
            ValueData::parse(&42u32.to_be_bytes(), ValueType::DwordBigEndian),
            ValueData::DwordBigEndian(42)
        );
        assert_eq!(ValueData::parse(&[1, 2], ValueType::Dword), ValueData::None);
    }

    #[test]
    fn test_qword_and_widening() {
        let v = ValueData::parse(&0x1234_5678_9ABC_DEF0u64.to_le_bytes(), ValueType::Qword);
        assert_eq!(v.as_u64(), Some(0x1234_5678_9ABC_DEF0));

        let v = ValueData::parse(&7u32.to_le_bytes(), ValueType::Qword);
        assert_eq!(v.as_u64(), Some(7));
    }

    #[test]
    fn test_strings() {
        let mut data = utf16("%SystemRoot%\\system32");
        data.extend_from_slice(&[0, 0]);
        let v = ValueData::parse(&data, ValueType::ExpandString);
        assert_eq!(v.as_str(), Some("%SystemRoot%\\system32"));
        assert_eq!(v.as_u32(), None);

        let v = ValueData::parse(&utf16("\\Registry\\Machine"), ValueType::Link);
        assert_eq!(v, ValueData::Link("\\Registry\\Machine".to_string()));
    }

    #[test]
    fn test_multi_string() {
        let mut data = Vec::new();
        for s in ["First", "Second", "Third"] {
            data.extend(utf16(s));
            data.extend_from_slice(&[0, 0]);
        }
        data.extend_from_slice(&[0, 0]);
        data.extend(utf16("garbage"));

        let v = ValueData::parse(&data, ValueType::MultiString);
        assert_eq!(
            v.as_multi_string().unwrap(),
            &["First".to_string(), "Second".to_string(), "Third".to_string()]
        );
    }

    #[test]
    fn test_multi_string_without_terminator() {
        let mut data = utf16("a");
        data.extend_from_slice(&[0, 0]);
        data.extend(utf16("b"));
        let v = ValueData::parse(&data, ValueType::MultiString);
        assert_eq!(v.as_multi_string().unwrap(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unknown_type_kept_as_binary() {
        let v = ValueData::parse(&[9, 8, 7], ValueType::Unknown(0x4242));
        assert_eq!(v.as_bytes(), Some(&[9u8, 8, 7][..]));
        assert_eq!(v.to_string(), "090807");
        assert_eq!(ValueData::parse(&[1], ValueType::None), ValueData::None);
    }
}
