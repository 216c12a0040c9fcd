//! Error types for registry hive decoding.
//!
//! Only three conditions make a hive load fail outright: the file is missing,
//! it cannot be read, or it does not carry a REGF base block. Everything
//! below the file level (bad offsets, foreign cell signatures, truncated
//! lists) is reported through the structural variants here, but the public
//! lookup API folds those into "not found" instead of propagating them.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Shorthand used by every decoder in the crate.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Coarse classification of a [`RegistryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The hive file does not exist.
    FileNotFound,
    /// The hive file exists but could not be read.
    IoError,
    /// The file is too small or does not start with the hive magic.
    InvalidSignature,
    /// A structure inside the hive could not be decoded.
    Corrupt,
}

/// Errors that can occur while loading or decoding a hive.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The hive file does not exist.
    #[error("Hive file not found: {}", path.display())]
    FileNotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// Reading a hive or log file failed.
    #[error("Read failed: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic signature in a header or structure.
    #[error("Invalid signature: expected {}, found {}", hex::encode(expected), hex::encode(found))]
    InvalidSignature {
        /// Signature bytes that were expected.
        expected: Vec<u8>,
        /// Signature bytes actually present.
        found: Vec<u8>,
    },

    /// File is smaller than the fixed base block.
    #[error("File is {size} bytes, shorter than the {minimum}-byte base block")]
    HiveTooSmall {
        /// Actual size in bytes.
        size: usize,
        /// Required minimum.
        minimum: usize,
    },

    /// A structure carries the wrong tag or impossible field values.
    #[error("Malformed structure: {0}")]
    InvalidFormat(String),

    /// Cell offset does not resolve inside the image.
    #[error("Cell offset {offset:#x} outside image of {hive_size:#x} bytes")]
    InvalidOffset {
        /// Offset relative to the first hive bin.
        offset: u32,
        /// Length of the image in bytes.
        hive_size: usize,
    },

    /// Cell size is too small or overruns the image.
    #[error("Implausible cell size {size} at offset {offset:#x}")]
    InvalidCellSize {
        /// Raw signed size field.
        size: i32,
        /// Offset relative to the first hive bin.
        offset: u32,
    },

    /// A free cell was found where an allocated one is required.
    #[error("Cell at offset {offset:#x} is not allocated")]
    UnallocatedCell {
        /// Offset relative to the first hive bin.
        offset: u32,
    },

    /// Unknown or unexpected cell signature.
    #[error("Unknown cell type: {} at offset {offset:#x}", hex::encode(cell_type))]
    UnknownCellType {
        /// Signature bytes found.
        cell_type: [u8; 2],
        /// Offset relative to the first hive bin.
        offset: u32,
    },

    /// Fewer bytes remain than the structure needs.
    #[error("Structure at {offset:#x} needs {expected} bytes, only {actual} available")]
    TruncatedData {
        /// Offset of the structure being read.
        offset: u32,
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A subkey list reference points at a cell that is not a list.
    #[error("Not a subkey list signature: {}", hex::encode(list_type))]
    InvalidSubkeyList {
        /// Signature bytes found.
        list_type: [u8; 2],
    },
}

impl RegistryError {
    /// Signature mismatch between two byte strings.
    pub fn invalid_signature(expected: &[u8], found: &[u8]) -> Self {
        Self::InvalidSignature {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Offset that does not resolve inside an image of `hive_size` bytes.
    pub fn invalid_offset(offset: u32, hive_size: usize) -> Self {
        Self::InvalidOffset { offset, hive_size }
    }

    /// Cell whose raw size field cannot be right.
    pub fn invalid_cell_size(size: i32, offset: u32) -> Self {
        Self::InvalidCellSize { size, offset }
    }

    /// Cell tag outside the known set.
    pub fn unknown_cell_type(cell_type: [u8; 2], offset: u32) -> Self {
        Self::UnknownCellType { cell_type, offset }
    }

    /// Maps an I/O error raised while opening `path`, separating a missing
    /// file from other read failures.
    pub fn from_open(err: io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::FileNotFound { path: path.into() }
        } else {
            Self::Io(err)
        }
    }

    /// Returns the coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            Self::Io(_) => ErrorKind::IoError,
            Self::InvalidSignature { .. } | Self::HiveTooSmall { .. } => ErrorKind::InvalidSignature,
            _ => ErrorKind::Corrupt,
        }
    }
}
