//! Loaded hive, key lookup and traversal.
//!
//! Loading is two-phase: the file is read into a [`HiveImage`], sibling
//! transaction logs are replayed into it, and only then is the image moved
//! into a [`Hive`], which exposes no way to mutate it. Keys and values are
//! decoded from the bytes on every call and handed out as owned snapshots.

use crate::cell::{Cell, ValueType};
use crate::error::{RegistryError, Result};
use crate::header::BaseBlock;
use crate::image::{HiveImage, NULL_OFFSET};
use crate::key::KeyNode;
use crate::subkey_list::{collect_names, find_subkey};
use crate::transaction_log::{self, discover_logs, load_logs, ReplayStats, TransactionLog, MAX_HIVE_SIZE};
use crate::utils::read_u32_le;
use crate::value::{ValueData, ValueKey};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace, warn};

/// Path separator used in key paths.
pub const PATH_SEPARATOR: char = '\\';

/// Options controlling how a hive is loaded.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Discover and replay sibling transaction logs.
    pub recover_from_logs: bool,

    /// Replayed pages may not grow the image past this many bytes.
    pub max_hive_size: usize,

    /// Additional log files to replay after the discovered ones.
    pub extra_logs: Vec<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            recover_from_logs: true,
            max_hive_size: MAX_HIVE_SIZE,
            extra_logs: Vec::new(),
        }
    }
}

impl LoadOptions {
    /// Default options: recover from logs, 512 MB size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables transaction log replay.
    pub fn recover_from_logs(mut self, enabled: bool) -> Self {
        self.recover_from_logs = enabled;
        self
    }

    /// Sets the size limit for replayed pages.
    pub fn max_hive_size(mut self, bytes: usize) -> Self {
        self.max_hive_size = bytes;
        self
    }

    /// Adds a log file outside the hive's directory.
    pub fn with_log<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.extra_logs.push(path.into());
        self
    }
}

/// A loaded, read-only registry hive.
#[derive(Debug, Clone)]
pub struct Hive {
    image: HiveImage,
    replay: ReplayStats,
}

impl Hive {
    /// Opens a hive file and replays any sibling transaction logs.
    ///
    /// # Errors
    ///
    /// `FileNotFound` if the path does not exist, `Io` if it cannot be read,
    /// and `InvalidSignature`/`HiveTooSmall` if it is not a REGF file. Log
    /// problems never cause an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use regf_recover::Hive;
    ///
    /// let hive = Hive::open("SYSTEM").unwrap();
    /// if let Some(key) = hive.get_key("ControlSet001\\Services") {
    ///     println!("{} has {} subkeys", key.path(), key.subkey_count());
    /// }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, &LoadOptions::default())
    }

    /// Opens a hive file with explicit options.
    #[instrument(skip(path, options), fields(path = %path.as_ref().display()))]
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening registry hive");

        let data = fs::read(path).map_err(|e| RegistryError::from_open(e, path))?;
        debug!(size = data.len(), "Read hive file");
        let mut image = HiveImage::from_vec(data)?;

        let replay = if options.recover_from_logs {
            let mut paths = discover_logs(path);
            for extra in &options.extra_logs {
                if !paths.contains(extra) {
                    paths.push(extra.clone());
                }
            }
            debug!(count = paths.len(), "Transaction logs found");
            let logs = load_logs(&paths);
            transaction_log::replay(&mut image, &logs, options.max_hive_size)
        } else {
            ReplayStats::default()
        };

        Ok(Self::from_image(image, replay))
    }

    /// Creates a hive from owned bytes without log replay.
    ///
    /// # Errors
    ///
    /// Fails if the bytes do not start with a REGF base block.
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        Ok(Self::from_image(HiveImage::from_vec(data)?, ReplayStats::default()))
    }

    /// Creates a hive from owned bytes and replays the given logs into it.
    ///
    /// # Errors
    ///
    /// Fails if the bytes do not start with a REGF base block.
    pub fn from_vec_with_logs(data: Vec<u8>, logs: &[TransactionLog]) -> Result<Self> {
        let mut image = HiveImage::from_vec(data)?;
        let replay = transaction_log::replay(&mut image, logs, MAX_HIVE_SIZE);
        Ok(Self::from_image(image, replay))
    }

    fn from_image(image: HiveImage, replay: ReplayStats) -> Self {
        let bb = image.base_block();
        if !bb.checksum_valid {
            warn!(stored = %format!("{:#x}", bb.checksum), "Base block checksum mismatch");
        }
        if !bb.is_consistent() && !replay.applied() {
            debug!(
                primary = bb.primary_sequence,
                secondary = bb.secondary_sequence,
                "Hive is dirty and no log entry was applied"
            );
        }
        Self { image, replay }
    }

    /// Returns the base block header (re-parsed after any replay).
    pub fn base_block(&self) -> &BaseBlock {
        self.image.base_block()
    }

    /// Returns the underlying image.
    pub fn image(&self) -> &HiveImage {
        &self.image
    }

    /// Returns true if at least one transaction log page was applied.
    pub fn transaction_logs_applied(&self) -> bool {
        self.replay.applied()
    }

    /// Returns replay bookkeeping.
    pub fn replay_stats(&self) -> ReplayStats {
        self.replay
    }

    /// Returns the root key of the hive.
    pub fn root_key(&self) -> Option<RegKey> {
        let offset = self.base_block().root_cell_offset;
        let node = self.key_node(offset)?;
        let path = node.name.clone();
        Some(self.build_key(node, path))
    }

    /// Looks up a key by backslash-separated path, ignoring case.
    ///
    /// The path is relative to the root key; a leading component naming the
    /// root key itself is also accepted. An empty path returns the root.
    pub fn get_key(&self, path: &str) -> Option<RegKey> {
        let components = split_path(path);
        let ((_, node), full_path) = match self.resolve(&components) {
            Some(found) => found,
            None => {
                let root = self.key_node(self.base_block().root_cell_offset)?;
                match components.split_first() {
                    Some((first, rest)) if first.to_lowercase() == root.name.to_lowercase() => {
                        self.resolve(rest)?
                    }
                    _ => return None,
                }
            }
        };
        Some(self.build_key(node, full_path))
    }

    /// Pre-order depth-first iterator over every key in the hive.
    pub fn iter(&self) -> KeyIter<'_> {
        KeyIter {
            hive: self,
            stack: vec![String::new()],
            visited: HashSet::new(),
        }
    }

    fn key_node(&self, offset: u32) -> Option<KeyNode> {
        match self.image.decode(offset) {
            Ok(Cell::Key(node)) => Some(node),
            Ok(_) => {
                debug!(offset = %format!("{:#x}", offset), "Cell is not a key node");
                None
            }
            Err(e) => {
                debug!(offset = %format!("{:#x}", offset), error = %e, "Unreadable key node");
                None
            }
        }
    }

    /// Walks `components` down from the root. Returns the final key's offset
    /// and node together with its full path.
    fn resolve(&self, components: &[&str]) -> Option<((u32, KeyNode), String)> {
        let mut offset = self.base_block().root_cell_offset;
        let mut node = self.key_node(offset)?;
        let mut path = node.name.clone();

        for component in components {
            if node.subkey_count == 0 {
                return None;
            }
            offset = find_subkey(&self.image, node.subkey_list_offset, component)?;
            node = self.key_node(offset)?;
            path.push(PATH_SEPARATOR);
            path.push_str(&node.name);
        }

        Some(((offset, node), path))
    }

    fn build_key(&self, node: KeyNode, path: String) -> RegKey {
        let subkeys = if node.has_subkeys() {
            collect_names(&self.image, node.subkey_list_offset)
        } else {
            Vec::new()
        };
        let values = self.decode_values(&node);

        RegKey {
            last_modified: node.last_written_datetime(),
            name: node.name,
            path,
            subkeys,
            values,
        }
    }

    fn decode_values(&self, node: &KeyNode) -> Vec<RegValue> {
        if !node.has_values() || node.value_list_offset == NULL_OFFSET {
            return Vec::new();
        }

        let list = match self.image.read_cell(node.value_list_offset) {
            Ok(list) => list,
            Err(e) => {
                debug!(key = %node.name, error = %e, "Unreadable value list");
                return Vec::new();
            }
        };

        let count = (node.value_count as usize).min(list.len() / 4);
        (0..count)
            .filter_map(|i| read_u32_le(list, i * 4).ok())
            .filter_map(|offset| match self.image.decode(offset) {
                Ok(Cell::Value(vk)) => Some(self.decode_value(vk)),
                _ => {
                    trace!(offset = %format!("{:#x}", offset), "Skipping unreadable value");
                    None
                }
            })
            .collect()
    }

    fn decode_value(&self, vk: ValueKey) -> RegValue {
        let raw = vk.raw_data(&self.image).unwrap_or_else(|e| {
            debug!(value = %vk.name, error = %e, "Unreadable value data");
            Vec::new()
        });
        RegValue {
            data: ValueData::parse(&raw, vk.data_type),
            value_type: vk.data_type,
            name: vk.name,
        }
    }
}

impl<'a> IntoIterator for &'a Hive {
    type Item = RegKey;
    type IntoIter = KeyIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Splits a key path into its non-empty components.
fn split_path(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR).filter(|c| !c.is_empty()).collect()
}

/// Pre-order iterator over all keys of a [`Hive`].
///
/// Pending keys are held as relative paths and resolved from the root on
/// every step. Key cells already yielded are not yielded again, so cyclic
/// or duplicated references terminate.
///
/// Since children are reached by name, siblings whose names differ only in
/// case all resolve to the first of them; the others are never yielded.
pub struct KeyIter<'a> {
    hive: &'a Hive,
    stack: Vec<String>,
    visited: HashSet<u32>,
}

impl Iterator for KeyIter<'_> {
    type Item = RegKey;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(relative) = self.stack.pop() {
            let Some(((offset, node), path)) = self.hive.resolve(&split_path(&relative)) else {
                continue;
            };
            if !self.visited.insert(offset) {
                trace!(path = %path, "Key already visited");
                continue;
            }

            let key = self.hive.build_key(node, path);
            for child in key.subkeys.iter().rev() {
                let mut child_path = relative.clone();
                if !child_path.is_empty() {
                    child_path.push(PATH_SEPARATOR);
                }
                child_path.push_str(child);
                self.stack.push(child_path);
            }
            return Some(key);
        }
        None
    }
}

/// A decoded registry key.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegKey {
    name: String,
    path: String,
    last_modified: Option<DateTime<Utc>>,
    subkeys: Vec<String>,
    values: Vec<RegValue>,
}

impl RegKey {
    /// Key name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path, starting with the root key's name.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last write time.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Names of the immediate subkeys.
    pub fn subkey_names(&self) -> &[String] {
        &self.subkeys
    }

    /// Number of readable subkeys.
    pub fn subkey_count(&self) -> usize {
        self.subkeys.len()
    }

    /// Values held by this key.
    pub fn values(&self) -> &[RegValue] {
        &self.values
    }

    /// Number of readable values.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Finds a value by name, ignoring case. `""` names the default value.
    pub fn value(&self, name: &str) -> Option<&RegValue> {
        let wanted = name.to_lowercase();
        self.values.iter().find(|v| v.name.to_lowercase() == wanted)
    }
}

/// A decoded registry value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegValue {
    name: String,
    value_type: ValueType,
    data: ValueData,
}

impl RegValue {
    /// Value name; empty for the default value.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Decoded payload.
    pub fn data(&self) -> &ValueData {
        &self.data
    }

    /// Text of a string, expandable string or link value.
    pub fn as_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    /// Integer of a DWORD value.
    pub fn as_u32(&self) -> Option<u32> {
        self.data.as_u32()
    }

    /// Integer of a QWORD value.
    pub fn as_u64(&self) -> Option<u64> {
        self.data.as_u64()
    }

    /// Bytes of a binary value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.data.as_bytes()
    }

    /// Strings of a multi-string value.
    pub fn as_multi_string(&self) -> Option<&[String]> {
        self.data.as_multi_string()
    }
}
